use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Batch, BatchOp, BatchReply, EligibilityIndex, ScoreBound};
use crate::error::StoreError;

/// An in-process eligibility index.
///
/// Clones share the same underlying sets, so several schedulers built from
/// clones of one `MemoryIndex` behave like several clients of one store.
#[derive(Clone, Debug, Default)]
pub struct MemoryIndex {
    sets: Arc<Mutex<HashMap<String, SortedSet>>>,
}

/// A member -> score mapping, plus the same entries ordered by (score,
/// member) the way a sorted-set store orders ties.
#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: i64) {
        if let Some(old) = self.scores.insert(member.to_owned(), score) {
            self.ordered.remove(&(old, member.to_owned()));
        }
        self.ordered.insert((score, member.to_owned()));
    }

    fn range(&self, min: ScoreBound, max: ScoreBound) -> Vec<String> {
        self.ordered
            .iter()
            .skip_while(|(score, _)| !min.admits_from_below(*score))
            .take_while(|(score, _)| max.admits_from_above(*score))
            .map(|(_, member)| member.clone())
            .collect()
    }

    fn remove_range(&mut self, min: ScoreBound, max: ScoreBound) -> u64 {
        let doomed = self.range(min, max);
        for member in &doomed {
            if let Some(score) = self.scores.remove(member) {
                self.ordered.remove(&(score, member.clone()));
            }
        }
        doomed.len() as u64
    }
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held in `set`.
    pub async fn len(&self, set: &str) -> usize {
        self.sets
            .lock()
            .await
            .get(set)
            .map_or(0, |s| s.scores.len())
    }

    /// The score of `member` in `set`, if it is present.
    pub async fn score(&self, set: &str, member: &str) -> Option<i64> {
        self.sets
            .lock()
            .await
            .get(set)
            .and_then(|s| s.scores.get(member).copied())
    }
}

#[async_trait]
impl EligibilityIndex for MemoryIndex {
    async fn upsert(
        &self,
        set: &str,
        member: &str,
        score: i64,
    ) -> Result<(), StoreError> {
        self.sets
            .lock()
            .await
            .entry(set.to_owned())
            .or_default()
            .insert(member, score);
        Ok(())
    }

    async fn exec(&self, batch: Batch) -> Result<Vec<BatchReply>, StoreError> {
        // Holding the lock for the whole batch is what makes it atomic.
        let mut sets = self.sets.lock().await;

        let replies = batch
            .ops()
            .iter()
            .map(|op| match op {
                BatchOp::RangeByScore { set, min, max } => BatchReply::Members(
                    sets.get(set)
                        .map_or_else(Vec::new, |s| s.range(*min, *max)),
                ),
                BatchOp::RemoveRangeByScore { set, min, max } => {
                    BatchReply::Removed(
                        sets.get_mut(set)
                            .map_or(0, |s| s.remove_range(*min, *max)),
                    )
                },
            })
            .collect();

        // Sorted-set stores drop a set once its last member goes.
        sets.retain(|_, s| !s.scores.is_empty());

        Ok(replies)
    }
}
