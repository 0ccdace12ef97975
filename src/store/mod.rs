//! The ordered eligibility index the scheduler depends on.
//!
//! The scheduler only needs a small slice of what a sorted-set store offers:
//! an upsert of a member with a numeric score, and an atomic batch in which a
//! range of members can be read and then removed by score. Anything that
//! implements [`EligibilityIndex`] can back a queue.
use std::fmt;

use async_trait::async_trait;

use crate::error::StoreError;

mod memory;
#[cfg(feature = "redis")]
mod redis_index;

pub use memory::MemoryIndex;
#[cfg(feature = "redis")]
pub use redis_index::RedisIndex;

/// One end of a score range.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScoreBound {
    NegInfinity,
    Inclusive(i64),
    PosInfinity,
}

impl ScoreBound {
    pub(crate) fn admits_from_below(&self, score: i64) -> bool {
        match self {
            Self::NegInfinity => true,
            Self::Inclusive(min) => score >= *min,
            Self::PosInfinity => false,
        }
    }

    pub(crate) fn admits_from_above(&self, score: i64) -> bool {
        match self {
            Self::NegInfinity => false,
            Self::Inclusive(max) => score <= *max,
            Self::PosInfinity => true,
        }
    }
}

// Formats bounds the way sorted-set commands expect them.
impl fmt::Display for ScoreBound {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NegInfinity => f.write_str("-inf"),
            Self::Inclusive(score) => write!(f, "{score}"),
            Self::PosInfinity => f.write_str("+inf"),
        }
    }
}

/// A single operation queued in a [`Batch`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BatchOp {
    /// Reads members with `min <= score <= max`, ascending by score.
    RangeByScore {
        set: String,
        min: ScoreBound,
        max: ScoreBound,
    },
    /// Removes members with `min <= score <= max`.
    RemoveRangeByScore {
        set: String,
        min: ScoreBound,
        max: ScoreBound,
    },
}

/// The result of one [`BatchOp`], in the position of the op that produced it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BatchReply {
    Members(Vec<String>),
    Removed(u64),
}

/// A list of operations executed as one indivisible unit by
/// [`EligibilityIndex::exec`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn range_by_score(
        &mut self,
        set: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> &mut Self {
        self.ops.push(BatchOp::RangeByScore {
            set: set.to_owned(),
            min,
            max,
        });
        self
    }

    pub fn remove_range_by_score(
        &mut self,
        set: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> &mut Self {
        self.ops.push(BatchOp::RemoveRangeByScore {
            set: set.to_owned(),
            min,
            max,
        });
        self
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// The capability a store must offer to back a queue.
///
/// `exec` must be atomic: no other `upsert` or `exec` against the same set
/// may observe or interleave with a partially applied batch. The at-most-once
/// claim guarantee rests entirely on this.
#[async_trait]
pub trait EligibilityIndex: Send + Sync {
    /// Inserts `member` into `set`, or replaces its score if already present.
    async fn upsert(
        &self,
        set: &str,
        member: &str,
        score: i64,
    ) -> Result<(), StoreError>;

    /// Opens an empty batch.
    fn batch(&self) -> Batch {
        Batch::new()
    }

    /// Executes every op in `batch` atomically, returning one reply per op in
    /// submission order. On error, none of the ops have taken effect.
    async fn exec(&self, batch: Batch) -> Result<Vec<BatchReply>, StoreError>;
}
