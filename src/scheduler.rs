//! Enqueueing and the atomic poll-claim cycle.
use std::sync::Arc;

use tracing::{debug, instrument, trace};

use crate::config::Config;
use crate::error::{ConfigurationError, Error, StoreError};
use crate::store::{BatchReply, EligibilityIndex, ScoreBound};
use crate::types::job::{Job, ScheduleRequest};
use crate::util::now_millis;

/// Schedules jobs into, and claims due jobs from, one named queue of an
/// [`EligibilityIndex`].
///
/// A `Scheduler` holds no state besides its store handle and queue name, so
/// any number of them, in any number of processes, may share a queue. They
/// coordinate only through the atomicity of [`EligibilityIndex::exec`].
pub struct Scheduler<S: ?Sized> {
    store: Arc<S>,
    queue_name: String,
}

impl<S: ?Sized> std::fmt::Debug for Scheduler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("queue_name", &self.queue_name)
            .finish_non_exhaustive()
    }
}

impl<S: ?Sized> Scheduler<S> {
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

impl<S: EligibilityIndex + ?Sized> Scheduler<S> {
    pub fn new(
        store: Arc<S>,
        config: &Config,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;

        Ok(Self {
            store,
            queue_name: config.queue_name.clone(),
        })
    }

    /// Validates `request` and writes its entry to the index, replacing the
    /// eligibility time of any entry with the same key.
    ///
    /// Resolves once the store has acknowledged the write. An invalid request
    /// is rejected without touching the store.
    #[instrument(
        skip_all,
        fields(queue = %self.queue_name, key = tracing::field::Empty),
        err
    )]
    pub async fn schedule(
        &self,
        request: ScheduleRequest,
    ) -> Result<(), Error> {
        let job = Job::try_from(request)?;
        tracing::Span::current().record("key", job.key.as_str());

        self.store
            .upsert(&self.queue_name, &job.key, job.eligible_at)
            .await?;

        trace!(eligible_at = job.eligible_at, "scheduled");
        Ok(())
    }

    /// Atomically takes every entry with a score at or below `now` out of the
    /// index, returning their keys earliest-eligible first.
    ///
    /// On error no entry is taken: whatever was due stays due for the next
    /// poll.
    #[instrument(skip(self), fields(queue = %self.queue_name), err)]
    pub async fn poll_and_claim(
        &self,
        now: i64,
    ) -> Result<Vec<String>, StoreError> {
        let until = ScoreBound::Inclusive(now);

        let mut batch = self.store.batch();
        batch
            .range_by_score(&self.queue_name, ScoreBound::NegInfinity, until)
            .remove_range_by_score(
                &self.queue_name,
                ScoreBound::NegInfinity,
                until,
            );

        let mut replies = self.store.exec(batch).await?.into_iter();

        let claimed = match (replies.next(), replies.next(), replies.next()) {
            (
                Some(BatchReply::Members(keys)),
                Some(BatchReply::Removed(removed)),
                None,
            ) => {
                if removed != keys.len() as u64 {
                    // Only possible if the store isn't atomic.
                    return Err(StoreError::UnexpectedReply(format!(
                        "read {} due entries but removed {removed}",
                        keys.len()
                    )));
                }
                keys
            },
            other => {
                return Err(StoreError::UnexpectedReply(format!("{other:?}")));
            },
        };

        if !claimed.is_empty() {
            debug!(count = claimed.len(), "claimed due jobs");
        }

        Ok(claimed)
    }

    /// As [`Scheduler::poll_and_claim`], as of the current wall-clock time.
    pub async fn poll_and_claim_now(&self) -> Result<Vec<String>, StoreError> {
        self.poll_and_claim(now_millis()).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::ValidationError;
    use crate::store::{Batch, MemoryIndex};

    fn scheduler(index: &MemoryIndex, queue: &str) -> Scheduler<MemoryIndex> {
        Scheduler::new(Arc::new(index.clone()), &Config::new(queue)).unwrap()
    }

    #[tokio::test]
    async fn rescheduling_a_key_overwrites_it() {
        let index = MemoryIndex::new();
        let s = scheduler(&index, "overwrite");

        s.schedule(ScheduleRequest::new("k", 10)).await.unwrap();
        s.schedule(ScheduleRequest::new("k", 20)).await.unwrap();

        assert!(s.poll_and_claim(15).await.unwrap().is_empty());
        assert_eq!(s.poll_and_claim(20).await.unwrap(), vec!["k"]);
        assert!(s.poll_and_claim(i64::MAX).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_is_ordered_by_eligibility() {
        let index = MemoryIndex::new();
        let s = scheduler(&index, "order");

        s.schedule(ScheduleRequest::new("c", 30)).await.unwrap();
        s.schedule(ScheduleRequest::new("a", 10)).await.unwrap();
        s.schedule(ScheduleRequest::new("b", 20)).await.unwrap();
        s.schedule(ScheduleRequest::new("later", 1000)).await.unwrap();

        assert_eq!(s.poll_and_claim(100).await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(index.len("order").await, 1);
    }

    #[tokio::test]
    async fn unspecified_and_negative_times_are_due_immediately() {
        let index = MemoryIndex::new();
        let s = scheduler(&index, "due");

        s.schedule(ScheduleRequest::new("neg", -1)).await.unwrap();
        s.schedule(ScheduleRequest::immediate("zero")).await.unwrap();

        assert_eq!(s.poll_and_claim(0).await.unwrap(), vec!["neg", "zero"]);
    }

    #[tokio::test]
    async fn invalid_requests_leave_the_index_alone() {
        let index = MemoryIndex::new();
        let s = scheduler(&index, "invalid");

        assert_eq!(
            s.schedule(ScheduleRequest::new("", 5)).await,
            Err(Error::Validation(ValidationError::EmptyKey))
        );
        assert_eq!(
            s.schedule(ScheduleRequest::default()).await,
            Err(Error::Validation(ValidationError::MissingKey))
        );
        assert_eq!(index.len("invalid").await, 0);
        assert!(s.poll_and_claim(i64::MAX).await.unwrap().is_empty());

        // Still usable afterwards.
        s.schedule(ScheduleRequest::new("ok", 5)).await.unwrap();
        assert_eq!(s.poll_and_claim(5).await.unwrap(), vec!["ok"]);
    }

    #[tokio::test]
    async fn queues_are_isolated() {
        let index = MemoryIndex::new();
        let a = scheduler(&index, "a");
        let b = scheduler(&index, "b");

        a.schedule(ScheduleRequest::immediate("1")).await.unwrap();

        assert!(b.poll_and_claim(1).await.unwrap().is_empty());
        assert_eq!(a.poll_and_claim(1).await.unwrap(), vec!["1"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_never_share_a_key() {
        let index = MemoryIndex::new();
        let writer = scheduler(&index, "shared");

        for n in 0..2000 {
            writer
                .schedule(ScheduleRequest::new(n.to_string(), n % 500))
                .await
                .unwrap();
        }

        // Each worker claims at rising times, so they race over the same
        // due entries from separate threads.
        let workers: Vec<_> = (0..4)
            .map(|w| {
                let s = scheduler(&index, "shared");
                tokio::spawn(async move {
                    let mut claimed = Vec::new();
                    for now in (w..=500).step_by(3) {
                        claimed.extend(s.poll_and_claim(now).await.unwrap());
                        tokio::task::yield_now().await;
                    }
                    claimed
                })
            })
            .collect();

        let mut claimed = Vec::new();
        for worker in workers {
            claimed.extend(worker.await.unwrap());
        }
        claimed.extend(writer.poll_and_claim(i64::MAX).await.unwrap());

        let unique: HashSet<&String> = claimed.iter().collect();
        assert_eq!(unique.len(), claimed.len(), "a key was claimed twice");
        assert_eq!(claimed.len(), 2000);
        assert_eq!(index.len("shared").await, 0);
    }

    #[test]
    fn construction_rejects_bad_config() {
        let index = Arc::new(MemoryIndex::new());

        assert_eq!(
            Scheduler::new(index.clone(), &Config::new("")).unwrap_err(),
            ConfigurationError::EmptyQueueName
        );
        let stalled = Config::new("q").with_poll_interval(Duration::ZERO);
        assert_eq!(
            Scheduler::new(index, &stalled).unwrap_err(),
            ConfigurationError::ZeroPollInterval
        );
    }

    /// A store whose every operation fails.
    struct Unavailable;

    #[async_trait]
    impl EligibilityIndex for Unavailable {
        async fn upsert(
            &self,
            _: &str,
            _: &str,
            _: i64,
        ) -> Result<(), StoreError> {
            Err(StoreError::Connection("refused".into()))
        }

        async fn exec(
            &self,
            _: Batch,
        ) -> Result<Vec<BatchReply>, StoreError> {
            Err(StoreError::Connection("refused".into()))
        }
    }

    #[tokio::test]
    async fn store_failures_are_returned() {
        let s = Scheduler::new(Arc::new(Unavailable), &Config::default())
            .unwrap();

        assert_eq!(
            s.schedule(ScheduleRequest::immediate("k")).await,
            Err(Error::Store(StoreError::Connection("refused".into())))
        );
        assert_eq!(
            s.poll_and_claim_now().await,
            Err(StoreError::Connection("refused".into()))
        );
    }

    /// A store that answers batches with the wrong shape.
    struct Garbled;

    #[async_trait]
    impl EligibilityIndex for Garbled {
        async fn upsert(
            &self,
            _: &str,
            _: &str,
            _: i64,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn exec(
            &self,
            _: Batch,
        ) -> Result<Vec<BatchReply>, StoreError> {
            Ok(vec![BatchReply::Removed(0)])
        }
    }

    #[tokio::test]
    async fn malformed_replies_are_store_errors() {
        let s = Scheduler::new(Arc::new(Garbled), &Config::default()).unwrap();

        assert!(matches!(
            s.poll_and_claim(0).await,
            Err(StoreError::UnexpectedReply(_))
        ));
    }

    #[tokio::test]
    async fn works_through_a_trait_object() {
        let index: Arc<dyn EligibilityIndex> = Arc::new(MemoryIndex::new());
        let s = Scheduler::new(index, &Config::default()).unwrap();

        s.schedule(ScheduleRequest::immediate("dyn")).await.unwrap();
        assert_eq!(s.poll_and_claim(0).await.unwrap(), vec!["dyn"]);
    }
}
