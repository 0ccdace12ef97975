//! A queue exposed as a sink of schedule requests and a stream of due keys.
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Sink, Stream};
use tokio::sync::{broadcast, mpsc};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{ConfigurationError, Error};
use crate::lifecycle::{Poller, State};
use crate::scheduler::Scheduler;
use crate::store::EligibilityIndex;
use crate::types::job::ScheduleRequest;

const ERROR_CHANNEL_CAPACITY: usize = 64;

/// One consumer's handle on a queue.
///
/// Writing (via [`WorkQueue::schedule`] or [`WorkQueue::sink`]) schedules
/// jobs. Reading the queue as a [`Stream`] yields claimed keys; polling only
/// starts the first time the stream is read, so a `WorkQueue` that is only
/// ever written to never claims anything.
///
/// Every failure, including those of background polls that have no caller to
/// return to, is also published on [`WorkQueue::errors`].
///
/// The poll task is spawned onto the ambient Tokio runtime, so the stream
/// (like [`WorkQueue::start`]) must be read from within one.
pub struct WorkQueue<S: ?Sized> {
    scheduler: Arc<Scheduler<S>>,
    poller: Poller<S>,
    due: mpsc::UnboundedReceiver<String>,
    errors: broadcast::Sender<Error>,
}

impl<S: ?Sized> std::fmt::Debug for WorkQueue<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

impl<S: EligibilityIndex + ?Sized + 'static> WorkQueue<S> {
    pub fn new(
        store: Arc<S>,
        config: &Config,
    ) -> Result<Self, ConfigurationError> {
        let scheduler = Arc::new(Scheduler::new(store, config)?);
        let (dispatcher, due) = Dispatcher::new();
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        let poller = Poller::new(
            scheduler.clone(),
            dispatcher,
            config.poll_interval(),
            errors.clone(),
        );

        Ok(Self {
            scheduler,
            poller,
            due,
            errors,
        })
    }

    /// Schedules one job, resolving once the store has acknowledged it.
    pub async fn schedule(
        &self,
        request: ScheduleRequest,
    ) -> Result<(), Error> {
        schedule_signalled(&self.scheduler, &self.errors, request).await
    }

    /// A sink that schedules each request written to it, in order. Each
    /// write completes once the store has acknowledged it.
    ///
    /// The sink is independent of this handle's lifetime. Like any sink it
    /// is unusable after its first error.
    pub fn sink(
        &self,
    ) -> impl Sink<ScheduleRequest, Error = Error> + Send + 'static {
        let state = (self.scheduler.clone(), self.errors.clone());

        futures::sink::unfold(state, |state, request| async move {
            schedule_signalled(&state.0, &state.1, request).await?;
            Ok::<_, Error>(state)
        })
    }

    /// Begins polling now rather than on the first read.
    pub fn start(&self) -> bool {
        self.poller.start()
    }
}

impl<S: ?Sized> WorkQueue<S> {
    /// Stops polling for good. Keys already claimed, including those of a
    /// poll still in flight, remain readable; the stream then ends.
    pub fn stop(&self) {
        self.poller.stop();
    }

    /// Waits for a stopped queue's poll task to exit.
    pub async fn join(&self) {
        self.poller.join().await;
    }

    pub fn state(&self) -> State {
        self.poller.state()
    }

    pub fn queue_name(&self) -> &str {
        self.scheduler.queue_name()
    }

    /// Subscribes to failures of this queue's schedules and polls.
    pub fn errors(&self) -> broadcast::Receiver<Error> {
        self.errors.subscribe()
    }
}

async fn schedule_signalled<S: EligibilityIndex + ?Sized>(
    scheduler: &Scheduler<S>,
    errors: &broadcast::Sender<Error>,
    request: ScheduleRequest,
) -> Result<(), Error> {
    scheduler.schedule(request).await.map_err(|error| {
        let _ = errors.send(error.clone());
        error
    })
}

impl<S: EligibilityIndex + ?Sized + 'static> Stream for WorkQueue<S> {
    type Item = String;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        // Demand starts polling. Idempotent, and a no-op once stopped.
        this.poller.start();
        this.due.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::{SinkExt, StreamExt};
    use tokio::time::timeout;

    use super::*;
    use crate::error::ValidationError;
    use crate::store::MemoryIndex;

    fn queue(index: &MemoryIndex, name: &str) -> WorkQueue<MemoryIndex> {
        let config =
            Config::new(name).with_poll_interval(Duration::from_millis(5));
        WorkQueue::new(Arc::new(index.clone()), &config).unwrap()
    }

    #[tokio::test]
    async fn writing_alone_never_polls() {
        let index = MemoryIndex::new();
        let q = queue(&index, "write-only");

        q.schedule(ScheduleRequest::immediate("1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(q.state(), State::Idle);
        assert_eq!(index.len("write-only").await, 1);
    }

    /// Only needs the handle, not a store capability.
    fn describe<S: ?Sized>(q: &WorkQueue<S>) -> String {
        format!("{} ({:?})", q.queue_name(), q.state())
    }

    #[test]
    fn name_and_state_need_no_store_bound() {
        let index = MemoryIndex::new();
        let q = queue(&index, "named");

        assert_eq!(describe(&q), "named (Idle)");
    }

    #[tokio::test]
    async fn first_read_starts_polling() {
        let index = MemoryIndex::new();
        let mut q = queue(&index, "lazy");

        q.schedule(ScheduleRequest::immediate("1")).await.unwrap();

        let key = timeout(Duration::from_secs(1), q.next()).await.unwrap();
        assert_eq!(key.as_deref(), Some("1"));
        assert_eq!(q.state(), State::Polling);
        q.stop();
    }

    #[tokio::test]
    async fn sink_acknowledges_in_order() {
        let index = MemoryIndex::new();
        let mut q = queue(&index, "sink");

        let mut sink = Box::pin(q.sink());
        sink.send(ScheduleRequest::new("b", 2)).await.unwrap();
        sink.send(ScheduleRequest::new("a", 1)).await.unwrap();
        sink.send(ScheduleRequest::new("b", 3)).await.unwrap();
        assert_eq!(index.score("sink", "b").await, Some(3));

        let keys: Vec<String> =
            timeout(Duration::from_secs(1), (&mut q).take(2).collect())
                .await
                .unwrap();
        assert_eq!(keys, vec!["a", "b"]);
        q.stop();
    }

    #[tokio::test]
    async fn invalid_writes_are_signalled() {
        let index = MemoryIndex::new();
        let q = queue(&index, "invalid");
        let mut errors = q.errors();

        let expected = Error::Validation(ValidationError::MissingKey);
        assert_eq!(
            q.schedule(ScheduleRequest::default()).await,
            Err(expected.clone())
        );
        assert_eq!(errors.recv().await.unwrap(), expected);

        let mut sink = Box::pin(q.sink());
        assert_eq!(
            sink.send(ScheduleRequest::new("", 0)).await,
            Err(Error::Validation(ValidationError::EmptyKey))
        );
        assert_eq!(
            errors.recv().await.unwrap(),
            Error::Validation(ValidationError::EmptyKey)
        );

        assert_eq!(index.len("invalid").await, 0);
        // The queue itself carries on.
        q.schedule(ScheduleRequest::immediate("fine")).await.unwrap();
    }

    #[tokio::test]
    async fn stopped_stream_drains_then_ends() {
        let index = MemoryIndex::new();
        let mut q = queue(&index, "drain");

        q.schedule(ScheduleRequest::immediate("1")).await.unwrap();
        q.schedule(ScheduleRequest::immediate("2")).await.unwrap();
        assert_eq!(
            timeout(Duration::from_secs(1), q.next()).await.unwrap().as_deref(),
            Some("1")
        );

        q.stop();
        q.stop();
        q.join().await;

        assert_eq!(q.next().await.as_deref(), Some("2"));
        assert_eq!(q.next().await, None);
        assert_eq!(q.state(), State::Stopped);
    }

    #[tokio::test]
    async fn construction_rejects_bad_config() {
        let index = Arc::new(MemoryIndex::new());

        assert_eq!(
            WorkQueue::new(index, &Config::new("")).unwrap_err(),
            ConfigurationError::EmptyQueueName
        );
    }
}
