//! Starting and stopping the periodic poll.
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::select;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::scheduler::Scheduler;
use crate::store::EligibilityIndex;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    /// Constructed, never started.
    Idle,
    /// A poll task is running.
    Polling,
    /// Terminal. A stopped poller cannot be restarted.
    Stopped,
}

#[derive(Debug)]
struct Inner {
    state: State,
    /// Handed to the poll task on start, dropped on stop, so the consumer's
    /// receiver closes once no poll can deliver to it any more.
    dispatcher: Option<Dispatcher>,
    task: Option<JoinHandle<()>>,
}

/// Drives [`Scheduler::poll_and_claim`] on a fixed period and feeds each
/// claimed batch to a [`Dispatcher`].
///
/// At most one poll task ever exists per `Poller`, and its ticks never
/// overlap: the next tick is only awaited once the previous store round-trip
/// has finished.
pub struct Poller<S: ?Sized> {
    scheduler: Arc<Scheduler<S>>,
    period: Duration,
    errors: broadcast::Sender<Error>,
    cancel: CancellationToken,
    inner: Mutex<Inner>,
}

impl<S: ?Sized> std::fmt::Debug for Poller<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("scheduler", &self.scheduler)
            .field("period", &self.period)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<S: ?Sized> Poller<S> {
    pub fn state(&self) -> State {
        self.lock().state
    }

    /// Stops polling. No tick begins after this returns, but a store
    /// round-trip already under way is allowed to finish and its keys are
    /// still dispatched.
    ///
    /// Idempotent; also valid on a poller that was never started.
    pub fn stop(&self) {
        let mut inner = self.lock();
        if inner.state != State::Stopped {
            debug!(from = ?inner.state, "stopping poller");
            inner.state = State::Stopped;
        }
        inner.dispatcher = None;
        self.cancel.cancel();
    }

    /// Waits for the poll task, if one was started, to exit. Only returns
    /// once the poller has been stopped or its consumer has gone away.
    pub async fn join(&self) {
        let task = self.lock().task.take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                warn!(%error, "poll task did not exit cleanly");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // The guarded data is two plain fields; a panic elsewhere can't leave
        // it inconsistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: EligibilityIndex + ?Sized + 'static> Poller<S> {
    pub fn new(
        scheduler: Arc<Scheduler<S>>,
        dispatcher: Dispatcher,
        period: Duration,
        errors: broadcast::Sender<Error>,
    ) -> Self {
        Self {
            scheduler,
            period,
            errors,
            cancel: CancellationToken::new(),
            inner: Mutex::new(Inner {
                state: State::Idle,
                dispatcher: Some(dispatcher),
                task: None,
            }),
        }
    }

    /// Starts polling, returning whether this call did so.
    ///
    /// A no-op while already polling, and on a stopped poller. Must be called
    /// from within a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != State::Idle {
            return false;
        }
        let Some(dispatcher) = inner.dispatcher.take() else {
            return false;
        };

        debug!(period = ?self.period, "starting poller");

        let span = tracing::debug_span!(
            "poller",
            queue = %self.scheduler.queue_name()
        );
        inner.task = Some(tokio::spawn(
            run(
                self.scheduler.clone(),
                dispatcher,
                self.period,
                self.errors.clone(),
                self.cancel.clone(),
            )
            .instrument(span),
        ));
        inner.state = State::Polling;

        true
    }
}

impl<S: ?Sized> Drop for Poller<S> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<S: EligibilityIndex + ?Sized>(
    scheduler: Arc<Scheduler<S>>,
    dispatcher: Dispatcher,
    period: Duration,
    errors: broadcast::Sender<Error>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    // A slow round-trip pushes the schedule back rather than causing a burst
    // of catch-up ticks.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {},
        }

        if !may_claim(&cancel, &dispatcher) {
            break;
        }

        // Deliberately not raced against `cancel`: once the claim is sent to
        // the store its result must be dispatched.
        match scheduler.poll_and_claim_now().await {
            Ok(batch) => {
                if dispatcher.dispatch(batch).is_err() {
                    break;
                }
            },
            Err(error) => {
                warn!(%error, "poll failed, retrying next tick");
                // No subscribers is fine: the failure is already logged.
                let _ = errors.send(error.into());
            },
        }
    }

    debug!("poller exited");
}

/// Whether a tick that has just fired may still go on to claim.
fn may_claim(cancel: &CancellationToken, dispatcher: &Dispatcher) -> bool {
    // stop() may have landed on another thread while the tick was taken.
    if cancel.is_cancelled() {
        return false;
    }
    // Claiming for a consumer that no longer exists would lose the jobs.
    if dispatcher.is_closed() {
        debug!("consumer gone");
        return false;
    }
    true
}
