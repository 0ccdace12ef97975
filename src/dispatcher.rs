use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Hands claimed keys to the consuming side, one at a time and in the order
/// they were claimed.
///
/// Keys are buffered in memory until the consumer takes them, so a slow
/// consumer never holds up (or repeats) a claim. Anything still buffered when
/// the process dies is lost.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<String>,
}

/// The consuming side has gone away.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Closed;

impl Dispatcher {
    /// Creates a dispatcher and the receiver its keys arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Delivers every key of one claimed batch, preserving its order.
    ///
    /// If the receiver has been dropped the rest of the batch is discarded:
    /// those keys are already out of the index and cannot be put back.
    pub fn dispatch(&self, batch: Vec<String>) -> Result<usize, Closed> {
        let total = batch.len();

        for (delivered, key) in batch.into_iter().enumerate() {
            trace!(%key, "delivering");
            if let Err(mpsc::error::SendError(key)) = self.tx.send(key) {
                warn!(
                    %key,
                    lost = total - delivered,
                    "consumer gone, dropping claimed jobs"
                );
                return Err(Closed);
            }
        }

        Ok(total)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
