//! Error types shared by the scheduler, the stores, and the queue adapter.
use thiserror::Error;

/// Any failure surfaced by a queue operation.
///
/// All variants are `Clone` so the same error can be returned to the caller
/// and published on a queue's error channel.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    #[error("invalid schedule request: {0}")]
    Validation(#[from] ValidationError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

/// A schedule request that was rejected before reaching the index.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum ValidationError {
    #[error("job key is missing")]
    MissingKey,

    #[error("job key is empty")]
    EmptyKey,

    #[error("eligibility time {0} cannot be stored as an exact score")]
    ScoreOutOfRange(i64),
}

/// A failure talking to, or reported by, the eligibility index.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("command error: {0}")]
    Command(String),

    /// The store answered, but not with the shape the claim protocol expects.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

/// An unusable configuration or store collaborator.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigurationError {
    #[error("queue name must not be empty")]
    EmptyQueueName,

    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,

    #[error("unable to read configuration: {0}")]
    Read(String),

    #[error("unable to set up store: {0}")]
    Store(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(error: redis::RedisError) -> Self {
        if error.is_io_error()
            || error.is_connection_dropped()
            || error.is_connection_refusal()
            || error.is_timeout()
        {
            StoreError::Connection(error.to_string())
        } else {
            StoreError::Command(error.to_string())
        }
    }
}
