//! A delayed-job dispatch queue.
//!
//! Producers schedule an opaque key to become eligible at a timestamp; any
//! number of consumers sharing a queue name poll a shared ordered index and
//! atomically claim the keys that are due, so each due key reaches exactly one
//! consumer.
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod line_reader;
pub mod parser;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod util;

pub use config::Config;
pub use error::{ConfigurationError, Error, StoreError, ValidationError};
pub use queue::WorkQueue;
pub use scheduler::Scheduler;
pub use store::{EligibilityIndex, MemoryIndex};
pub use types::job::{Job, ScheduleRequest};
