use super::serialisable::LineSerialisable;
use crate::error::Error;

/// A command sent by a client to the daemon.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    /// Schedules `key` to become due at `eligible_at` (milliseconds since the
    /// epoch), or immediately if absent. Re-scheduling a key moves it.
    ///
    /// On the wire: `schedule <key> [<eligible-at>]`
    Schedule { key: String, eligible_at: Option<i64> },
    /// Turns the connection into a consumer: from now on the server only
    /// sends `DUE` lines, one per claimed key, until the connection closes.
    ///
    /// On the wire: `watch`
    Watch,
    /// Asks the server to close this connection.
    ///
    /// On the wire: `quit`
    Quit,
}

/// All possible responses sent by the daemon.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Response {
    /// The job was written to the index.
    ///
    /// On the wire: `SCHEDULED`.
    Scheduled,
    /// In response to a `watch`, indicates the connection is now consuming
    /// the named queue.
    ///
    /// On the wire: `WATCHING <queue>`.
    Watching { queue: String },
    /// A key claimed on behalf of a watching connection.
    ///
    /// On the wire: `DUE <key>`.
    Due { key: String },
    /// The request was malformed: a missing or over-long key, a non-number
    /// where a timestamp was expected, or a timestamp out of range.
    ///
    /// On the wire: `BAD_FORMAT`.
    BadFormat,
    /// The request named no known command.
    ///
    /// On the wire: `UNKNOWN_COMMAND`.
    UnknownCommand,
    /// The store failed; the request may be retried.
    ///
    /// On the wire: `INTERNAL_ERROR`.
    InternalError,
}

impl From<&Error> for Response {
    fn from(error: &Error) -> Self {
        match error {
            Error::Validation(_) => Response::BadFormat,
            Error::Store(_) | Error::Configuration(_) => {
                Response::InternalError
            },
        }
    }
}

impl LineSerialisable for Response {
    fn serialise_line(&self) -> Vec<u8> {
        use Response::*;

        match self {
            Scheduled => b"SCHEDULED\r\n".to_vec(),
            Watching { queue } => format!("WATCHING {queue}\r\n").into(),
            Due { key } => format!("DUE {key}\r\n").into(),
            BadFormat => b"BAD_FORMAT\r\n".to_vec(),
            UnknownCommand => b"UNKNOWN_COMMAND\r\n".to_vec(),
            InternalError => b"INTERNAL_ERROR\r\n".to_vec(),
        }
    }
}
