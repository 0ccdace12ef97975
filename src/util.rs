use std::ascii;
use std::time::{SystemTime, UNIX_EPOCH};

/// Escapes arbitrary bytes into printable ASCII for logging.
pub fn bytes_to_human_str(input: &[u8]) -> String {
    input
        .iter()
        .flat_map(|&c| ascii::escape_default(c))
        .map(char::from)
        .collect()
}

/// Milliseconds since the Unix epoch, the unit of every score in the index.
pub fn now_millis() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis().try_into().unwrap_or(i64::MAX),
        // A clock before the epoch: count backwards.
        Err(error) => {
            let behind: i64 =
                error.duration().as_millis().try_into().unwrap_or(i64::MAX);
            -behind
        },
    }
}
