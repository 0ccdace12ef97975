//! implements a parser for the daemon's line protocol.
use std::fmt;

use crate::types::protocol::Command;
use crate::types::serialisable::LineSerialisable;

/// Longest key accepted on the wire, in bytes.
pub const MAX_KEY_LEN: usize = 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParsingError {
    BadFormat,
    UnknownCommand,
}

impl fmt::Display for ParsingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::BadFormat => "bad format",
            Self::UnknownCommand => "unknown command",
        })
    }
}

impl LineSerialisable for ParsingError {
    fn serialise_line(&self) -> Vec<u8> {
        match self {
            ParsingError::BadFormat => b"BAD_FORMAT\r\n".to_vec(),
            ParsingError::UnknownCommand => b"UNKNOWN_COMMAND\r\n".to_vec(),
        }
    }
}

/// Provides a custom, minimal, zero-copy parser of byte slices.
struct ParseState<'a> {
    from: &'a [u8],
}

impl ParseState<'_> {
    fn is_done(&self) -> bool {
        self.from.is_empty()
    }

    /// Asserts there's no more input to take, returning `result` if so, and a
    /// `BadFormat` error otherwise.
    fn expect_done_and<R>(&self, result: R) -> Result<R, ParsingError> {
        if self.is_done() {
            Ok(result)
        } else {
            Err(ParsingError::BadFormat)
        }
    }

    /// Consumes from the input, expecting a token of non-zero length.
    fn expect_next_token(&mut self) -> Result<&[u8], ParsingError> {
        match self.next_token() {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(ParsingError::BadFormat),
        }
    }

    /// Consumes from the input, expecting a space then an optionally signed
    /// decimal i64.
    fn expect_next_i64(&mut self) -> Result<i64, ParsingError> {
        self.expect_space()?;

        let token = self.expect_next_token()?;
        let (negative, digits) = match token {
            [b'-', rest @ ..] => (true, rest),
            _ => (false, token),
        };
        if digits.is_empty() {
            return Err(ParsingError::BadFormat);
        }

        // Accumulate towards the sign so i64::MIN parses.
        let mut r = 0i64;
        for v in digits {
            let digit = match v {
                b'0'..=b'9' => (*v - b'0') as i64,
                _ => return Err(ParsingError::BadFormat),
            };
            r = r.checked_mul(10).ok_or(ParsingError::BadFormat)?;
            r = if negative {
                r.checked_sub(digit)
            } else {
                r.checked_add(digit)
            }
            .ok_or(ParsingError::BadFormat)?;
        }

        Ok(r)
    }

    /// Consumes from the input, expecting a space then a job key: any
    /// non-empty UTF-8 token free of control characters.
    fn expect_next_key(&mut self) -> Result<String, ParsingError> {
        self.expect_space()?;

        let token = self.expect_next_token()?;
        if token.len() > MAX_KEY_LEN || token.iter().any(u8::is_ascii_control) {
            return Err(ParsingError::BadFormat);
        }

        String::from_utf8(token.to_vec()).map_err(|_| ParsingError::BadFormat)
    }

    /// Consumes a space.
    fn expect_space(&mut self) -> Result<(), ParsingError> {
        match self.from.first() {
            Some(b' ') => {
                self.from = &self.from[1..];
                Ok(())
            },
            _ => Err(ParsingError::BadFormat),
        }
    }

    /// Consumes from this ParseState until reaching a space byte or the end of
    /// the input. It returns None at the end of the input. On consecutive space
    /// bytes, it returns a zero-length slice.
    fn next_token(&mut self) -> Option<&[u8]> {
        if self.is_done() {
            return None;
        }

        let idx = self
            .from
            .iter()
            .position(|c| *c == b' ')
            .unwrap_or(self.from.len());

        let token = &self.from[..idx];
        self.from = &self.from[idx..];

        Some(token)
    }
}

impl<'a> From<&'a [u8]> for ParseState<'a> {
    fn from(from: &'a [u8]) -> Self {
        ParseState { from }
    }
}

// Parsing is implemented to fulfil the TryFrom trait.
impl TryFrom<&[u8]> for Command {
    type Error = ParsingError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        use Command::*;

        let mut ps: ParseState = value.into();

        let cmd = match ps.expect_next_token()? {
            // <cmd>
            b"quit" => Quit,
            b"watch" => Watch,

            // <cmd> <key> [<eligible-at>]
            b"schedule" => Schedule {
                key: ps.expect_next_key()?,
                eligible_at: if ps.is_done() {
                    None
                } else {
                    Some(ps.expect_next_i64()?)
                },
            },

            _ => return Err(ParsingError::UnknownCommand),
        };

        ps.expect_done_and(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        use Command::*;
        use ParsingError::*;

        // Asserts the line parses into the given command successfully.
        #[track_caller]
        fn ok(line: &[u8], res: Command) {
            assert_eq!(line.try_into(), Ok(res));
        }

        // Asserts the line fails to parse with a BadFormat error.
        #[track_caller]
        fn bf(line: &[u8]) {
            assert_eq!(TryInto::<Command>::try_into(line), Err(BadFormat));
        }

        // Asserts the line fails to parse with an UnknownCommand error.
        #[track_caller]
        fn uc(line: &[u8]) {
            assert_eq!(TryInto::<Command>::try_into(line), Err(UnknownCommand));
        }

        fn schedule(key: &str, eligible_at: Option<i64>) -> Command {
            Schedule {
                key: key.into(),
                eligible_at,
            }
        }

        let key_max: String = "k".repeat(MAX_KEY_LEN);
        let key_too_long: String = "k".repeat(MAX_KEY_LEN + 1);

        // Check silly non-commands
        bf(b"");
        bf(b" ");
        uc(b"put 0 0 0 5");
        uc(b"SCHEDULE a");

        ok(b"quit", Quit);
        bf(b"quit ");
        ok(b"watch", Watch);
        bf(b"watch default");

        // Check schedule with and without a timestamp.
        ok(b"schedule job:1", schedule("job:1", None));
        ok(b"schedule 1 0", schedule("1", Some(0)));
        ok(
            b"schedule report-7 1700000000000",
            schedule("report-7", Some(1_700_000_000_000)),
        );
        ok(b"schedule k -250", schedule("k", Some(-250)));
        ok(
            format!("schedule k {}", i64::MIN).as_bytes(),
            schedule("k", Some(i64::MIN)),
        );
        ok(
            format!("schedule k {}", i64::MAX).as_bytes(),
            schedule("k", Some(i64::MAX)),
        );
        ok("schedule ключ 5".as_bytes(), schedule("ключ", Some(5)));

        bf(b"schedule");
        bf(b"schedule ");
        bf(b"schedule  5");
        bf(b"schedule k ");
        bf(b"schedule k 5 6");
        bf(b"schedule k -");
        bf(b"schedule k 12a");
        bf(b"schedule k +5");
        bf(format!("schedule k {}0", i64::MAX).as_bytes());
        bf(b"schedule k\t1");
        bf(b"schedule \xff\xfe");

        ok(
            format!("schedule {key_max}").as_bytes(),
            schedule(&key_max, None),
        );
        bf(format!("schedule {key_too_long}").as_bytes());
    }

    #[test]
    fn test_serialise_error() {
        assert_eq!(ParsingError::BadFormat.serialise_line(), b"BAD_FORMAT\r\n");
        assert_eq!(ParsingError::UnknownCommand.to_string(), "unknown command");
    }
}
