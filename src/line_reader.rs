use std::io;

use bytes::{Bytes, BytesMut};
use itertools::Itertools;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Longest line (excluding its CRLF) a [`LineReader`] accepts by default.
pub const DEFAULT_MAX_LINE_LEN: usize = 2048;

/// Reads CRLF-terminated lines from a stream, refusing lines longer than a
/// configured limit.
pub struct LineReader<T: AsyncRead + Unpin> {
    /// Data read in but not yet returned as a line.
    buf: BytesMut,
    /// Offset in buf before which no CRLF can start.
    scanned: usize,
    reader: T,
    max_line_len: usize,
    /// A read error, held back until the lines buffered before it are
    /// returned.
    pending_error: Option<io::Error>,
}

impl<T: AsyncRead + Unpin> LineReader<T> {
    pub fn with_max_line_len(reader: T, max_line_len: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            scanned: 0,
            reader,
            max_line_len,
            pending_error: None,
        }
    }

    /// Returns the next line without its CRLF, or None at end-of-stream
    /// (discarding any unterminated trailing data).
    ///
    /// Cancel-safe: the only await is a `read_buf` into the internal buffer,
    /// so a cancelled call loses nothing.
    ///
    /// A line exceeding the limit yields an `InvalidData` error; the reader
    /// can't resynchronise after that and should be dropped.
    pub async fn read_line(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            if let Some(line) = self.take_buffered_line() {
                if line.len() > self.max_line_len {
                    return Err(self.too_long());
                }
                return Ok(Some(line));
            }

            // Everything buffered is an incomplete line. A trailing \r may
            // still be the start of a CRLF, hence the +1.
            if self.buf.len() > self.max_line_len + 1 {
                return Err(self.too_long());
            }

            let n_bytes_read = match self.reader.read_buf(&mut self.buf).await {
                Ok(n) => n,
                Err(e) => {
                    self.pending_error = Some(e);
                    0
                },
            };

            // Nothing new to scan from: end-of-stream or error.
            if n_bytes_read == 0 {
                return match self.pending_error.take() {
                    Some(e) => Err(e),
                    None => Ok(None),
                };
            }
        }
    }

    fn too_long(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line exceeds {} bytes", self.max_line_len),
        )
    }

    /// Splits the first complete line off the buffer, if there is one.
    fn take_buffered_line(&mut self) -> Option<Bytes> {
        let Some(eol) = self
            .buf
            .iter()
            .skip(self.scanned)
            .tuple_windows::<(_, _)>()
            .position(|x| x == (&b'\r', &b'\n'))
        else {
            // Resume next time from the last byte, which may be a lone \r.
            self.scanned = self.buf.len().saturating_sub(1);
            return None;
        };

        let line = self.buf.split_to(self.scanned + eol + 2).freeze();
        self.scanned = 0;

        Some(line.slice(0..line.len() - 2))
    }
}

impl<T: AsyncRead + Unpin> From<T> for LineReader<T> {
    fn from(value: T) -> Self {
        Self::with_max_line_len(value, DEFAULT_MAX_LINE_LEN)
    }
}
