/// Types implementing LineSerialisable can be sent to clients as one
/// CRLF-terminated protocol line.
pub trait LineSerialisable {
    /// Converts the value in question to a protocol line, CRLF included.
    fn serialise_line(&self) -> Vec<u8>;
}
