//! C1: turns a raw byte stream into CRLF-terminated lines.
//!
//! The framer buffers whatever partial line is left over at a chunk
//! boundary. It makes no attempt to interpret line content; that's
//! `message::MessageAssembler`'s job.

/// Splits arbitrary byte chunks into lines on a CRLF boundary, carrying a
/// partial trailing line across calls.
#[derive(Debug, Default)]
pub struct LineFramer {
    tail: String,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of bytes, returning every complete line it produced
    /// (without the trailing CRLF). Invalid UTF-8 is replaced lossily —
    /// the control protocol is ASCII/UTF-8 text.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.tail.push_str(&String::from_utf8_lossy(chunk));

        let mut lines: Vec<String> = self.tail.split("\r\n").map(str::to_string).collect();
        // The last element is whatever comes after the final CRLF in the
        // buffer — it may be empty (buffer ended exactly on a CRLF) or a
        // partial line still awaiting its terminator. Either way it becomes
        // the new tail and is not emitted.
        self.tail = lines.pop().unwrap_or_default();
        lines
    }
}
