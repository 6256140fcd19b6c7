//! Message framing over the backend byte stream.
//!
//! The backend speaks a plain TCP stream in which discrete messages are
//! separated by a single `\n` byte.  TCP delivers that stream in arbitrarily
//! sized, arbitrarily cut chunks: one `read()` may return half a message,
//! or three messages and the first byte of a fourth.  The WebSocket side, by
//! contrast, exchanges discrete frames.  This module is the translation
//! between the two worlds, in both directions:
//!
//! - **Backend → client**: [`FrameReassembler`] re-segments the chunk stream
//!   at every delimiter, carrying the unterminated tail across reads.
//! - **Client → backend**: [`delimit_message`] guarantees each client
//!   message is written with exactly one trailing delimiter.
//!
//! Both directions are pure byte transforms — no content validation, no
//! size limits, no character-set assumptions beyond the delimiter byte.

/// The byte that separates messages on the backend stream.
pub const DELIMITER: u8 = b'\n';

// ── Backend → client: re-segmentation ─────────────────────────────────────────

/// Converts an arbitrarily chunked backend byte stream into a sequence of
/// complete, delimiter-free messages.
///
/// One reassembler exists per session and is owned exclusively by that
/// session's backend read loop.  The residual tail holds the bytes after
/// the last delimiter seen so far; it never itself contains a delimiter.
///
/// # Example
///
/// ```
/// use ws_tcp_bridge::application::FrameReassembler;
///
/// let mut r = FrameReassembler::new();
/// assert_eq!(r.push(b"alpha\nbe"), vec![b"alpha".to_vec()]);
/// assert_eq!(r.push(b"ta\n"), vec![b"beta".to_vec()]);
/// assert_eq!(r.finish(), None);
/// ```
#[derive(Debug, Default)]
pub struct FrameReassembler {
    /// Bytes after the last delimiter, waiting for the rest of the message.
    tail: Vec<u8>,
}

impl FrameReassembler {
    /// Creates a reassembler with an empty tail.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one received chunk and returns every message it completes.
    ///
    /// The chunk is appended to the residual tail, the combined buffer is
    /// split at every delimiter, and the final (possibly empty, possibly
    /// incomplete) segment becomes the new tail.  Empty segments — produced
    /// by adjacent delimiters or a delimiter at the very start — carry no
    /// information and are dropped.  Messages are returned in stream order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut buf = std::mem::take(&mut self.tail);
        buf.extend_from_slice(chunk);

        let mut messages = Vec::new();
        let mut start = 0;
        for (i, &b) in buf.iter().enumerate() {
            if b == DELIMITER {
                if i > start {
                    messages.push(buf[start..i].to_vec());
                }
                start = i + 1;
            }
        }

        // Everything after the last delimiter is the new tail.
        self.tail = buf.split_off(start);
        messages
    }

    /// Flushes the residual tail at backend end-of-stream.
    ///
    /// Returns the tail as one final message if it is non-empty, so a last
    /// message the backend never delimiter-terminated is not lost.  After
    /// this call the tail is empty.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.tail.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.tail))
        }
    }

    /// Number of bytes currently buffered in the residual tail.
    pub fn tail_len(&self) -> usize {
        self.tail.len()
    }
}

// ── Client → backend: delimiter termination ───────────────────────────────────

/// Prepares one client message for writing to the backend stream.
///
/// Returns the payload terminated by exactly one delimiter: unchanged if it
/// already ends with one, otherwise with a single delimiter appended.  An
/// empty message becomes a single delimiter byte.  The caller writes the
/// returned buffer in one `write_all` so each client message is one logical
/// backend write.
pub fn delimit_message(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.extend_from_slice(payload);
    if out.last() != Some(&DELIMITER) {
        out.push(DELIMITER);
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
