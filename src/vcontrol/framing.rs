//! Prompt-delimited response framing for the vcontrold protocol.
//!
//! vcontrold has no length prefix and no message IDs. A response is complete
//! when the text received so far ends with the prompt token:
//!
//! ```text
//! 23.5\n
//! vctrld>
//! ```
//!
//! The framer accumulates raw chunks exactly as the socket delivers them and
//! tests for the prompt as a literal suffix after every chunk.

use bytes::BytesMut;

/// The prompt token vcontrold sends on accept and after every response.
pub const PROMPT: &str = "vctrld>";

/// Initial buffer capacity; typical responses are a handful of bytes.
const INITIAL_CAPACITY: usize = 64;

/// One logical response unit split out of the accumulated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Frame {
    /// Everything received before the trailing prompt token.
    pub(crate) payload: String,
    /// Whether the accumulated text ended with the prompt token.
    pub(crate) complete: bool,
}

/// Accumulates response chunks for a single pending operation.
///
/// A framer is created per operation and dropped when the operation
/// resolves, so no bytes carry over from one exchange to the next.
#[derive(Debug)]
pub(crate) struct ResponseFramer {
    buffer: BytesMut,
}

impl ResponseFramer {
    /// Create an empty framer.
    pub(crate) fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Append a received chunk and return the frame as it now stands.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Frame {
        self.buffer.extend_from_slice(chunk);
        self.frame()
    }

    /// Split the accumulated text at the trailing prompt token.
    ///
    /// The payload never includes the token. A prompt that appears anywhere
    /// other than the very end does not complete the frame.
    pub(crate) fn frame(&self) -> Frame {
        match self.buffer.strip_suffix(PROMPT.as_bytes()) {
            Some(payload) => Frame {
                payload: String::from_utf8_lossy(payload).into_owned(),
                complete: true,
            },
            None => Frame {
                payload: String::from_utf8_lossy(&self.buffer).into_owned(),
                complete: false,
            },
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_chunk_response() {
        let mut framer = ResponseFramer::new();
        let frame = framer.push(b"23.5vctrld>");

        assert!(frame.complete);
        assert_eq!(frame.payload, "23.5");
    }

    #[test]
    fn test_response_split_across_chunks() {
        let mut framer = ResponseFramer::new();

        let frame = framer.push(b"23.");
        assert!(!frame.complete);
        assert_eq!(frame.payload, "23.");

        let frame = framer.push(b"5\nvctr");
        assert!(!frame.complete);

        let frame = framer.push(b"ld>");
        assert!(frame.complete);
        assert_eq!(frame.payload, "23.5\n");
    }

    #[test]
    fn test_prompt_in_middle_does_not_complete() {
        let mut framer = ResponseFramer::new();
        let frame = framer.push(b"vctrld> more text");

        assert!(!frame.complete);
        assert_eq!(frame.payload, "vctrld> more text");
    }

    #[test]
    fn test_only_final_prompt_is_stripped() {
        let mut framer = ResponseFramer::new();
        let frame = framer.push(b"a vctrld> bvctrld>");

        assert!(frame.complete);
        assert_eq!(frame.payload, "a vctrld> b");
    }

    #[test]
    fn test_bare_prompt_yields_empty_payload() {
        let mut framer = ResponseFramer::new();
        let frame = framer.push(PROMPT.as_bytes());

        assert!(frame.complete);
        assert_eq!(frame.payload, "");
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let mut framer = ResponseFramer::new();
        // A pattern-based matcher could treat these as wildcards.
        let frame = framer.push(b"vctrld?vctrld.");

        assert!(!frame.complete);
        assert_eq!(frame.payload, "vctrld?vctrld.");
    }
}
