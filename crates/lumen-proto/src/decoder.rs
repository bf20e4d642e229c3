//! Newline frame reassembly.

use crate::errors::Result;
use crate::response::Response;

/// Reassembles an unbounded stream of byte chunks into discrete decoded
/// [`Response`] frames.
///
/// The processor terminates every frame with `\r\n` or `\n`. Chunk
/// boundaries carry no meaning: a frame may arrive split across many
/// chunks, or many frames may arrive in one chunk. The trailing
/// incomplete fragment of each chunk is retained as carry-over for the
/// next call.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    carry: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and decode every line it completes, in arrival
    /// order. A chunk with no terminator yields zero frames.
    ///
    /// Each completed line decodes independently; a malformed line yields
    /// an `Err` element without poisoning the rest of the stream.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<Response>> {
        self.carry.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.carry.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim_end_matches(['\n', '\r']).trim();
            if trimmed.is_empty() {
                continue;
            }
            frames.push(Response::from_line(trimmed));
        }
        frames
    }

    /// Bytes currently held as carry-over.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}
