use std::collections::VecDeque;

/// A contiguous buffer of pending input bytes.
///
/// Chunks normally come from fixed-size reads of the input file, but they can
/// also be synthesized mid-stream to re-inject bytes that were consumed for
/// lookahead and must be re-read under a different parser state.
struct Chunk {
    bytes: Vec<u8>,
    pos: usize,
}

impl Chunk {
    fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, pos: 0 }
    }

    fn is_exhausted(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}

/// An ordered queue of chunks exposing a single logical byte cursor over
/// their concatenation.
///
/// `push_front` places bytes ahead of everything not yet consumed, so a
/// failed speculative match can hand its buffered bytes back to be re-scanned
/// in order. The running `offset` counts bytes consumed from the original
/// stream; re-injection rewinds it so re-consumed bytes are counted once.
#[derive(Default)]
pub struct ChunkBuffer {
    chunks: VecDeque<Chunk>,
    offset: u64,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly read input at the tail of the queue.
    pub fn push_back(&mut self, bytes: Vec<u8>) {
        if !bytes.is_empty() {
            self.chunks.push_back(Chunk::new(bytes));
        }
    }

    /// Re-inject bytes at the head of the queue, ahead of all unconsumed
    /// input. Byte order is preserved: the first byte of `bytes` is the next
    /// byte read.
    pub fn push_front(&mut self, bytes: Vec<u8>) {
        if !bytes.is_empty() {
            self.offset -= bytes.len() as u64;
            self.chunks.push_front(Chunk::new(bytes));
        }
    }

    /// The current logical head byte, if any input remains.
    pub fn peek_byte(&mut self) -> Option<u8> {
        loop {
            let chunk = self.chunks.front()?;
            if chunk.is_exhausted() {
                self.chunks.pop_front();
                continue;
            }
            return Some(chunk.bytes[chunk.pos]);
        }
    }

    /// Consume one byte. Exhausted chunks are dropped lazily by `peek_byte`.
    pub fn advance(&mut self) {
        if let Some(chunk) = self.chunks.front_mut() {
            if !chunk.is_exhausted() {
                chunk.pos += 1;
                self.offset += 1;
            }
        }
    }

    /// Bytes consumed from the original stream so far. Used for error
    /// diagnostics.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(buf: &mut ChunkBuffer) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(b) = buf.peek_byte() {
            out.push(b);
            buf.advance();
        }
        out
    }

    #[test]
    fn test_sequential_consumption_across_chunks() {
        let mut buf = ChunkBuffer::new();
        buf.push_back(b"abc".to_vec());
        buf.push_back(b"def".to_vec());

        assert_eq!(drain(&mut buf), b"abcdef");
        assert_eq!(buf.offset(), 6);
        assert!(buf.peek_byte().is_none());
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut buf = ChunkBuffer::new();
        buf.push_back(b"xy".to_vec());

        assert_eq!(buf.peek_byte(), Some(b'x'));
        assert_eq!(buf.peek_byte(), Some(b'x'));
        buf.advance();
        assert_eq!(buf.peek_byte(), Some(b'y'));
    }

    #[test]
    fn test_push_front_reinjects_ahead_of_pending_input() {
        let mut buf = ChunkBuffer::new();
        buf.push_back(b"world".to_vec());

        // Consume two bytes, then give them back.
        buf.advance();
        buf.advance();
        assert_eq!(buf.offset(), 2);
        buf.push_front(b"wo".to_vec());
        assert_eq!(buf.offset(), 0);

        assert_eq!(drain(&mut buf), b"world");
        assert_eq!(buf.offset(), 5);
    }

    #[test]
    fn test_push_front_mid_chunk() {
        let mut buf = ChunkBuffer::new();
        buf.push_back(b"abc".to_vec());
        buf.advance();
        buf.push_front(b"XY".to_vec());

        assert_eq!(drain(&mut buf), b"XYbc");
    }

    #[test]
    fn test_empty_chunks_ignored() {
        let mut buf = ChunkBuffer::new();
        buf.push_back(Vec::new());
        buf.push_front(Vec::new());
        assert!(buf.peek_byte().is_none());
        assert_eq!(buf.offset(), 0);
    }
}
