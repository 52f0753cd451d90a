//! Bounded append-only buffer for encoded capture fragments.
//!
//! Fragments are kept in arrival order.  Unlike a ring buffer, nothing is
//! ever overwritten: once the byte budget is spent further pushes are
//! rejected and the fragments already held stay intact.  The whole sequence
//! is handed out exactly once by [`ChunkBuffer::drain`].
//!
//! # Example
//!
//! ```rust
//! use voice_mixdown::audio::ChunkBuffer;
//!
//! let mut buf = ChunkBuffer::new(8);
//! buf.push(vec![1, 2, 3]).unwrap();
//! buf.push(vec![4, 5]).unwrap();
//! assert!(buf.push(vec![6, 7, 8, 9]).is_err()); // would exceed 8 bytes
//! assert_eq!(buf.drain(), vec![vec![1, 2, 3], vec![4, 5]]);
//! assert!(buf.is_empty());
//! ```

use thiserror::Error;

/// Returned when a fragment does not fit in the remaining budget.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("capture buffer full: {held} of {max} bytes held, fragment of {fragment} bytes rejected")]
pub struct BufferFull {
    pub held: usize,
    pub max: usize,
    pub fragment: usize,
}

/// Ordered, size-bounded sequence of byte fragments.
#[derive(Debug)]
pub struct ChunkBuffer {
    chunks: Vec<Vec<u8>>,
    byte_len: usize,
    max_bytes: usize,
}

impl ChunkBuffer {
    /// Create an empty buffer that holds at most `max_bytes` bytes.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            chunks: Vec::new(),
            byte_len: 0,
            max_bytes,
        }
    }

    /// Append `fragment`.  Empty fragments are ignored.
    pub fn push(&mut self, fragment: Vec<u8>) -> Result<(), BufferFull> {
        if fragment.is_empty() {
            return Ok(());
        }
        if self.byte_len + fragment.len() > self.max_bytes {
            return Err(BufferFull {
                held: self.byte_len,
                max: self.max_bytes,
                fragment: fragment.len(),
            });
        }
        self.byte_len += fragment.len();
        self.chunks.push(fragment);
        Ok(())
    }

    /// Take every fragment in arrival order, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        self.byte_len = 0;
        std::mem::take(&mut self.chunks)
    }

    /// Drop every fragment.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.byte_len = 0;
    }

    /// Number of fragments held.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total bytes held across all fragments.
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
