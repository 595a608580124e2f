//! Gather Pipe
//!
//! Staging buffer for CPU stores to the gather-pipe window. Bytes are kept in
//! guest (big-endian) order; once 32 or more are staged the owner pops whole
//! chunks and bursts them into the FIFO ring.
//!
//! # Memory Optimizations
//! - Fixed inline array, no heap allocation
//! - A single `len` cursor; popping slides the remainder down with
//!   `copy_within`

use crate::hardware::fifo::CHUNK_SIZE;

/// Bytes the staging buffer can hold. A flush runs after every append, so
/// at most `CHUNK_SIZE - 1 + 4` bytes are ever staged.
pub const GATHER_PIPE_CAPACITY: usize = 128;

const CHUNK: usize = CHUNK_SIZE as usize;

#[derive(Debug, Clone)]
pub struct GatherPipe {
    buffer: [u8; GATHER_PIPE_CAPACITY],
    len: usize,
}

impl GatherPipe {
    pub fn new() -> Self {
        Self {
            buffer: [0; GATHER_PIPE_CAPACITY],
            len: 0,
        }
    }

    /// Drop staged bytes. Ring pointers are not touched.
    pub fn reset(&mut self) {
        self.len = 0;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A full chunk is staged.
    #[inline]
    pub fn needs_flush(&self) -> bool {
        self.len >= CHUNK
    }

    /// Staged bytes in guest order.
    pub fn staged(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    pub fn write8(&mut self, value: u8) {
        self.push(&[value]);
    }

    pub fn write16(&mut self, value: u16) {
        self.push(&value.to_be_bytes());
    }

    pub fn write32(&mut self, value: u32) {
        self.push(&value.to_be_bytes());
    }

    fn push(&mut self, bytes: &[u8]) {
        let end = self.len + bytes.len();
        if end > GATHER_PIPE_CAPACITY {
            debug_assert!(false, "gather pipe overflow: {} staged bytes", self.len);
            log::error!(
                "gather pipe overflow: dropping {} bytes ({} staged)",
                bytes.len(),
                self.len
            );
            return;
        }
        self.buffer[self.len..end].copy_from_slice(bytes);
        self.len = end;
    }

    /// Take the oldest 32 staged bytes, if that many are present.
    pub fn pop_chunk(&mut self) -> Option<[u8; CHUNK]> {
        if self.len < CHUNK {
            return None;
        }
        let mut chunk = [0u8; CHUNK];
        chunk.copy_from_slice(&self.buffer[..CHUNK]);
        self.buffer.copy_within(CHUNK..self.len, 0);
        self.len -= CHUNK;
        Some(chunk)
    }

    /// Replace the staged bytes (save-state restore).
    pub fn restore(&mut self, bytes: &[u8]) {
        let len = bytes.len().min(GATHER_PIPE_CAPACITY);
        self.buffer[..len].copy_from_slice(&bytes[..len]);
        self.len = len;
    }
}

impl Default for GatherPipe {
    fn default() -> Self {
        Self::new()
    }
}
