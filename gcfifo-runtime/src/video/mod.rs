//! Video Backends
//!
//! The GPU consumer hands every 32-byte FIFO chunk, in ring order, to a
//! [`VideoBackend`]. The backend owns whatever interpretation of the command
//! bytes it needs; the only feedback path into the machine is the
//! [`PixelEngineHandle`] it is given with each chunk.

pub mod command_stream;
pub mod recording;

pub use command_stream::{CommandStats, CommandStreamBackend};
pub use recording::{ChunkLog, RecordingBackend};

use crate::hardware::fifo::CHUNK_SIZE;
use crate::hardware::pixel_engine::PixelEngineHandle;
use gcfifo_core::error::FifoResult;

/// One FIFO command chunk, copied out of guest RAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoChunk {
    /// Physical address the chunk was read from.
    pub address: u32,
    pub data: [u8; CHUNK_SIZE as usize],
}

/// Consumer of the command stream.
///
/// Runs on whichever thread drives the GPU consumer, hence `Send`.
pub trait VideoBackend: Send {
    fn initialize(&mut self) -> FifoResult<()> {
        Ok(())
    }

    fn consume_fifo_chunk(&mut self, chunk: &FifoChunk, pixel_engine: &PixelEngineHandle);

    fn shutdown(&mut self) {}
}

/// Discards every chunk.
#[derive(Debug, Default)]
pub struct NullBackend;

impl VideoBackend for NullBackend {
    fn consume_fifo_chunk(&mut self, chunk: &FifoChunk, _pixel_engine: &PixelEngineHandle) {
        log::trace!("null backend: dropping chunk at 0x{:08X}", chunk.address);
    }
}
