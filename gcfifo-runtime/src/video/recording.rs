//! Recording backend: keeps every dispatched chunk in a shared log.

use super::{FifoChunk, VideoBackend};
use crate::hardware::pixel_engine::PixelEngineHandle;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared, cloneable view of the chunks a [`RecordingBackend`] received.
#[derive(Debug, Clone, Default)]
pub struct ChunkLog(Arc<Mutex<Vec<FifoChunk>>>);

impl ChunkLog {
    fn lock(&self) -> MutexGuard<'_, Vec<FifoChunk>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the log so far.
    pub fn chunks(&self) -> Vec<FifoChunk> {
        self.lock().clone()
    }

    /// Addresses of the chunks so far.
    pub fn addresses(&self) -> Vec<u32> {
        self.lock().iter().map(|chunk| chunk.address).collect()
    }
}

#[derive(Debug, Default)]
pub struct RecordingBackend {
    log: ChunkLog,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> ChunkLog {
        self.log.clone()
    }
}

impl VideoBackend for RecordingBackend {
    fn consume_fifo_chunk(&mut self, chunk: &FifoChunk, _pixel_engine: &PixelEngineHandle) {
        self.log.lock().push(*chunk);
    }
}
