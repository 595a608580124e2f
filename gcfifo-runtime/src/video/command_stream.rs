//! GX Command Stream Scanner
//!
//! Walks the GX opcode stream across chunk boundaries far enough to find
//! BP register loads, and forwards the draw-done and token BP writes to the
//! PixelEngine. Commands are variable length, so incomplete commands at the
//! end of a chunk are carried over to the next one.
//!
//! Primitive draws need vertex format state to size them. They are counted
//! as unknown and the scanner drops the rest of the chunk, picking up again
//! at the next chunk boundary.

use super::{FifoChunk, VideoBackend};
use crate::hardware::pixel_engine::PixelEngineHandle;
use serde::Serialize;
use smallvec::SmallVec;
use std::sync::{Arc, Mutex, PoisonError};

/// GX command opcodes the scanner can size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GxOpcode {
    Nop = 0x00,
    LoadCpReg = 0x08,
    LoadXfReg = 0x10,
    LoadIndexedA = 0x20,
    LoadIndexedB = 0x28,
    LoadIndexedC = 0x30,
    LoadIndexedD = 0x38,
    CallDisplayList = 0x40,
    InvalidateVertexCache = 0x48,
    LoadBpReg = 0x61,
}

impl GxOpcode {
    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => Self::Nop,
            0x08 => Self::LoadCpReg,
            0x10 => Self::LoadXfReg,
            0x20 => Self::LoadIndexedA,
            0x28 => Self::LoadIndexedB,
            0x30 => Self::LoadIndexedC,
            0x38 => Self::LoadIndexedD,
            0x40 => Self::CallDisplayList,
            0x48 => Self::InvalidateVertexCache,
            0x61 => Self::LoadBpReg,
            _ => return None,
        })
    }

    /// Bytes needed before the command length is known.
    fn header_len(self) -> usize {
        match self {
            Self::LoadXfReg => 5,
            _ => 1,
        }
    }

    /// Total command length; `bytes` holds at least `header_len()` bytes.
    fn command_len(self, bytes: &[u8]) -> usize {
        match self {
            Self::Nop | Self::InvalidateVertexCache => 1,
            Self::LoadCpReg => 6,
            Self::LoadXfReg => {
                let count = (bytes[2] & 0x0F) as usize + 1;
                5 + 4 * count
            }
            Self::LoadIndexedA | Self::LoadIndexedB | Self::LoadIndexedC | Self::LoadIndexedD => 5,
            Self::CallDisplayList => 9,
            Self::LoadBpReg => 5,
        }
    }
}

/// BP registers forwarded to the PixelEngine.
mod bp {
    pub const DRAW_DONE: u8 = 0x45;
    pub const TOKEN: u8 = 0x47;
    pub const TOKEN_INTERRUPT: u8 = 0x48;
}

/// Counters kept by the scanner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommandStats {
    pub chunks: u64,
    pub commands: u64,
    pub bp_writes: u64,
    pub tokens: u64,
    pub finishes: u64,
    pub unknown: u64,
}

#[derive(Debug, Default)]
pub struct CommandStreamBackend {
    pending: SmallVec<[u8; 64]>,
    stats: Arc<Mutex<CommandStats>>,
}

impl CommandStreamBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared counters; stays readable after the backend moved to the GPU thread.
    pub fn stats(&self) -> Arc<Mutex<CommandStats>> {
        Arc::clone(&self.stats)
    }

    fn scan(&mut self, pixel_engine: &PixelEngineHandle, stats: &mut CommandStats) {
        let mut pos = 0;
        while pos < self.pending.len() {
            let bytes = &self.pending[pos..];
            let Some(opcode) = GxOpcode::from_u8(bytes[0]) else {
                log::debug!("GX: cannot size opcode 0x{:02X}, skipping to next chunk", bytes[0]);
                stats.unknown += 1;
                self.pending.clear();
                return;
            };
            if bytes.len() < opcode.header_len() {
                break;
            }
            let len = opcode.command_len(bytes);
            if bytes.len() < len {
                break;
            }
            if opcode == GxOpcode::LoadBpReg {
                Self::load_bp(&bytes[1..5], pixel_engine, stats);
            }
            stats.commands += 1;
            pos += len;
        }
        self.pending.drain(..pos);
    }

    fn load_bp(word: &[u8], pixel_engine: &PixelEngineHandle, stats: &mut CommandStats) {
        let register = word[0];
        let value = u32::from_be_bytes([0, word[1], word[2], word[3]]);
        stats.bp_writes += 1;
        match register {
            bp::DRAW_DONE => {
                stats.finishes += 1;
                pixel_engine.set_finish();
            }
            bp::TOKEN => {
                stats.tokens += 1;
                pixel_engine.set_token(value as u16, false);
            }
            bp::TOKEN_INTERRUPT => {
                stats.tokens += 1;
                pixel_engine.set_token(value as u16, true);
            }
            _ => {}
        }
    }
}

impl VideoBackend for CommandStreamBackend {
    fn consume_fifo_chunk(&mut self, chunk: &FifoChunk, pixel_engine: &PixelEngineHandle) {
        self.pending.extend_from_slice(&chunk.data);
        let stats = Arc::clone(&self.stats);
        let mut stats = stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.chunks += 1;
        self.scan(pixel_engine, &mut stats);
    }

    fn shutdown(&mut self) {
        if !self.pending.is_empty() {
            log::debug!("GX: {} bytes of partial command dropped", self.pending.len());
        }
        self.pending.clear();
    }
}
