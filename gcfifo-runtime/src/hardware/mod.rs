//! Flipper Hardware Units
//!
//! Register-level emulation of the units on the CPU -> GPU command path,
//! plus the physical memory map used to route guest accesses to them.

pub mod command_processor;
pub mod fifo;
pub mod gather_pipe;
pub mod pixel_engine;
pub mod processor_interface;

pub use command_processor::{CommandProcessor, CpControl, CpStatus};
pub use fifo::{FifoRegisters, FifoRingBuffer, CHUNK_SIZE};
pub use gather_pipe::GatherPipe;
pub use pixel_engine::{PeControl, PixelEngine, PixelEngineHandle};
pub use processor_interface::{InterruptCause, ProcessorInterface};

/// Physical memory map constants.
pub mod memory_map {
    /// Register window size of every hardware unit.
    pub const REGISTER_WINDOW_SIZE: u32 = 0x1000;
    /// CommandProcessor registers.
    pub const COMMAND_PROCESSOR_BASE: u32 = 0x0C00_0000;
    /// PixelEngine registers.
    pub const PIXEL_ENGINE_BASE: u32 = 0x0C00_1000;
    /// ProcessorInterface registers.
    pub const PROCESSOR_INTERFACE_BASE: u32 = 0x0C00_3000;
    /// Gather pipe write window.
    pub use gcfifo_core::memory::GATHER_PIPE_ADDRESS as GATHER_PIPE_BASE;
}

/// Hardware unit behind an MMIO address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    CommandProcessor,
    PixelEngine,
    ProcessorInterface,
}

/// Decode a physical address into a device and register offset.
pub fn decode_mmio(physical: u32) -> Option<(Device, u32)> {
    use memory_map::*;
    let window = physical & !(REGISTER_WINDOW_SIZE - 1);
    let offset = physical & (REGISTER_WINDOW_SIZE - 1);
    let device = match window {
        COMMAND_PROCESSOR_BASE => Device::CommandProcessor,
        PIXEL_ENGINE_BASE => Device::PixelEngine,
        PROCESSOR_INTERFACE_BASE => Device::ProcessorInterface,
        _ => return None,
    };
    Some((device, offset))
}
