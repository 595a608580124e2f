//! GameCube command pipeline runtime
//!
//! Emulates the path guest rendering commands take from the CPU to the GPU:
//! gather pipe -> FIFO ring -> GPU consumer -> video backend, with the
//! CommandProcessor, PixelEngine and ProcessorInterface register files and
//! the interrupt feedback loop back to the CPU.
//!
//! [`Machine`] owns all of it and implements
//! [`MemoryBus`](gcfifo_core::memory::MemoryBus), so blocks translated by
//! `gcfifo_core::jit` run directly against it.

pub mod config;
pub mod gpu;
pub mod hardware;
pub mod machine;
pub mod save_state;
pub mod scheduler;
pub mod video;

pub use config::{FifoGeometry, MachineConfig};
pub use gpu::{ConsumerState, GpuConsumer, GpuThread};
pub use machine::Machine;
pub use save_state::MachineSnapshot;
pub use scheduler::{EventScheduler, ScheduledEvent, ThreadsafeEventSender};
pub use video::{CommandStreamBackend, FifoChunk, NullBackend, RecordingBackend, VideoBackend};
