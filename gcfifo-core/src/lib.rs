//! Core building blocks shared by the FIFO runtime: guest memory, the CPU
//! context seen by translated code, the load/store JIT front end, and the
//! error taxonomy.

pub mod context;
pub mod error;
pub mod jit;
pub mod memory;

pub use context::CpuContext;
pub use error::{FifoError, FifoResult};
pub use memory::{MemoryBus, Ram};
