//! Error Handling
//!
//! This module provides the error taxonomy for the FIFO pipeline and the JIT
//! emitter using `thiserror`.
//!
//! # Error Categories
//! - **Memory errors**: guest accesses outside of mapped RAM
//! - **Translation errors**: instructions the load/store emitter does not handle
//! - **Configuration errors**: machine geometry rejected at init time
//! - **Protocol desync**: CP and PI disagree on the FIFO write pointer
//! - **Save state errors**: snapshot encode/decode failures
//!
//! None of these are guest-visible. They surface through the host's logging
//! channel or through `Result`s at the application edge.

use thiserror::Error;

/// FIFO pipeline error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FifoError {
    /// Guest memory access outside of RAM.
    #[error("Memory access error: address 0x{address:08X} is not backed by RAM (size 0x{ram_size:08X})")]
    MemoryAccess { address: u32, ram_size: u32 },

    /// Instruction the load/store emitter cannot translate.
    ///
    /// The caller is expected to fall back to the interpreter for it.
    #[error("Unsupported instruction 0x{raw:08X} at 0x{address:08X}")]
    UnsupportedInstruction { address: u32, raw: u32 },

    /// Invalid load/store form (update form with rA = 0 or rA = rD).
    #[error("Invalid instruction form 0x{raw:08X} at 0x{address:08X}: {reason}")]
    InvalidForm {
        address: u32,
        raw: u32,
        reason: &'static str,
    },

    /// Machine configuration rejected at init time.
    #[error("Invalid machine configuration: {message}")]
    InvalidConfig { message: String },

    /// CP and PI write pointers diverged while the FIFO is linked.
    #[error("FIFO desync: CP write pointer 0x{cp_write_pointer:08X}, PI write pointer 0x{pi_write_pointer:08X}")]
    Desync {
        cp_write_pointer: u32,
        pi_write_pointer: u32,
    },

    /// Save state could not be encoded, decoded, or applied.
    #[error("Save state error: {message}")]
    SaveState { message: String },

    /// Host resource (thread, file) could not be acquired.
    #[error("Host resource error: {message}")]
    Host { message: String },

    /// The machine was shut down while an operation was waiting on it.
    #[error("Machine is shut down")]
    Shutdown,
}

impl FifoError {
    /// Create a configuration error.
    #[cold]
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a save state error.
    #[cold]
    pub fn save_state(message: impl Into<String>) -> Self {
        Self::SaveState {
            message: message.into(),
        }
    }
}

pub type FifoResult<T> = Result<T, FifoError>;
