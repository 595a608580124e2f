//! Load/store JIT front end: decoder, IR, emitter and reference backend.

pub mod decode;
pub mod emitter;
pub mod exec;
pub mod ir;

pub use decode::{AccessSize, DecodedInstruction, EffectiveAddress, Instruction, MemoryOp};
pub use emitter::{translate_block, IrEmitter};
pub use ir::{InstLoc, IrBlock, IrInst};
