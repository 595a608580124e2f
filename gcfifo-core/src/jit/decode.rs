//! PowerPC Load/Store Decoder
//!
//! Decodes the subset of the PowerPC instruction set the load/store emitter
//! translates: integer and single-precision loads and stores in D-form and
//! X-form, plus `addi`/`addis`/`ori` so blocks can build addresses.
//!
//! # Decoding Algorithm
//! 1. Extract primary opcode (bits 26-31)
//! 2. For opcode 31 (extended), decode secondary opcode (bits 1-10)
//!
//! Anything outside the subset is reported as
//! [`FifoError::UnsupportedInstruction`] so the caller can fall back to the
//! interpreter for that instruction.

use crate::error::{FifoError, FifoResult};

/// Width of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AccessSize {
    Byte = 1,
    Half = 2,
    Word = 4,
}

impl AccessSize {
    /// Number of bytes moved by this access.
    #[inline]
    pub fn bytes(self) -> u32 {
        self as u32
    }
}

/// Memory operation performed by a load/store instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOp {
    /// `lbz`, `lhz`, `lwz` and their update/indexed forms.
    LoadZero(AccessSize),
    /// `lha`: halfword load, sign-extended.
    LoadAlgebraic,
    /// `lhbrx`, `lwbrx`.
    LoadByteReversed(AccessSize),
    /// `stb`, `sth`, `stw` and their update/indexed forms.
    Store(AccessSize),
    /// `sthbrx`, `stwbrx`.
    StoreByteReversed(AccessSize),
    /// `lfs`: single loaded and widened into an FPR.
    LoadSingle,
    /// `stfs`: FPR narrowed to single and stored.
    StoreSingle,
}

impl MemoryOp {
    pub fn is_store(self) -> bool {
        matches!(
            self,
            MemoryOp::Store(_) | MemoryOp::StoreByteReversed(_) | MemoryOp::StoreSingle
        )
    }

    /// Whether the data register is an FPR.
    pub fn is_float(self) -> bool {
        matches!(self, MemoryOp::LoadSingle | MemoryOp::StoreSingle)
    }
}

/// Effective address computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectiveAddress {
    /// `(rA|0) + d`
    Displacement { ra: u8, offset: i16 },
    /// `(rA|0) + rB`
    Indexed { ra: u8, rb: u8 },
}

impl EffectiveAddress {
    pub fn base(self) -> u8 {
        match self {
            EffectiveAddress::Displacement { ra, .. } | EffectiveAddress::Indexed { ra, .. } => ra,
        }
    }
}

/// Instructions understood by the emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// Load or store. `rd` is the data register (GPR or FPR depending on `op`).
    Memory {
        op: MemoryOp,
        rd: u8,
        ea: EffectiveAddress,
        update: bool,
    },
    /// `addi rD, (rA|0), SIMM`
    AddImmediate { rd: u8, ra: u8, imm: i16 },
    /// `addis rD, (rA|0), SIMM`
    AddImmediateShifted { rd: u8, ra: u8, imm: i16 },
    /// `ori rA, rS, UIMM`
    OrImmediate { ra: u8, rs: u8, imm: u16 },
}

/// Decoded instruction with raw word and address for reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub instruction: Instruction,
    pub raw: u32,
    pub address: u32,
}

#[inline(always)]
fn field_rd(word: u32) -> u8 {
    ((word >> 21) & 0x1F) as u8
}

#[inline(always)]
fn field_ra(word: u32) -> u8 {
    ((word >> 16) & 0x1F) as u8
}

#[inline(always)]
fn field_rb(word: u32) -> u8 {
    ((word >> 11) & 0x1F) as u8
}

impl DecodedInstruction {
    /// Decode a 32-bit instruction word.
    ///
    /// # Errors
    /// - `UnsupportedInstruction` for anything outside the translated subset
    /// - `InvalidForm` for update forms with `rA = 0`, or loads with `rA = rD`
    pub fn decode(word: u32, address: u32) -> FifoResult<Self> {
        let opcode: u32 = (word >> 26) & 0x3F;
        let rd: u8 = field_rd(word);
        let ra: u8 = field_ra(word);
        let simm: i16 = (word & 0xFFFF) as i16;
        let d_form = EffectiveAddress::Displacement { ra, offset: simm };

        let memory = |op: MemoryOp, update: bool, ea: EffectiveAddress| Instruction::Memory {
            op,
            rd,
            ea,
            update,
        };

        let instruction: Instruction = match opcode {
            14 => Instruction::AddImmediate { rd, ra, imm: simm },
            15 => Instruction::AddImmediateShifted { rd, ra, imm: simm },
            24 => Instruction::OrImmediate {
                ra,
                rs: rd,
                imm: (word & 0xFFFF) as u16,
            },
            31 => {
                let ea = EffectiveAddress::Indexed {
                    ra,
                    rb: field_rb(word),
                };
                let (op, update) = match (word >> 1) & 0x3FF {
                    23 => (MemoryOp::LoadZero(AccessSize::Word), false),
                    55 => (MemoryOp::LoadZero(AccessSize::Word), true),
                    87 => (MemoryOp::LoadZero(AccessSize::Byte), false),
                    119 => (MemoryOp::LoadZero(AccessSize::Byte), true),
                    151 => (MemoryOp::Store(AccessSize::Word), false),
                    183 => (MemoryOp::Store(AccessSize::Word), true),
                    215 => (MemoryOp::Store(AccessSize::Byte), false),
                    247 => (MemoryOp::Store(AccessSize::Byte), true),
                    279 => (MemoryOp::LoadZero(AccessSize::Half), false),
                    311 => (MemoryOp::LoadZero(AccessSize::Half), true),
                    343 => (MemoryOp::LoadAlgebraic, false),
                    375 => (MemoryOp::LoadAlgebraic, true),
                    407 => (MemoryOp::Store(AccessSize::Half), false),
                    439 => (MemoryOp::Store(AccessSize::Half), true),
                    534 => (MemoryOp::LoadByteReversed(AccessSize::Word), false),
                    662 => (MemoryOp::StoreByteReversed(AccessSize::Word), false),
                    790 => (MemoryOp::LoadByteReversed(AccessSize::Half), false),
                    918 => (MemoryOp::StoreByteReversed(AccessSize::Half), false),
                    _ => return Err(FifoError::UnsupportedInstruction { address, raw: word }),
                };
                memory(op, update, ea)
            }
            32 => memory(MemoryOp::LoadZero(AccessSize::Word), false, d_form),
            33 => memory(MemoryOp::LoadZero(AccessSize::Word), true, d_form),
            34 => memory(MemoryOp::LoadZero(AccessSize::Byte), false, d_form),
            35 => memory(MemoryOp::LoadZero(AccessSize::Byte), true, d_form),
            36 => memory(MemoryOp::Store(AccessSize::Word), false, d_form),
            37 => memory(MemoryOp::Store(AccessSize::Word), true, d_form),
            38 => memory(MemoryOp::Store(AccessSize::Byte), false, d_form),
            39 => memory(MemoryOp::Store(AccessSize::Byte), true, d_form),
            40 => memory(MemoryOp::LoadZero(AccessSize::Half), false, d_form),
            41 => memory(MemoryOp::LoadZero(AccessSize::Half), true, d_form),
            42 => memory(MemoryOp::LoadAlgebraic, false, d_form),
            43 => memory(MemoryOp::LoadAlgebraic, true, d_form),
            44 => memory(MemoryOp::Store(AccessSize::Half), false, d_form),
            45 => memory(MemoryOp::Store(AccessSize::Half), true, d_form),
            48 => memory(MemoryOp::LoadSingle, false, d_form),
            49 => memory(MemoryOp::LoadSingle, true, d_form),
            52 => memory(MemoryOp::StoreSingle, false, d_form),
            53 => memory(MemoryOp::StoreSingle, true, d_form),
            _ => return Err(FifoError::UnsupportedInstruction { address, raw: word }),
        };

        if let Instruction::Memory { op, rd, ea, update: true } = instruction {
            if ea.base() == 0 {
                return Err(FifoError::InvalidForm {
                    address,
                    raw: word,
                    reason: "update form with rA = 0",
                });
            }
            if !op.is_store() && !op.is_float() && ea.base() == rd {
                return Err(FifoError::InvalidForm {
                    address,
                    raw: word,
                    reason: "load with update where rA = rD",
                });
            }
        }

        Ok(Self {
            instruction,
            raw: word,
            address,
        })
    }
}
