//! IR Emitter - Converts PowerPC Load/Store Instructions to IR
//!
//! # Conversion Strategy
//! For each load/store variant (D-form or X-form; 8/16/32-bit; optional
//! base-register update):
//! 1. Read the data register (stores) so an update of the same register
//!    cannot leak into the stored value
//! 2. Compute the effective address (constant, or register + constant/register via `Add`)
//! 3. Store the effective address back to `rA` for update forms
//! 4. Emit the sized `Load*`/`Store*` node on that address
//!
//! Every memory access goes through the same node kinds; the backend's
//! memory bus is the single place that tells RAM, MMIO and the gather pipe
//! apart.
//!
//! # Local Optimizations
//! - Constant folding of `Add`/`Or` on immediates
//! - Register value forwarding: a GPR read after a write in the same block
//!   reuses the written node instead of emitting a new `LoadGReg`
//! - Constant gather-pipe stores are counted in `IrBlock::fifo_bytes`

use crate::error::FifoResult;
use crate::jit::decode::{AccessSize, DecodedInstruction, EffectiveAddress, Instruction, MemoryOp};
use crate::jit::ir::{InstLoc, IrBlock, IrInst};
use crate::memory::is_gather_pipe;

/// Builds one [`IrBlock`].
pub struct IrEmitter {
    block: IrBlock,
    gpr_values: [Option<InstLoc>; 32],
    fpr_values: [Option<InstLoc>; 32],
}

impl IrEmitter {
    pub fn new(guest_address: u32) -> Self {
        Self {
            block: IrBlock::new(guest_address),
            gpr_values: [None; 32],
            fpr_values: [None; 32],
        }
    }

    pub fn emit_imm32(&mut self, value: u32) -> InstLoc {
        self.block.push(IrInst::Imm32(value))
    }

    pub fn emit_load_greg(&mut self, reg: u8) -> InstLoc {
        let slot = reg as usize & 31;
        if let Some(loc) = self.gpr_values[slot] {
            return loc;
        }
        let loc = self.block.push(IrInst::LoadGReg(reg));
        self.gpr_values[slot] = Some(loc);
        loc
    }

    pub fn emit_store_greg(&mut self, value: InstLoc, reg: u8) {
        self.block.push(IrInst::StoreGReg { value, reg });
        self.gpr_values[reg as usize & 31] = Some(value);
    }

    pub fn emit_load_freg(&mut self, reg: u8) -> InstLoc {
        let slot = reg as usize & 31;
        if let Some(loc) = self.fpr_values[slot] {
            return loc;
        }
        let loc = self.block.push(IrInst::LoadFReg(reg));
        self.fpr_values[slot] = Some(loc);
        loc
    }

    pub fn emit_store_freg(&mut self, value: InstLoc, reg: u8) {
        self.block.push(IrInst::StoreFReg { value, reg });
        self.fpr_values[reg as usize & 31] = Some(value);
    }

    pub fn emit_add(&mut self, a: InstLoc, b: InstLoc) -> InstLoc {
        match (self.block.imm_value(a), self.block.imm_value(b)) {
            (Some(x), Some(y)) => self.emit_imm32(x.wrapping_add(y)),
            (_, Some(0)) => a,
            (Some(0), _) => b,
            _ => self.block.push(IrInst::Add(a, b)),
        }
    }

    pub fn emit_or(&mut self, a: InstLoc, b: InstLoc) -> InstLoc {
        match (self.block.imm_value(a), self.block.imm_value(b)) {
            (Some(x), Some(y)) => self.emit_imm32(x | y),
            (_, Some(0)) => a,
            (Some(0), _) => b,
            _ => self.block.push(IrInst::Or(a, b)),
        }
    }

    /// `(rA|0)`: register 0 reads as literal zero in address computations.
    fn emit_base_or_zero(&mut self, ra: u8) -> InstLoc {
        if ra == 0 {
            self.emit_imm32(0)
        } else {
            self.emit_load_greg(ra)
        }
    }

    pub fn emit_effective_address(&mut self, ea: EffectiveAddress) -> InstLoc {
        match ea {
            EffectiveAddress::Displacement { ra, offset } => {
                let base = self.emit_base_or_zero(ra);
                let offset = self.emit_imm32(offset as i32 as u32);
                self.emit_add(base, offset)
            }
            EffectiveAddress::Indexed { ra, rb } => {
                let index = self.emit_load_greg(rb);
                let base = self.emit_base_or_zero(ra);
                self.emit_add(base, index)
            }
        }
    }

    pub fn emit_load(&mut self, size: AccessSize, addr: InstLoc) -> InstLoc {
        let inst = match size {
            AccessSize::Byte => IrInst::Load8 { addr },
            AccessSize::Half => IrInst::Load16 { addr },
            AccessSize::Word => IrInst::Load32 { addr },
        };
        self.block.push(inst)
    }

    pub fn emit_store(&mut self, size: AccessSize, value: InstLoc, addr: InstLoc) {
        if let Some(address) = self.block.imm_value(addr) {
            if is_gather_pipe(address) {
                self.block.fifo_bytes += size.bytes();
            }
        }
        let inst = match size {
            AccessSize::Byte => IrInst::Store8 { value, addr },
            AccessSize::Half => IrInst::Store16 { value, addr },
            AccessSize::Word => IrInst::Store32 { value, addr },
        };
        self.block.push(inst);
    }

    fn emit_memory(&mut self, op: MemoryOp, rd: u8, ea: EffectiveAddress, update: bool) {
        let value = match op {
            MemoryOp::Store(_) => Some(self.emit_load_greg(rd)),
            MemoryOp::StoreByteReversed(size) => {
                let raw = self.emit_load_greg(rd);
                Some(self.emit_byte_swap(size, raw))
            }
            MemoryOp::StoreSingle => {
                let double = self.emit_load_freg(rd);
                Some(self.block.push(IrInst::DoubleToSingle(double)))
            }
            _ => None,
        };

        let addr = self.emit_effective_address(ea);
        if update {
            self.emit_store_greg(addr, ea.base());
        }

        match op {
            MemoryOp::LoadZero(size) => {
                let loaded = self.emit_load(size, addr);
                self.emit_store_greg(loaded, rd);
            }
            MemoryOp::LoadAlgebraic => {
                let loaded = self.emit_load(AccessSize::Half, addr);
                let extended = self.block.push(IrInst::SExt16(loaded));
                self.emit_store_greg(extended, rd);
            }
            MemoryOp::LoadByteReversed(size) => {
                let loaded = self.emit_load(size, addr);
                let swapped = self.emit_byte_swap(size, loaded);
                self.emit_store_greg(swapped, rd);
            }
            MemoryOp::LoadSingle => {
                let loaded = self.emit_load(AccessSize::Word, addr);
                let widened = self.block.push(IrInst::SingleToDouble(loaded));
                self.emit_store_freg(widened, rd);
            }
            MemoryOp::Store(size) | MemoryOp::StoreByteReversed(size) => {
                if let Some(value) = value {
                    self.emit_store(size, value, addr);
                }
            }
            MemoryOp::StoreSingle => {
                if let Some(value) = value {
                    self.emit_store(AccessSize::Word, value, addr);
                }
            }
        }
    }

    fn emit_byte_swap(&mut self, size: AccessSize, value: InstLoc) -> InstLoc {
        match size {
            AccessSize::Half => self.block.push(IrInst::ByteSwap16(value)),
            AccessSize::Word => self.block.push(IrInst::ByteSwap32(value)),
            AccessSize::Byte => {
                debug_assert!(false, "byte-reversed access cannot be byte sized");
                value
            }
        }
    }

    /// Translate one decoded instruction into IR.
    pub fn emit_instruction(&mut self, inst: &DecodedInstruction) {
        match inst.instruction {
            Instruction::Memory { op, rd, ea, update } => self.emit_memory(op, rd, ea, update),
            Instruction::AddImmediate { rd, ra, imm } => {
                let base = self.emit_base_or_zero(ra);
                let imm = self.emit_imm32(imm as i32 as u32);
                let sum = self.emit_add(base, imm);
                self.emit_store_greg(sum, rd);
            }
            Instruction::AddImmediateShifted { rd, ra, imm } => {
                let base = self.emit_base_or_zero(ra);
                let imm = self.emit_imm32((imm as i32 as u32) << 16);
                let sum = self.emit_add(base, imm);
                self.emit_store_greg(sum, rd);
            }
            Instruction::OrImmediate { ra, rs, imm } => {
                let source = self.emit_load_greg(rs);
                let imm = self.emit_imm32(imm as u32);
                let result = self.emit_or(source, imm);
                self.emit_store_greg(result, ra);
            }
        }
        self.block.guest_instructions += 1;
    }

    pub fn finish(self) -> IrBlock {
        self.block
    }
}

/// Decode and translate a straight-line run of guest instructions.
///
/// # Errors
/// Stops at the first instruction outside the translated subset and returns
/// its decode error; the caller falls back to the interpreter for the block.
pub fn translate_block(words: &[u32], guest_address: u32) -> FifoResult<IrBlock> {
    let mut emitter = IrEmitter::new(guest_address);
    for (i, &word) in words.iter().enumerate() {
        let address = guest_address.wrapping_add(4 * i as u32);
        let decoded = DecodedInstruction::decode(word, address).map_err(|err| {
            log::warn!("JIT cannot translate 0x{word:08X} at 0x{address:08X}: {err}");
            err
        })?;
        emitter.emit_instruction(&decoded);
    }
    let block = emitter.finish();
    log::trace!(
        "translated {} guest instructions at 0x{:08X} into {} IR nodes",
        block.guest_instructions,
        block.guest_address,
        block.len()
    );
    Ok(block)
}
