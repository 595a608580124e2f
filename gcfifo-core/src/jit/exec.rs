//! Reference backend: evaluates an [`IrBlock`] against a CPU context and a
//! memory bus.
//!
//! Values are kept as `u64` slots (integers zero-extended, doubles as their
//! bit pattern). Dead nodes without side effects are skipped.

use crate::context::CpuContext;
use crate::error::FifoResult;
use crate::jit::ir::{InstLoc, IrBlock, IrInst};
use crate::memory::MemoryBus;

impl IrBlock {
    /// Run the block.
    ///
    /// # Errors
    /// Stops at the first failing memory access. Nodes before it have
    /// already taken effect, matching a guest exception mid-block.
    pub fn execute<B: MemoryBus + ?Sized>(&self, ctx: &mut CpuContext, bus: &mut B) -> FifoResult<()> {
        let uses = self.use_counts();
        let mut values: Vec<u64> = vec![0; self.len()];

        for (loc, inst) in self.iter() {
            if uses[loc.index()] == 0 && !inst.has_side_effects() {
                continue;
            }
            let v = |l: InstLoc| values[l.index()];
            let result: u64 = match *inst {
                IrInst::Imm32(value) => value as u64,
                IrInst::LoadGReg(reg) => ctx.get_register(reg) as u64,
                IrInst::StoreGReg { value, reg } => {
                    ctx.set_register(reg, v(value) as u32);
                    0
                }
                IrInst::LoadFReg(reg) => ctx.get_fpr(reg).to_bits(),
                IrInst::StoreFReg { value, reg } => {
                    ctx.set_fpr(reg, f64::from_bits(v(value)));
                    0
                }
                IrInst::Add(a, b) => (v(a) as u32).wrapping_add(v(b) as u32) as u64,
                IrInst::Or(a, b) => ((v(a) as u32) | (v(b) as u32)) as u64,
                IrInst::SExt16(a) => (v(a) as u16 as i16 as i32 as u32) as u64,
                IrInst::ByteSwap16(a) => (v(a) as u16).swap_bytes() as u64,
                IrInst::ByteSwap32(a) => (v(a) as u32).swap_bytes() as u64,
                IrInst::SingleToDouble(a) => (f32::from_bits(v(a) as u32) as f64).to_bits(),
                IrInst::DoubleToSingle(a) => (f64::from_bits(v(a)) as f32).to_bits() as u64,
                IrInst::Load8 { addr } => bus.read_u8(v(addr) as u32)? as u64,
                IrInst::Load16 { addr } => bus.read_u16(v(addr) as u32)? as u64,
                IrInst::Load32 { addr } => bus.read_u32(v(addr) as u32)? as u64,
                IrInst::Store8 { value, addr } => {
                    bus.write_u8(v(addr) as u32, v(value) as u8)?;
                    0
                }
                IrInst::Store16 { value, addr } => {
                    bus.write_u16(v(addr) as u32, v(value) as u16)?;
                    0
                }
                IrInst::Store32 { value, addr } => {
                    bus.write_u32(v(addr) as u32, v(value) as u32)?;
                    0
                }
            };
            values[loc.index()] = result;
        }

        ctx.pc = self
            .guest_address
            .wrapping_add(4 * self.guest_instructions);
        Ok(())
    }
}
