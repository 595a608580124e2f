//! Guest CPU state touched by translated load/store blocks.
//!
//! Only the registers the emitter reads or writes live here: the GPRs that
//! hold data and base addresses, the FPRs used by `lfs`/`stfs`, and the PC
//! the evaluator leaves past the last executed instruction. Register numbers
//! come from 5-bit instruction fields; anything wider is masked.

const REGISTER_MASK: u8 = 0x1F;

#[derive(Debug, Clone, PartialEq)]
pub struct CpuContext {
    pub gpr: [u32; 32],
    /// Paired-single slot 0 only.
    pub fpr: [f64; 32],
    pub pc: u32,
}

impl CpuContext {
    pub fn new() -> Self {
        Self {
            gpr: [0; 32],
            fpr: [0.0; 32],
            pc: 0,
        }
    }

    #[inline]
    pub fn get_register(&self, reg: u8) -> u32 {
        self.gpr[(reg & REGISTER_MASK) as usize]
    }

    #[inline]
    pub fn set_register(&mut self, reg: u8, value: u32) {
        self.gpr[(reg & REGISTER_MASK) as usize] = value;
    }

    #[inline]
    pub fn get_fpr(&self, reg: u8) -> f64 {
        self.fpr[(reg & REGISTER_MASK) as usize]
    }

    #[inline]
    pub fn set_fpr(&mut self, reg: u8, value: f64) {
        self.fpr[(reg & REGISTER_MASK) as usize] = value;
    }
}

impl Default for CpuContext {
    fn default() -> Self {
        Self::new()
    }
}
