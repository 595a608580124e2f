//! Processor Interface
//!
//! Aggregates interrupt causes from every hardware unit and drives the guest
//! CPU's external-interrupt line. [`ProcessorInterface::update_exception`] is
//! the only place that line is computed.
//!
//! The PI also tracks its own copy of the CPU-side FIFO write pointer, which
//! the machine compares against the CommandProcessor's on every burst.

use crate::hardware::fifo::{CHUNK_SIZE, POINTER_MASK};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Interrupt cause/mask bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InterruptCause: u32 {
        const ERROR = 0x0000_0001;
        const RSW = 0x0000_0002;
        const DI = 0x0000_0004;
        const SI = 0x0000_0008;
        const EXI = 0x0000_0010;
        const AI = 0x0000_0020;
        const DSP = 0x0000_0040;
        const MEM = 0x0000_0080;
        const VI = 0x0000_0100;
        const PE_TOKEN = 0x0000_0200;
        const PE_FINISH = 0x0000_0400;
        const CP = 0x0000_0800;
        const DEBUG = 0x0000_1000;
        const HSP = 0x0000_2000;
        const RESET_SWITCH = 0x0001_0000;
    }
}

/// Register offsets inside the PI window.
pub mod regs {
    pub const INTERRUPT_CAUSE: u32 = 0x00;
    pub const INTERRUPT_MASK: u32 = 0x04;
    pub const FIFO_BASE: u32 = 0x0C;
    pub const FIFO_END: u32 = 0x10;
    pub const FIFO_WRITE_POINTER: u32 = 0x14;
    pub const RESET_CODE: u32 = 0x24;
    pub const BOARD_REVISION: u32 = 0x2C;
}

/// Flipper revision reported to the guest.
pub const BOARD_REVISION: u32 = 0x2465_00B1;

/// Wrap flag reported in bit 29 of the FIFO write-pointer register.
const FIFO_WRAPPED_BIT: u32 = 1 << 29;

/// Serializable PI state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiRegisters {
    pub cause: u32,
    pub mask: u32,
    pub fifo_base: u32,
    pub fifo_end: u32,
    pub fifo_write_pointer: u32,
    pub fifo_wrapped: bool,
    pub reset_code: u32,
}

#[derive(Debug, Clone)]
pub struct ProcessorInterface {
    cause: InterruptCause,
    mask: InterruptCause,
    fifo_base: u32,
    fifo_end: u32,
    fifo_write_pointer: u32,
    fifo_wrapped: bool,
    reset_code: u32,
    external_interrupt: bool,
}

impl ProcessorInterface {
    pub fn new() -> Self {
        Self {
            cause: InterruptCause::empty(),
            mask: InterruptCause::empty(),
            fifo_base: 0,
            fifo_end: 0,
            fifo_write_pointer: 0,
            fifo_wrapped: false,
            reset_code: 0,
            external_interrupt: false,
        }
    }

    pub fn cause(&self) -> InterruptCause {
        self.cause
    }

    pub fn mask(&self) -> InterruptCause {
        self.mask
    }

    /// Guest external-interrupt line, as last derived by `update_exception`.
    #[inline]
    pub fn external_interrupt_pending(&self) -> bool {
        self.external_interrupt
    }

    /// Raise or drop one or more cause bits.
    pub fn set_interrupt(&mut self, cause: InterruptCause, asserted: bool) {
        let before = self.cause;
        self.cause.set(cause, asserted);
        if before != self.cause {
            log::debug!(
                "PI cause {:?} {}",
                cause,
                if asserted { "asserted" } else { "cleared" }
            );
        }
        self.update_exception();
    }

    pub fn update_exception(&mut self) {
        self.external_interrupt = self.cause.intersects(self.mask);
    }

    // ---- FIFO write-pointer tracking -------------------------------------

    /// The guest set up a CPU-side FIFO.
    pub fn fifo_configured(&self) -> bool {
        self.fifo_end != 0
    }

    pub fn fifo_write_pointer(&self) -> u32 {
        self.fifo_write_pointer
    }

    /// Follow one 32-byte burst, wrapping at the PI's own end.
    pub fn advance_fifo_write_pointer(&mut self) {
        if !self.fifo_configured() {
            return;
        }
        let next = self.fifo_write_pointer.wrapping_add(CHUNK_SIZE);
        if next >= self.fifo_end {
            self.fifo_write_pointer = self.fifo_base;
            self.fifo_wrapped = true;
        } else {
            self.fifo_write_pointer = next;
        }
    }

    // ---- MMIO -------------------------------------------------------------

    pub fn read32(&self, offset: u32) -> u32 {
        match offset {
            regs::INTERRUPT_CAUSE => self.cause.bits(),
            regs::INTERRUPT_MASK => self.mask.bits(),
            regs::FIFO_BASE => self.fifo_base,
            regs::FIFO_END => self.fifo_end,
            regs::FIFO_WRITE_POINTER => {
                let wrapped = if self.fifo_wrapped { FIFO_WRAPPED_BIT } else { 0 };
                self.fifo_write_pointer | wrapped
            }
            regs::RESET_CODE => self.reset_code,
            regs::BOARD_REVISION => BOARD_REVISION,
            _ => {
                log::warn!("PI: read from unknown register 0x{offset:02X}");
                0
            }
        }
    }

    pub fn write32(&mut self, offset: u32, value: u32) {
        match offset {
            regs::INTERRUPT_CAUSE => {
                // write-1-to-clear
                self.cause
                    .remove(InterruptCause::from_bits_truncate(value));
                self.update_exception();
            }
            regs::INTERRUPT_MASK => {
                self.mask = InterruptCause::from_bits_truncate(value);
                self.update_exception();
            }
            regs::FIFO_BASE => self.fifo_base = value & POINTER_MASK,
            regs::FIFO_END => self.fifo_end = value & POINTER_MASK,
            regs::FIFO_WRITE_POINTER => {
                self.fifo_write_pointer = value & POINTER_MASK;
                self.fifo_wrapped = false;
            }
            regs::RESET_CODE => self.reset_code = value,
            regs::BOARD_REVISION => {
                log::warn!("PI: write to read-only board revision discarded (0x{value:08X})");
            }
            _ => log::warn!("PI: write to unknown register 0x{offset:02X} = 0x{value:08X}"),
        }
    }

    // ---- save states -------------------------------------------------------

    pub fn registers(&self) -> PiRegisters {
        PiRegisters {
            cause: self.cause.bits(),
            mask: self.mask.bits(),
            fifo_base: self.fifo_base,
            fifo_end: self.fifo_end,
            fifo_write_pointer: self.fifo_write_pointer,
            fifo_wrapped: self.fifo_wrapped,
            reset_code: self.reset_code,
        }
    }

    pub fn load_registers(&mut self, regs: &PiRegisters) {
        self.cause = InterruptCause::from_bits_truncate(regs.cause);
        self.mask = InterruptCause::from_bits_truncate(regs.mask);
        self.fifo_base = regs.fifo_base;
        self.fifo_end = regs.fifo_end;
        self.fifo_write_pointer = regs.fifo_write_pointer;
        self.fifo_wrapped = regs.fifo_wrapped;
        self.reset_code = regs.reset_code;
        self.update_exception();
    }
}

impl Default for ProcessorInterface {
    fn default() -> Self {
        Self::new()
    }
}
