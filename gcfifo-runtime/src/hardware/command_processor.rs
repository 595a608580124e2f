//! Command Processor
//!
//! Register file and control logic for the FIFO. The CP is the only writer
//! of ring geometry and control flags; the GPU consumer only moves the read
//! pointer and latches breakpoints.
//!
//! # Register Layout
//! All registers are 16 bits wide. The 32-bit FIFO fields are split into a
//! low half at the even offset and a high half at `offset + 2`.
//!
//! | Offset      | Register                   |
//! |-------------|----------------------------|
//! | `0x00`      | status                     |
//! | `0x02`      | control                    |
//! | `0x04`      | clear (reads zero)         |
//! | `0x0E`      | token                      |
//! | `0x10-0x16` | bounding box (read-only)   |
//! | `0x20/0x22` | FIFO base                  |
//! | `0x24/0x26` | FIFO end                   |
//! | `0x28/0x2A` | hi watermark               |
//! | `0x2C/0x2E` | lo watermark               |
//! | `0x30/0x32` | read-write distance (r/o)  |
//! | `0x34/0x36` | write pointer              |
//! | `0x38/0x3A` | read pointer               |
//! | `0x3C/0x3E` | breakpoint                 |

use crate::hardware::fifo::FifoRingBuffer;
use crate::hardware::pixel_engine::PixelEngineHandle;
use crate::hardware::processor_interface::{InterruptCause, ProcessorInterface};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

bitflags! {
    /// CP status register (`0x00`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CpStatus: u16 {
        const OVERFLOW = 1 << 0;
        const UNDERFLOW = 1 << 1;
        const READ_IDLE = 1 << 2;
        const COMMAND_IDLE = 1 << 3;
        const BREAKPOINT = 1 << 4;
    }
}

bitflags! {
    /// CP control register (`0x02`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CpControl: u16 {
        const READ_ENABLE = 1 << 0;
        const BREAKPOINT_ENABLE = 1 << 1;
        const OVERFLOW_INT_ENABLE = 1 << 2;
        const UNDERFLOW_INT_ENABLE = 1 << 3;
        const LINK_ENABLE = 1 << 4;
        const BREAKPOINT_INT_ENABLE = 1 << 5;
    }
}

/// Register offsets inside the CP window.
pub mod regs {
    pub const STATUS: u32 = 0x00;
    pub const CONTROL: u32 = 0x02;
    pub const CLEAR: u32 = 0x04;
    pub const TOKEN: u32 = 0x0E;
    pub const BOUNDING_BOX_LEFT: u32 = 0x10;
    pub const BOUNDING_BOX_RIGHT: u32 = 0x12;
    pub const BOUNDING_BOX_TOP: u32 = 0x14;
    pub const BOUNDING_BOX_BOTTOM: u32 = 0x16;
    pub const FIFO_BASE_LO: u32 = 0x20;
    pub const FIFO_BASE_HI: u32 = 0x22;
    pub const FIFO_END_LO: u32 = 0x24;
    pub const FIFO_END_HI: u32 = 0x26;
    pub const FIFO_HI_WATERMARK_LO: u32 = 0x28;
    pub const FIFO_HI_WATERMARK_HI: u32 = 0x2A;
    pub const FIFO_LO_WATERMARK_LO: u32 = 0x2C;
    pub const FIFO_LO_WATERMARK_HI: u32 = 0x2E;
    pub const FIFO_DISTANCE_LO: u32 = 0x30;
    pub const FIFO_DISTANCE_HI: u32 = 0x32;
    pub const FIFO_WRITE_POINTER_LO: u32 = 0x34;
    pub const FIFO_WRITE_POINTER_HI: u32 = 0x36;
    pub const FIFO_READ_POINTER_LO: u32 = 0x38;
    pub const FIFO_READ_POINTER_HI: u32 = 0x3A;
    pub const FIFO_BREAKPOINT_LO: u32 = 0x3C;
    pub const FIFO_BREAKPOINT_HI: u32 = 0x3E;
}

/// 32-bit FIFO field behind a pair of 16-bit registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FifoField {
    Base,
    End,
    HiWatermark,
    LoWatermark,
    Distance,
    WritePointer,
    ReadPointer,
    Breakpoint,
}

impl FifoField {
    /// Field and whether `offset` addresses its high half.
    fn decode(offset: u32) -> Option<(Self, bool)> {
        if !(regs::FIFO_BASE_LO..=regs::FIFO_BREAKPOINT_HI).contains(&offset) || offset & 1 != 0 {
            return None;
        }
        let field = match (offset - regs::FIFO_BASE_LO) / 4 {
            0 => Self::Base,
            1 => Self::End,
            2 => Self::HiWatermark,
            3 => Self::LoWatermark,
            4 => Self::Distance,
            5 => Self::WritePointer,
            6 => Self::ReadPointer,
            _ => Self::Breakpoint,
        };
        Some((field, offset & 2 != 0))
    }

    /// Writes to these fields change the distance derivation.
    fn affects_distance(self) -> bool {
        matches!(
            self,
            Self::Base | Self::End | Self::WritePointer | Self::ReadPointer
        )
    }
}

#[inline]
fn replace_half(current: u32, value: u16, high: bool) -> u32 {
    if high {
        (current & 0x0000_FFFF) | ((value as u32) << 16)
    } else {
        (current & 0xFFFF_0000) | value as u32
    }
}

#[inline]
fn select_half(value: u32, high: bool) -> u16 {
    if high {
        (value >> 16) as u16
    } else {
        value as u16
    }
}

/// Serializable CP state not already held by the ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpRegisters {
    pub control: u16,
    pub bounding_box: [u16; 4],
}

#[derive(Debug)]
pub struct CommandProcessor {
    fifo: Arc<FifoRingBuffer>,
    control: CpControl,
    bounding_box: [u16; 4],
    pixel_engine: PixelEngineHandle,
}

impl CommandProcessor {
    pub fn new(fifo: Arc<FifoRingBuffer>, pixel_engine: PixelEngineHandle) -> Self {
        Self {
            fifo,
            control: CpControl::empty(),
            bounding_box: [0; 4],
            pixel_engine,
        }
    }

    pub fn fifo(&self) -> &Arc<FifoRingBuffer> {
        &self.fifo
    }

    pub fn control(&self) -> CpControl {
        self.control
    }

    /// Status bits derived from the current ring state.
    pub fn status(&self) -> CpStatus {
        let fifo = &self.fifo;
        let distance = fifo.distance();
        let mut status = CpStatus::empty();
        status.set(CpStatus::OVERFLOW, distance > fifo.hi_watermark());
        status.set(CpStatus::UNDERFLOW, distance < fifo.lo_watermark());
        let idle = distance == 0 || !fifo.read_enable();
        status.set(CpStatus::READ_IDLE, idle);
        status.set(CpStatus::COMMAND_IDLE, idle);
        status.set(CpStatus::BREAKPOINT, fifo.breakpoint_hit());
        status
    }

    /// Reads that must observe a drained consumer in dual-core mode.
    pub fn read_requires_sync(offset: u32) -> bool {
        matches!(
            FifoField::decode(offset),
            Some((FifoField::Distance | FifoField::ReadPointer, _))
        )
    }

    /// Writes that move ring geometry under the consumer.
    pub fn is_geometry_register(offset: u32) -> bool {
        matches!(FifoField::decode(offset), Some((field, _)) if field.affects_distance())
    }

    pub fn read16(&self, offset: u32) -> u16 {
        match offset {
            regs::STATUS => self.status().bits(),
            regs::CONTROL => self.control.bits(),
            regs::CLEAR => 0,
            regs::TOKEN => self.pixel_engine.token(),
            regs::BOUNDING_BOX_LEFT..=regs::BOUNDING_BOX_BOTTOM if offset & 1 == 0 => {
                self.bounding_box[((offset - regs::BOUNDING_BOX_LEFT) / 2) as usize]
            }
            _ => match FifoField::decode(offset) {
                Some((field, high)) => select_half(self.field(field), high),
                None => {
                    log::warn!("CP: read from unknown register 0x{offset:02X}");
                    0
                }
            },
        }
    }

    fn field(&self, field: FifoField) -> u32 {
        let fifo = &self.fifo;
        match field {
            FifoField::Base => fifo.base(),
            FifoField::End => fifo.end(),
            FifoField::HiWatermark => fifo.hi_watermark(),
            FifoField::LoWatermark => fifo.lo_watermark(),
            FifoField::Distance => fifo.distance(),
            FifoField::WritePointer => fifo.write_pointer(),
            FifoField::ReadPointer => fifo.read_pointer(),
            FifoField::Breakpoint => fifo.breakpoint(),
        }
    }

    /// Handle a guest register write.
    ///
    /// Returns `true` when the write may let the consumer make progress;
    /// the caller then runs or wakes it and recomputes interrupts.
    pub fn write16(&mut self, offset: u32, value: u16) -> bool {
        match offset {
            regs::STATUS => {
                let written = CpStatus::from_bits_truncate(value);
                if written.contains(CpStatus::BREAKPOINT) && self.fifo.acknowledge_breakpoint() {
                    log::debug!(
                        "CP: breakpoint at 0x{:08X} acknowledged",
                        self.fifo.breakpoint()
                    );
                    return true;
                }
                false
            }
            regs::CONTROL => {
                let control = CpControl::from_bits_truncate(value);
                self.set_control(control);
                true
            }
            regs::CLEAR => {
                log::debug!("CP: clear register write 0x{value:04X} ignored");
                false
            }
            regs::TOKEN => {
                self.pixel_engine.store_token(value);
                false
            }
            regs::BOUNDING_BOX_LEFT..=regs::BOUNDING_BOX_BOTTOM => {
                log::warn!("CP: write to read-only bounding box 0x{offset:02X} discarded");
                false
            }
            _ => match FifoField::decode(offset) {
                Some((field, high)) => self.write_field(field, value, high),
                None => {
                    log::warn!("CP: write to unknown register 0x{offset:02X} = 0x{value:04X}");
                    false
                }
            },
        }
    }

    fn set_control(&mut self, control: CpControl) {
        self.control = control;
        let fifo = &self.fifo;
        fifo.set_read_enable(control.contains(CpControl::READ_ENABLE));
        fifo.set_link_enable(control.contains(CpControl::LINK_ENABLE));
        fifo.set_breakpoint_enable(control.contains(CpControl::BREAKPOINT_ENABLE));
        log::debug!("CP: control {control:?}");
    }

    fn write_field(&mut self, field: FifoField, value: u16, high: bool) -> bool {
        let fifo = &self.fifo;
        let updated = replace_half(self.field(field), value, high);
        match field {
            FifoField::Base => fifo.set_base(updated),
            FifoField::End => fifo.set_end(updated),
            FifoField::HiWatermark => fifo.set_hi_watermark(updated),
            FifoField::LoWatermark => fifo.set_lo_watermark(updated),
            FifoField::WritePointer => fifo.set_write_pointer(updated),
            FifoField::ReadPointer => fifo.set_read_pointer(updated),
            FifoField::Breakpoint => fifo.set_breakpoint(updated),
            FifoField::Distance => {
                log::warn!("CP: write to read-only FIFO distance discarded (0x{value:04X})");
                return false;
            }
        }
        if field.affects_distance() {
            fifo.recompute_distance();
        }
        true
    }

    /// Recompute the CP interrupt cause.
    pub fn update_interrupts(&self, pi: &mut ProcessorInterface) {
        let status = self.status();
        let breakpoint = self.control.contains(CpControl::BREAKPOINT_ENABLE)
            && status.contains(CpStatus::BREAKPOINT);
        let overflow = self.control.contains(CpControl::OVERFLOW_INT_ENABLE)
            && status.contains(CpStatus::OVERFLOW);
        let underflow = self.control.contains(CpControl::UNDERFLOW_INT_ENABLE)
            && status.contains(CpStatus::UNDERFLOW);
        pi.set_interrupt(InterruptCause::CP, breakpoint || overflow || underflow);
    }

    pub fn registers(&self) -> CpRegisters {
        CpRegisters {
            control: self.control.bits(),
            bounding_box: self.bounding_box,
        }
    }

    /// Restore CP-only state. Ring fields are restored separately, after
    /// this, since the control write also sets the ring flags.
    pub fn load_registers(&mut self, regs: &CpRegisters) {
        self.control = CpControl::from_bits_truncate(regs.control);
        self.bounding_box = regs.bounding_box;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::EventScheduler;

    fn setup() -> CommandProcessor {
        let scheduler = EventScheduler::new();
        CommandProcessor::new(
            Arc::new(FifoRingBuffer::new()),
            PixelEngineHandle::new(scheduler.threadsafe_sender()),
        )
    }

    #[test]
    fn test_fifo_fields_split_into_halves() {
        let mut cp = setup();
        cp.write16(regs::FIFO_END_LO, 0x0100);
        cp.write16(regs::FIFO_END_HI, 0x0012);
        assert_eq!(cp.fifo().end(), 0x0012_0100);
        assert_eq!(cp.read16(regs::FIFO_END_LO), 0x0100);
        assert_eq!(cp.read16(regs::FIFO_END_HI), 0x0012);
    }

    #[test]
    fn test_base_is_masked_to_chunk_alignment() {
        let mut cp = setup();
        cp.write16(regs::FIFO_BASE_LO, 0x123F);
        assert_eq!(cp.fifo().base(), 0x1220);
    }

    #[test]
    fn test_distance_is_read_only() {
        let mut cp = setup();
        assert!(!cp.write16(regs::FIFO_DISTANCE_LO, 0x40));
        assert_eq!(cp.read16(regs::FIFO_DISTANCE_LO), 0);
    }

    #[test]
    fn test_pointer_write_recomputes_distance() {
        let mut cp = setup();
        cp.write16(regs::FIFO_END_LO, 0x100);
        cp.write16(regs::FIFO_WRITE_POINTER_LO, 0x60);
        assert_eq!(cp.fifo().distance(), 0x60);
        cp.write16(regs::FIFO_READ_POINTER_LO, 0x80);
        assert_eq!(cp.fifo().distance(), 0xE0);
    }

    #[test]
    fn test_clear_and_bounding_box_reads_do_not_mutate() {
        let mut cp = setup();
        cp.write16(regs::CLEAR, 0xFFFF);
        cp.write16(regs::BOUNDING_BOX_TOP, 0x1234);
        let before = cp.registers();
        for _ in 0..3 {
            assert_eq!(cp.read16(regs::CLEAR), 0);
            for offset in (regs::BOUNDING_BOX_LEFT..=regs::BOUNDING_BOX_BOTTOM).step_by(2) {
                assert_eq!(cp.read16(offset), 0);
            }
        }
        assert_eq!(cp.registers(), before);
    }

    #[test]
    fn test_control_mirrors_ring_flags() {
        let mut cp = setup();
        let control = CpControl::READ_ENABLE | CpControl::LINK_ENABLE | CpControl::BREAKPOINT_INT_ENABLE;
        cp.write16(regs::CONTROL, control.bits());
        assert!(cp.fifo().read_enable());
        assert!(cp.fifo().link_enable());
        assert!(!cp.fifo().breakpoint_enable());
        assert_eq!(cp.read16(regs::CONTROL), control.bits());
    }

    #[test]
    fn test_breakpoint_interrupt_needs_enable_and_hit() {
        let mut cp = setup();
        let mut pi = ProcessorInterface::new();
        cp.write16(regs::CONTROL, CpControl::BREAKPOINT_ENABLE.bits());
        cp.update_interrupts(&mut pi);
        assert!(!pi.cause().contains(InterruptCause::CP));

        cp.fifo().latch_breakpoint();
        cp.update_interrupts(&mut pi);
        assert!(pi.cause().contains(InterruptCause::CP));
        assert_eq!(cp.status() & CpStatus::BREAKPOINT, CpStatus::BREAKPOINT);

        cp.write16(regs::STATUS, CpStatus::BREAKPOINT.bits());
        cp.update_interrupts(&mut pi);
        assert!(!pi.cause().contains(InterruptCause::CP));
    }

    #[test]
    fn test_watermark_interrupts() {
        let mut cp = setup();
        let mut pi = ProcessorInterface::new();
        cp.write16(regs::FIFO_END_LO, 0x100);
        cp.write16(regs::FIFO_HI_WATERMARK_LO, 0x40);
        cp.write16(regs::FIFO_LO_WATERMARK_LO, 0x20);

        // empty ring: underflow only fires once its interrupt is enabled
        cp.update_interrupts(&mut pi);
        assert!(!pi.cause().contains(InterruptCause::CP));
        cp.write16(regs::CONTROL, CpControl::UNDERFLOW_INT_ENABLE.bits());
        cp.update_interrupts(&mut pi);
        assert!(pi.cause().contains(InterruptCause::CP));

        cp.write16(regs::CONTROL, CpControl::OVERFLOW_INT_ENABLE.bits());
        cp.write16(regs::FIFO_WRITE_POINTER_LO, 0x60);
        cp.update_interrupts(&mut pi);
        assert!(cp.status().contains(CpStatus::OVERFLOW));
        assert!(pi.cause().contains(InterruptCause::CP));
    }

    #[test]
    fn test_token_register_shares_pixel_engine_token() {
        let mut cp = setup();
        cp.write16(regs::TOKEN, 0xBEEF);
        assert_eq!(cp.pixel_engine.token(), 0xBEEF);
        cp.pixel_engine.set_token(0x1234, false);
        assert_eq!(cp.read16(regs::TOKEN), 0x1234);
    }
}
