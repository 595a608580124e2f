//! Pixel Engine
//!
//! Owns the token and finish interrupt latches. The GPU side never touches
//! them: it signals through a [`PixelEngineHandle`], which publishes the
//! token value atomically and schedules a latch event on the CPU timeline.
//! [`PixelEngine::apply_event`] then sets the latch and recomputes the PE
//! interrupt causes.

use crate::hardware::processor_interface::{InterruptCause, ProcessorInterface};
use crate::scheduler::{ScheduledEvent, ThreadsafeEventSender};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

bitflags! {
    /// PE control register (`0x0A`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PeControl: u16 {
        const TOKEN_ENABLE = 1 << 0;
        const FINISH_ENABLE = 1 << 1;
        /// Write: acknowledge token. Read: token latched.
        const TOKEN = 1 << 2;
        /// Write: acknowledge finish. Read: finish latched.
        const FINISH = 1 << 3;
    }
}

/// Register offsets inside the PE window.
pub mod regs {
    pub const Z_CONFIG: u32 = 0x00;
    pub const ALPHA_CONFIG: u32 = 0x02;
    pub const DEST_ALPHA_CONFIG: u32 = 0x04;
    pub const ALPHA_MODE: u32 = 0x06;
    pub const ALPHA_READ: u32 = 0x08;
    pub const CONTROL: u32 = 0x0A;
    pub const TOKEN: u32 = 0x0E;
}

/// GPU-side signalling handle.
#[derive(Debug, Clone)]
pub struct PixelEngineHandle {
    token: Arc<AtomicU16>,
    events: ThreadsafeEventSender,
}

impl PixelEngineHandle {
    pub fn new(events: ThreadsafeEventSender) -> Self {
        Self {
            token: Arc::new(AtomicU16::new(0)),
            events,
        }
    }

    /// Publish `token`; with `interrupt` also schedule the token latch.
    pub fn set_token(&self, token: u16, interrupt: bool) {
        self.token.store(token, Ordering::Release);
        if interrupt {
            self.events.schedule(0, ScheduledEvent::PeToken);
        }
    }

    /// Schedule the finish latch.
    pub fn set_finish(&self) {
        self.events.schedule(0, ScheduledEvent::PeFinish);
    }

    /// Last published token.
    #[inline]
    pub fn token(&self) -> u16 {
        self.token.load(Ordering::Acquire)
    }

    /// CPU-side token write (CP token register, save-state restore).
    pub fn store_token(&self, token: u16) {
        self.token.store(token, Ordering::Release);
    }
}

/// Serializable PE state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeRegisters {
    pub z_config: u16,
    pub alpha_config: u16,
    pub dest_alpha_config: u16,
    pub alpha_mode: u16,
    pub alpha_read: u16,
    pub control: u16,
    pub token: u16,
    pub token_latched: bool,
    pub finish_latched: bool,
}

#[derive(Debug)]
pub struct PixelEngine {
    z_config: u16,
    alpha_config: u16,
    dest_alpha_config: u16,
    alpha_mode: u16,
    alpha_read: u16,
    control: PeControl,
    token_latched: bool,
    finish_latched: bool,
    handle: PixelEngineHandle,
}

impl PixelEngine {
    pub fn new(handle: PixelEngineHandle) -> Self {
        Self {
            z_config: 0,
            alpha_config: 0,
            dest_alpha_config: 0,
            alpha_mode: 0,
            alpha_read: 0,
            control: PeControl::empty(),
            token_latched: false,
            finish_latched: false,
            handle,
        }
    }

    pub fn handle(&self) -> &PixelEngineHandle {
        &self.handle
    }

    pub fn token_latched(&self) -> bool {
        self.token_latched
    }

    pub fn finish_latched(&self) -> bool {
        self.finish_latched
    }

    pub fn read16(&self, offset: u32) -> u16 {
        match offset {
            regs::Z_CONFIG => self.z_config,
            regs::ALPHA_CONFIG => self.alpha_config,
            regs::DEST_ALPHA_CONFIG => self.dest_alpha_config,
            regs::ALPHA_MODE => self.alpha_mode,
            regs::ALPHA_READ => self.alpha_read,
            regs::CONTROL => {
                let mut value = self.control;
                value.set(PeControl::TOKEN, self.token_latched);
                value.set(PeControl::FINISH, self.finish_latched);
                value.bits()
            }
            regs::TOKEN => self.handle.token(),
            _ => {
                log::warn!("PE: read from unknown register 0x{offset:02X}");
                0
            }
        }
    }

    pub fn write16(&mut self, offset: u32, value: u16, pi: &mut ProcessorInterface) {
        match offset {
            regs::Z_CONFIG => self.z_config = value,
            regs::ALPHA_CONFIG => self.alpha_config = value,
            regs::DEST_ALPHA_CONFIG => self.dest_alpha_config = value,
            regs::ALPHA_MODE => self.alpha_mode = value,
            regs::ALPHA_READ => self.alpha_read = value,
            regs::CONTROL => {
                let written = PeControl::from_bits_truncate(value);
                if written.contains(PeControl::TOKEN) {
                    self.token_latched = false;
                }
                if written.contains(PeControl::FINISH) {
                    self.finish_latched = false;
                }
                self.control = written & (PeControl::TOKEN_ENABLE | PeControl::FINISH_ENABLE);
                self.update_interrupts(pi);
            }
            regs::TOKEN => {
                log::warn!("PE: write to read-only token register discarded (0x{value:04X})");
            }
            _ => log::warn!("PE: write to unknown register 0x{offset:02X} = 0x{value:04X}"),
        }
    }

    /// Apply a token/finish event on the CPU timeline.
    pub fn apply_event(&mut self, event: ScheduledEvent, pi: &mut ProcessorInterface) {
        match event {
            ScheduledEvent::PeToken => {
                log::debug!("PE: token 0x{:04X} latched", self.handle.token());
                self.token_latched = true;
            }
            ScheduledEvent::PeFinish => {
                log::debug!("PE: finish latched");
                self.finish_latched = true;
            }
            ScheduledEvent::CpUpdateInterrupts => return,
        }
        self.update_interrupts(pi);
    }

    pub fn update_interrupts(&self, pi: &mut ProcessorInterface) {
        pi.set_interrupt(
            InterruptCause::PE_TOKEN,
            self.token_latched && self.control.contains(PeControl::TOKEN_ENABLE),
        );
        pi.set_interrupt(
            InterruptCause::PE_FINISH,
            self.finish_latched && self.control.contains(PeControl::FINISH_ENABLE),
        );
    }

    pub fn registers(&self) -> PeRegisters {
        PeRegisters {
            z_config: self.z_config,
            alpha_config: self.alpha_config,
            dest_alpha_config: self.dest_alpha_config,
            alpha_mode: self.alpha_mode,
            alpha_read: self.alpha_read,
            control: self.control.bits(),
            token: self.handle.token(),
            token_latched: self.token_latched,
            finish_latched: self.finish_latched,
        }
    }

    pub fn load_registers(&mut self, regs: &PeRegisters, pi: &mut ProcessorInterface) {
        self.z_config = regs.z_config;
        self.alpha_config = regs.alpha_config;
        self.dest_alpha_config = regs.dest_alpha_config;
        self.alpha_mode = regs.alpha_mode;
        self.alpha_read = regs.alpha_read;
        self.control = PeControl::from_bits_truncate(regs.control)
            & (PeControl::TOKEN_ENABLE | PeControl::FINISH_ENABLE);
        self.handle.store_token(regs.token);
        self.token_latched = regs.token_latched;
        self.finish_latched = regs.finish_latched;
        self.update_interrupts(pi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::EventScheduler;

    fn setup() -> (EventScheduler, PixelEngine, ProcessorInterface) {
        let scheduler = EventScheduler::new();
        let pe = PixelEngine::new(PixelEngineHandle::new(scheduler.threadsafe_sender()));
        (scheduler, pe, ProcessorInterface::new())
    }

    #[test]
    fn test_token_without_interrupt_only_publishes() {
        let (mut scheduler, pe, _) = setup();
        pe.handle().set_token(0x55, false);
        assert_eq!(pe.read16(regs::TOKEN), 0x55);
        assert!(scheduler.advance(0).is_empty());
    }

    #[test]
    fn test_latch_needs_enable_to_raise_cause() {
        let (_, mut pe, mut pi) = setup();
        pe.apply_event(ScheduledEvent::PeFinish, &mut pi);
        assert!(pe.finish_latched());
        assert!(!pi.cause().contains(InterruptCause::PE_FINISH));

        pe.write16(regs::CONTROL, PeControl::FINISH_ENABLE.bits(), &mut pi);
        assert!(pi.cause().contains(InterruptCause::PE_FINISH));
    }

    #[test]
    fn test_acknowledge_clears_only_written_latch() {
        let (_, mut pe, mut pi) = setup();
        pe.write16(
            regs::CONTROL,
            (PeControl::TOKEN_ENABLE | PeControl::FINISH_ENABLE).bits(),
            &mut pi,
        );
        pe.apply_event(ScheduledEvent::PeToken, &mut pi);
        pe.apply_event(ScheduledEvent::PeFinish, &mut pi);

        let ack = PeControl::TOKEN_ENABLE | PeControl::FINISH_ENABLE | PeControl::TOKEN;
        pe.write16(regs::CONTROL, ack.bits(), &mut pi);

        assert!(!pe.token_latched());
        assert!(pe.finish_latched());
        assert_eq!(
            pe.read16(regs::CONTROL),
            (PeControl::TOKEN_ENABLE | PeControl::FINISH_ENABLE | PeControl::FINISH).bits()
        );
        assert!(!pi.cause().contains(InterruptCause::PE_TOKEN));
        assert!(pi.cause().contains(InterruptCause::PE_FINISH));
    }
}
