//! Emulated Machine
//!
//! Owns every piece of state on the CPU -> GPU command path: guest RAM, the
//! gather pipe, the FIFO ring, the CommandProcessor, PixelEngine and
//! ProcessorInterface register files, the CPU-timeline scheduler, and the
//! GPU consumer (inline or threaded). There are no globals; several machines
//! can run side by side.
//!
//! # Memory Map
//! Guest effective addresses are reduced to physical addresses, then routed:
//! 1. the gather-pipe page takes stores and reads as zero
//! 2. CP/PE/PI register windows go to the device register files
//! 3. everything else is RAM
//!
//! # Scheduling Models
//! In single-core mode the consumer runs inline whenever FIFO state changes,
//! so every burst is dispatched before the store that caused it returns.
//! In dual-core mode the consumer lives on the "gpu" thread; the CPU side
//! wakes it, applies backpressure on bursts, and synchronises on the
//! registers whose value depends on consumer progress.

use crate::config::MachineConfig;
use crate::gpu::{ConsumerState, GpuConsumer, GpuThread, SharedRam};
use crate::hardware::command_processor::CommandProcessor;
use crate::hardware::fifo::{FifoRingBuffer, CHUNK_SIZE};
use crate::hardware::gather_pipe::GatherPipe;
use crate::hardware::pixel_engine::{PixelEngine, PixelEngineHandle};
use crate::hardware::processor_interface::{self, InterruptCause, ProcessorInterface};
use crate::hardware::{decode_mmio, Device};
use crate::save_state::{MachineSnapshot, SNAPSHOT_VERSION};
use crate::scheduler::{EventScheduler, ScheduledEvent};
use crate::video::VideoBackend;
use gcfifo_core::error::{FifoError, FifoResult};
use gcfifo_core::memory::{is_gather_pipe, physical_address, MemoryBus, Ram};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

enum GpuMode {
    Inline(GpuConsumer),
    Threaded(GpuThread),
    Stopped,
}

pub struct Machine {
    config: MachineConfig,
    ram: SharedRam,
    fifo: Arc<FifoRingBuffer>,
    gather_pipe: GatherPipe,
    cp: CommandProcessor,
    pe: PixelEngine,
    pi: ProcessorInterface,
    scheduler: EventScheduler,
    gpu: GpuMode,
}

impl Machine {
    /// Power on a machine.
    ///
    /// # Errors
    /// Rejects invalid configurations, and fails if the backend cannot be
    /// initialised or the GPU thread cannot be spawned.
    pub fn new(config: MachineConfig, backend: Box<dyn VideoBackend>) -> FifoResult<Self> {
        config.validate()?;

        let ram: SharedRam = Arc::new(RwLock::new(Ram::with_size(config.ram_size)));
        let fifo = Arc::new(FifoRingBuffer::new());
        let scheduler = EventScheduler::new();
        let pe_handle = PixelEngineHandle::new(scheduler.threadsafe_sender());

        if let Some(geometry) = &config.initial_fifo {
            fifo.set_base(geometry.base);
            fifo.set_end(geometry.end);
            fifo.set_hi_watermark(geometry.hi_watermark);
            fifo.set_lo_watermark(geometry.lo_watermark);
            fifo.set_write_pointer(geometry.base);
            fifo.set_read_pointer(geometry.base);
            fifo.recompute_distance();
        }

        let mut consumer = GpuConsumer::new(
            Arc::clone(&fifo),
            Arc::clone(&ram),
            backend,
            pe_handle.clone(),
            scheduler.threadsafe_sender(),
        );
        consumer.initialize()?;

        let gpu = if config.dual_core {
            GpuMode::Threaded(GpuThread::spawn(consumer)?)
        } else {
            GpuMode::Inline(consumer)
        };

        log::info!(
            "machine initialised: {} MiB RAM, {} mode",
            config.ram_size >> 20,
            if config.dual_core { "dual-core" } else { "single-core" }
        );

        Ok(Self {
            cp: CommandProcessor::new(Arc::clone(&fifo), pe_handle.clone()),
            pe: PixelEngine::new(pe_handle),
            pi: ProcessorInterface::new(),
            gather_pipe: GatherPipe::new(),
            config,
            ram,
            fifo,
            scheduler,
            gpu,
        })
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn is_dual_core(&self) -> bool {
        matches!(self.gpu, GpuMode::Threaded(_))
    }

    pub fn fifo(&self) -> &FifoRingBuffer {
        &self.fifo
    }

    pub fn command_processor(&self) -> &CommandProcessor {
        &self.cp
    }

    pub fn pixel_engine(&self) -> &PixelEngine {
        &self.pe
    }

    pub fn processor_interface(&self) -> &ProcessorInterface {
        &self.pi
    }

    pub fn gather_pipe(&self) -> &GatherPipe {
        &self.gather_pipe
    }

    /// Handle the video backend signals through; for tests and tools that
    /// stand in for the GPU side.
    pub fn pixel_engine_handle(&self) -> PixelEngineHandle {
        self.pe.handle().clone()
    }

    pub fn ram(&self) -> RwLockReadGuard<'_, Ram> {
        self.ram.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ram_mut(&self) -> RwLockWriteGuard<'_, Ram> {
        self.ram.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Guest external-interrupt line.
    pub fn external_interrupt_pending(&self) -> bool {
        self.pi.external_interrupt_pending()
    }

    /// Raise or drop an interrupt on behalf of a device outside this
    /// pipeline (DI, SI, EXI, ...).
    pub fn set_interrupt(&mut self, cause: InterruptCause, asserted: bool) {
        self.pi.set_interrupt(cause, asserted);
    }

    /// Current virtual cycle.
    pub fn now(&self) -> u64 {
        self.scheduler.now()
    }

    // ---- CPU timeline ------------------------------------------------------

    /// Advance the CPU timeline and apply every event that became due.
    /// Returns how many events were applied.
    pub fn advance(&mut self, cycles: u64) -> usize {
        let events = self.scheduler.advance(cycles);
        for &event in &events {
            self.apply_event(event);
        }
        events.len()
    }

    fn apply_event(&mut self, event: ScheduledEvent) {
        match event {
            ScheduledEvent::PeToken | ScheduledEvent::PeFinish => {
                self.pe.apply_event(event, &mut self.pi)
            }
            ScheduledEvent::CpUpdateInterrupts => self.cp.update_interrupts(&mut self.pi),
        }
    }

    // ---- GPU ---------------------------------------------------------------

    /// Let the consumer react to a FIFO state change.
    ///
    /// Single-core: drain inline until blocked. Dual-core: wake the thread.
    pub fn run_gpu(&mut self) {
        match &mut self.gpu {
            GpuMode::Inline(consumer) => {
                if consumer.run_until_blocked() == ConsumerState::HaltedAtBreakpoint {
                    log::trace!("GPU halted at breakpoint 0x{:08X}", self.fifo.breakpoint());
                }
            }
            GpuMode::Threaded(thread) => thread.notify(),
            GpuMode::Stopped => {}
        }
        self.cp.update_interrupts(&mut self.pi);
    }

    /// Block until the consumer is idle or blocked.
    ///
    /// Single-core machines are always in sync. In dual-core mode a
    /// configured stall timeout turns an endless wait into a warning.
    pub fn sync_gpu(&mut self) {
        if let GpuMode::Threaded(thread) = &self.gpu {
            thread.notify();
            if !self.fifo.wait_until_drained(self.config.stall_timeout()) {
                log::warn!(
                    "GPU sync timed out with 0x{:X} bytes queued",
                    self.fifo.distance()
                );
            }
            self.cp.update_interrupts(&mut self.pi);
        }
    }

    /// Stop the consumer and return the backend. Idempotent.
    pub fn shutdown(&mut self) -> Option<Box<dyn VideoBackend>> {
        let backend = match std::mem::replace(&mut self.gpu, GpuMode::Stopped) {
            GpuMode::Inline(consumer) => {
                self.fifo.shutdown();
                Some(consumer.into_backend())
            }
            GpuMode::Threaded(thread) => thread.stop(),
            GpuMode::Stopped => return None,
        };
        self.scheduler.close();
        self.scheduler.clear();
        log::info!("machine shut down");
        backend
    }

    // ---- gather pipe -------------------------------------------------------

    pub fn gather_pipe_write8(&mut self, value: u8) -> FifoResult<()> {
        self.gather_pipe.write8(value);
        self.flush_gather_pipe()
    }

    pub fn gather_pipe_write16(&mut self, value: u16) -> FifoResult<()> {
        self.gather_pipe.write16(value);
        self.flush_gather_pipe()
    }

    pub fn gather_pipe_write32(&mut self, value: u32) -> FifoResult<()> {
        self.gather_pipe.write32(value);
        self.flush_gather_pipe()
    }

    /// Drop staged gather-pipe bytes.
    pub fn reset_gather_pipe(&mut self) {
        self.gather_pipe.reset();
    }

    fn flush_gather_pipe(&mut self) -> FifoResult<()> {
        while let Some(chunk) = self.gather_pipe.pop_chunk() {
            if let Err(err) = self.burst(&chunk) {
                log::error!("gather pipe chunk dropped: {err}");
                return Err(err);
            }
        }
        Ok(())
    }

    /// Copy one chunk to the write pointer and notify the consumer.
    fn burst(&mut self, chunk: &[u8; CHUNK_SIZE as usize]) -> FifoResult<()> {
        if self.is_dual_core() {
            self.wait_for_space();
        }
        if self.fifo.is_shutdown() {
            return Err(FifoError::Shutdown);
        }

        let write_pointer = self.fifo.write_pointer();
        self.check_write_pointer(write_pointer);
        self.ram_mut().write_bytes(write_pointer, chunk)?;
        self.fifo.producer_advance();
        self.pi.advance_fifo_write_pointer();
        log::trace!("gather pipe burst to 0x{write_pointer:08X}");

        if self.fifo.link_enable() {
            self.run_gpu();
        }
        Ok(())
    }

    /// CP and PI must agree on where the next burst lands.
    fn check_write_pointer(&self, cp_write_pointer: u32) {
        if !self.fifo.link_enable() || !self.pi.fifo_configured() {
            return;
        }
        let pi_write_pointer = self.pi.fifo_write_pointer();
        if pi_write_pointer != cp_write_pointer {
            let err = FifoError::Desync {
                cp_write_pointer,
                pi_write_pointer,
            };
            log::error!("{err}");
            debug_assert!(false, "{err}");
        }
    }

    /// Dual-core backpressure: wait while the ring is above the cap and the
    /// consumer can still drain it.
    fn wait_for_space(&self) {
        let cap = self.fifo.producer_cap();
        if self.fifo.distance() <= cap {
            return;
        }
        if !self.fifo.wait_for_space(cap, self.config.stall_timeout()) {
            log::warn!(
                "producer stall timed out: 0x{:X} bytes queued, cap 0x{cap:X}",
                self.fifo.distance()
            );
        }
    }

    // ---- MMIO --------------------------------------------------------------

    fn mmio_read16(&mut self, device: Device, offset: u32) -> u16 {
        match device {
            Device::CommandProcessor => {
                if self.config.sync_on_register_read
                    && CommandProcessor::read_requires_sync(offset)
                {
                    self.sync_gpu();
                }
                self.cp.read16(offset)
            }
            Device::PixelEngine => self.pe.read16(offset),
            Device::ProcessorInterface => {
                let word = self.pi.read32(offset & !3);
                if offset & 2 == 0 {
                    (word >> 16) as u16
                } else {
                    word as u16
                }
            }
        }
    }

    fn mmio_write16(&mut self, device: Device, offset: u32, value: u16) {
        match device {
            Device::CommandProcessor => {
                if CommandProcessor::is_geometry_register(offset) {
                    // never move ring geometry under a running consumer
                    self.sync_gpu();
                }
                if self.cp.write16(offset, value) {
                    self.run_gpu();
                } else {
                    self.cp.update_interrupts(&mut self.pi);
                }
            }
            Device::PixelEngine => self.pe.write16(offset, value, &mut self.pi),
            Device::ProcessorInterface => {
                let aligned = offset & !3;
                if aligned == processor_interface::regs::INTERRUPT_CAUSE {
                    // write-1-to-clear: the other half must write zeros
                    let shift = if offset & 2 == 0 { 16 } else { 0 };
                    self.pi.write32(aligned, (value as u32) << shift);
                    return;
                }
                let word = self.pi.read32(aligned);
                let word = if offset & 2 == 0 {
                    (word & 0x0000_FFFF) | ((value as u32) << 16)
                } else {
                    (word & 0xFFFF_0000) | value as u32
                };
                self.pi.write32(aligned, word);
            }
        }
    }

    fn mmio_read32(&mut self, device: Device, offset: u32) -> u32 {
        match device {
            Device::ProcessorInterface => self.pi.read32(offset),
            _ => {
                let high = self.mmio_read16(device, offset) as u32;
                let low = self.mmio_read16(device, offset + 2) as u32;
                (high << 16) | low
            }
        }
    }

    fn mmio_write32(&mut self, device: Device, offset: u32, value: u32) {
        match device {
            Device::ProcessorInterface => self.pi.write32(offset, value),
            _ => {
                self.mmio_write16(device, offset, (value >> 16) as u16);
                self.mmio_write16(device, offset + 2, value as u16);
            }
        }
    }

    // ---- save states ---------------------------------------------------------

    /// Capture the register-level state. Dual-core machines sync first.
    pub fn snapshot(&mut self) -> MachineSnapshot {
        self.sync_gpu();
        MachineSnapshot {
            version: SNAPSHOT_VERSION,
            fifo: self.fifo.registers(),
            cp: self.cp.registers(),
            pe: self.pe.registers(),
            pi: self.pi.registers(),
            gather_pipe: self.gather_pipe.staged().to_vec(),
        }
    }

    /// Restore register-level state captured by [`Machine::snapshot`].
    pub fn restore(&mut self, snapshot: &MachineSnapshot) -> FifoResult<()> {
        snapshot.check_version()?;
        if snapshot.gather_pipe.len() >= CHUNK_SIZE as usize {
            return Err(FifoError::save_state(format!(
                "{} staged gather-pipe bytes, expected fewer than {CHUNK_SIZE}",
                snapshot.gather_pipe.len()
            )));
        }
        self.sync_gpu();

        self.cp.load_registers(&snapshot.cp);
        self.fifo.load_registers(&snapshot.fifo);
        self.pi.load_registers(&snapshot.pi);
        self.pe.load_registers(&snapshot.pe, &mut self.pi);
        self.gather_pipe.restore(&snapshot.gather_pipe);
        self.scheduler.clear();
        log::debug!("restored machine snapshot");

        self.run_gpu();
        Ok(())
    }
}

impl MemoryBus for Machine {
    fn read_u8(&mut self, address: u32) -> FifoResult<u8> {
        let physical = physical_address(address);
        if is_gather_pipe(physical) {
            return Ok(0);
        }
        if let Some((device, offset)) = decode_mmio(physical) {
            let half = self.mmio_read16(device, offset & !1);
            return Ok(if offset & 1 == 0 {
                (half >> 8) as u8
            } else {
                half as u8
            });
        }
        self.ram().read_u8(address)
    }

    fn read_u16(&mut self, address: u32) -> FifoResult<u16> {
        let physical = physical_address(address);
        if is_gather_pipe(physical) {
            return Ok(0);
        }
        if let Some((device, offset)) = decode_mmio(physical) {
            return Ok(self.mmio_read16(device, offset));
        }
        self.ram().read_u16(address)
    }

    fn read_u32(&mut self, address: u32) -> FifoResult<u32> {
        let physical = physical_address(address);
        if is_gather_pipe(physical) {
            return Ok(0);
        }
        if let Some((device, offset)) = decode_mmio(physical) {
            return Ok(self.mmio_read32(device, offset));
        }
        self.ram().read_u32(address)
    }

    fn write_u8(&mut self, address: u32, value: u8) -> FifoResult<()> {
        let physical = physical_address(address);
        if is_gather_pipe(physical) {
            return self.gather_pipe_write8(value);
        }
        if let Some((device, offset)) = decode_mmio(physical) {
            log::warn!("8-bit write to {device:?} register 0x{offset:02X} ignored");
            return Ok(());
        }
        self.ram_mut().write_u8(address, value)
    }

    fn write_u16(&mut self, address: u32, value: u16) -> FifoResult<()> {
        let physical = physical_address(address);
        if is_gather_pipe(physical) {
            return self.gather_pipe_write16(value);
        }
        if let Some((device, offset)) = decode_mmio(physical) {
            self.mmio_write16(device, offset, value);
            return Ok(());
        }
        self.ram_mut().write_u16(address, value)
    }

    fn write_u32(&mut self, address: u32, value: u32) -> FifoResult<()> {
        let physical = physical_address(address);
        if is_gather_pipe(physical) {
            return self.gather_pipe_write32(value);
        }
        if let Some((device, offset)) = decode_mmio(physical) {
            self.mmio_write32(device, offset, value);
            return Ok(());
        }
        self.ram_mut().write_u32(address, value)
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
