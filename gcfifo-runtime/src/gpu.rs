//! GPU Consumer
//!
//! Drains the FIFO ring into the video backend. The same
//! [`GpuConsumer::run_until_blocked`] step is used in both scheduling models:
//! single-core runs it inline on the CPU thread after every FIFO-affecting
//! event, dual-core runs it in a loop on a dedicated [`GpuThread`].
//!
//! # Consumer States
//! - **Idle**: nothing queued
//! - **ReadDisabled**: the guest turned reads off
//! - **HaltedAtBreakpoint**: the read pointer reached the breakpoint; the
//!   chunk at that address is not dispatched until the guest acknowledges
//!   the breakpoint or turns breakpoints off

use crate::hardware::fifo::{FifoRingBuffer, CHUNK_SIZE};
use crate::hardware::pixel_engine::PixelEngineHandle;
use crate::scheduler::{ScheduledEvent, ThreadsafeEventSender};
use crate::video::{FifoChunk, VideoBackend};
use gcfifo_core::error::{FifoError, FifoResult};
use gcfifo_core::memory::Ram;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

/// Guest RAM shared between the CPU side and the consumer.
pub type SharedRam = Arc<RwLock<Ram>>;

/// Why the consumer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    ReadDisabled,
    HaltedAtBreakpoint,
}

pub struct GpuConsumer {
    fifo: Arc<FifoRingBuffer>,
    ram: SharedRam,
    backend: Box<dyn VideoBackend>,
    pixel_engine: PixelEngineHandle,
    events: ThreadsafeEventSender,
    dispatched: u64,
}

impl GpuConsumer {
    pub fn new(
        fifo: Arc<FifoRingBuffer>,
        ram: SharedRam,
        backend: Box<dyn VideoBackend>,
        pixel_engine: PixelEngineHandle,
        events: ThreadsafeEventSender,
    ) -> Self {
        Self {
            fifo,
            ram,
            backend,
            pixel_engine,
            events,
            dispatched: 0,
        }
    }

    /// Chunks handed to the backend so far.
    pub fn dispatched_chunks(&self) -> u64 {
        self.dispatched
    }

    pub fn initialize(&mut self) -> FifoResult<()> {
        self.backend.initialize()
    }

    /// Shut the backend down and hand it back.
    pub fn into_backend(mut self) -> Box<dyn VideoBackend> {
        self.backend.shutdown();
        self.backend
    }

    /// Dispatch chunks until the ring is empty or consumption is blocked.
    pub fn run_until_blocked(&mut self) -> ConsumerState {
        loop {
            let fifo = &self.fifo;
            if !fifo.read_enable() {
                return ConsumerState::ReadDisabled;
            }
            if fifo.breakpoint_hit() {
                return ConsumerState::HaltedAtBreakpoint;
            }
            if fifo.distance() == 0 {
                return ConsumerState::Idle;
            }
            if fifo.at_breakpoint() && !fifo.take_breakpoint_release() {
                log::debug!(
                    "GPU: breakpoint hit at 0x{:08X}",
                    fifo.read_pointer()
                );
                fifo.latch_breakpoint();
                self.events.schedule(0, ScheduledEvent::CpUpdateInterrupts);
                fifo.notify_cpu();
                return ConsumerState::HaltedAtBreakpoint;
            }
            self.dispatch_one();
        }
    }

    fn dispatch_one(&mut self) {
        let address = self.fifo.read_pointer();
        let mut chunk = FifoChunk {
            address,
            data: [0; CHUNK_SIZE as usize],
        };
        let read = self
            .ram
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .read_bytes(address, &mut chunk.data);
        match read {
            Ok(()) => {
                log::trace!("GPU: dispatching chunk at 0x{address:08X}");
                self.backend.consume_fifo_chunk(&chunk, &self.pixel_engine);
                self.dispatched += 1;
            }
            Err(err) => log::error!("GPU: skipping chunk at 0x{address:08X}: {err}"),
        }
        self.fifo.consumer_advance();
        self.fifo.notify_cpu();
    }
}

/// Consumer running on its own host thread.
pub struct GpuThread {
    fifo: Arc<FifoRingBuffer>,
    handle: Option<JoinHandle<Box<dyn VideoBackend>>>,
}

impl GpuThread {
    pub fn spawn(mut consumer: GpuConsumer) -> FifoResult<Self> {
        let fifo = Arc::clone(&consumer.fifo);
        let events = consumer.events.clone();
        let handle = thread::Builder::new()
            .name("gpu".to_string())
            .spawn(move || {
                log::debug!("GPU thread started");
                let thread_fifo = Arc::clone(&consumer.fifo);
                loop {
                    let state = consumer.run_until_blocked();
                    if state == ConsumerState::Idle {
                        // watermark status moved while draining
                        events.schedule(0, ScheduledEvent::CpUpdateInterrupts);
                    }
                    thread_fifo.notify_cpu();
                    if !thread_fifo.wait_for_work() {
                        break;
                    }
                }
                log::debug!(
                    "GPU thread stopping after {} chunks",
                    consumer.dispatched_chunks()
                );
                consumer.into_backend()
            })
            .map_err(|err| FifoError::Host {
                message: format!("failed to spawn GPU thread: {err}"),
            })?;
        Ok(Self {
            fifo,
            handle: Some(handle),
        })
    }

    /// Wake the thread after the CPU side changed FIFO state.
    pub fn notify(&self) {
        self.fifo.notify_gpu();
    }

    /// Signal shutdown, join, and return the backend.
    pub fn stop(mut self) -> Option<Box<dyn VideoBackend>> {
        self.join()
    }

    fn join(&mut self) -> Option<Box<dyn VideoBackend>> {
        let handle = self.handle.take()?;
        self.fifo.shutdown();
        match handle.join() {
            Ok(backend) => Some(backend),
            Err(_) => {
                log::error!("GPU thread panicked");
                None
            }
        }
    }
}

impl Drop for GpuThread {
    fn drop(&mut self) {
        self.join();
    }
}
