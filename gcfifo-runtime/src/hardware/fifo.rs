//! FIFO Ring Buffer
//!
//! The command ring shared by the CPU-side producer (gather-pipe bursts) and
//! the GPU-side consumer. Both sides reference one `Arc<FifoRingBuffer>`;
//! the CommandProcessor is the only writer of geometry and control flags.
//!
//! # Concurrency
//! Every field is an atomic. Pointers and flags are published with
//! `Release` and read with `Acquire`; the read-write distance is updated
//! with read-modify-write operations so that producer and consumer never
//! lose each other's increments.
//!
//! Blocking (consumer waiting for work, producer waiting for space, CPU
//! waiting for the consumer to drain) uses one mutex and two condition
//! variables. State is always mutated *before* the mutex is taken to notify,
//! and always re-checked under the mutex before waiting, so a wakeup cannot
//! be lost.
//!
//! # Ring Geometry
//! `end` is exclusive: pointers live in `[base, end)` and a pointer that
//! reaches `end` wraps to `base`. Because a full ring has `write == read`,
//! the distance is tracked incrementally instead of being derived from the
//! pointers; [`FifoRingBuffer::recompute_distance`] is only used when the
//! guest rewrites geometry.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Size of one FIFO command chunk.
pub const CHUNK_SIZE: u32 = 32;

/// Mask applied to guest-written FIFO pointers: 26-bit physical, 32-byte aligned.
pub const POINTER_MASK: u32 = 0x03FF_FFE0;

/// Low bits ignored when comparing the read pointer against the breakpoint.
const CHUNK_OFFSET_MASK: u32 = CHUNK_SIZE - 1;

/// Plain copy of every ring field, used by save states and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FifoRegisters {
    pub base: u32,
    pub end: u32,
    pub hi_watermark: u32,
    pub lo_watermark: u32,
    pub write_pointer: u32,
    pub read_pointer: u32,
    pub breakpoint: u32,
    pub distance: u32,
    pub read_enable: bool,
    pub link_enable: bool,
    pub breakpoint_enable: bool,
    pub breakpoint_hit: bool,
    pub breakpoint_released: bool,
}

/// Shared command ring.
#[derive(Debug, Default)]
pub struct FifoRingBuffer {
    base: AtomicU32,
    end: AtomicU32,
    hi_watermark: AtomicU32,
    lo_watermark: AtomicU32,
    write_pointer: AtomicU32,
    read_pointer: AtomicU32,
    breakpoint: AtomicU32,
    distance: AtomicU32,

    read_enable: AtomicBool,
    link_enable: AtomicBool,
    breakpoint_enable: AtomicBool,
    breakpoint_hit: AtomicBool,
    /// Set when the guest acknowledges a breakpoint; lets the consumer
    /// dispatch the chunk at the breakpoint address once.
    breakpoint_released: AtomicBool,

    shutdown: AtomicBool,
    sync: Mutex<()>,
    gpu_wake: Condvar,
    cpu_wake: Condvar,
}

/// Next chunk position, wrapping at the exclusive `end`.
#[inline]
pub fn next_pointer(pointer: u32, base: u32, end: u32) -> u32 {
    let next = pointer.wrapping_add(CHUNK_SIZE);
    if next >= end {
        base
    } else {
        next
    }
}

impl FifoRingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- geometry -------------------------------------------------------

    #[inline]
    pub fn base(&self) -> u32 {
        self.base.load(Ordering::Acquire)
    }

    #[inline]
    pub fn end(&self) -> u32 {
        self.end.load(Ordering::Acquire)
    }

    /// Ring size in bytes (`end - base`), zero while unconfigured.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.end().saturating_sub(self.base())
    }

    #[inline]
    pub fn hi_watermark(&self) -> u32 {
        self.hi_watermark.load(Ordering::Acquire)
    }

    #[inline]
    pub fn lo_watermark(&self) -> u32 {
        self.lo_watermark.load(Ordering::Acquire)
    }

    #[inline]
    pub fn write_pointer(&self) -> u32 {
        self.write_pointer.load(Ordering::Acquire)
    }

    #[inline]
    pub fn read_pointer(&self) -> u32 {
        self.read_pointer.load(Ordering::Acquire)
    }

    #[inline]
    pub fn breakpoint(&self) -> u32 {
        self.breakpoint.load(Ordering::Acquire)
    }

    /// Unconsumed bytes in the ring.
    #[inline]
    pub fn distance(&self) -> u32 {
        self.distance.load(Ordering::Acquire)
    }

    pub fn set_base(&self, value: u32) {
        self.base.store(value & POINTER_MASK, Ordering::Release);
    }

    pub fn set_end(&self, value: u32) {
        self.end.store(value & POINTER_MASK, Ordering::Release);
    }

    pub fn set_hi_watermark(&self, value: u32) {
        self.hi_watermark.store(value & POINTER_MASK, Ordering::Release);
    }

    pub fn set_lo_watermark(&self, value: u32) {
        self.lo_watermark.store(value & POINTER_MASK, Ordering::Release);
    }

    pub fn set_write_pointer(&self, value: u32) {
        self.write_pointer.store(value & POINTER_MASK, Ordering::Release);
    }

    /// Moving the read pointer forfeits a pending breakpoint release.
    pub fn set_read_pointer(&self, value: u32) {
        let value = value & POINTER_MASK;
        if self.read_pointer.swap(value, Ordering::AcqRel) != value {
            self.breakpoint_released.store(false, Ordering::Release);
        }
    }

    /// A release only covers the breakpoint it acknowledged.
    pub fn set_breakpoint(&self, value: u32) {
        let value = value & POINTER_MASK;
        if self.breakpoint.swap(value, Ordering::AcqRel) != value {
            self.breakpoint_released.store(false, Ordering::Release);
        }
    }

    /// Derive the distance from the pointers after a guest geometry write.
    ///
    /// `write == read` is taken as empty; a full ring can only be observed
    /// through incremental tracking.
    pub fn recompute_distance(&self) {
        let (base, end) = (self.base(), self.end());
        let (wp, rp) = (self.write_pointer(), self.read_pointer());
        let capacity = end.saturating_sub(base);
        let distance = if wp >= rp {
            wp - rp
        } else {
            capacity.wrapping_sub(rp - wp)
        };
        let distance = if capacity > 0 {
            distance.min(capacity)
        } else {
            0
        };
        self.distance.store(distance, Ordering::Release);
    }

    // ---- control flags --------------------------------------------------

    #[inline]
    pub fn read_enable(&self) -> bool {
        self.read_enable.load(Ordering::Acquire)
    }

    #[inline]
    pub fn link_enable(&self) -> bool {
        self.link_enable.load(Ordering::Acquire)
    }

    #[inline]
    pub fn breakpoint_enable(&self) -> bool {
        self.breakpoint_enable.load(Ordering::Acquire)
    }

    #[inline]
    pub fn breakpoint_hit(&self) -> bool {
        self.breakpoint_hit.load(Ordering::Acquire)
    }

    pub fn set_read_enable(&self, enabled: bool) {
        self.read_enable.store(enabled, Ordering::Release);
    }

    pub fn set_link_enable(&self, enabled: bool) {
        self.link_enable.store(enabled, Ordering::Release);
    }

    /// Turning breakpoints off also drops any latched hit.
    pub fn set_breakpoint_enable(&self, enabled: bool) {
        self.breakpoint_enable.store(enabled, Ordering::Release);
        if !enabled {
            self.breakpoint_hit.store(false, Ordering::Release);
            self.breakpoint_released.store(false, Ordering::Release);
        }
    }

    /// Latch a breakpoint hit (consumer side).
    pub fn latch_breakpoint(&self) {
        self.breakpoint_hit.store(true, Ordering::Release);
    }

    /// Guest acknowledged the breakpoint. Returns whether one was latched.
    pub fn acknowledge_breakpoint(&self) -> bool {
        let was_hit = self.breakpoint_hit.swap(false, Ordering::AcqRel);
        if was_hit {
            self.breakpoint_released.store(true, Ordering::Release);
        }
        was_hit
    }

    /// Consume the one-shot release granted by [`Self::acknowledge_breakpoint`].
    pub fn take_breakpoint_release(&self) -> bool {
        self.breakpoint_released.swap(false, Ordering::AcqRel)
    }

    /// Read pointer sits on the breakpoint chunk and breakpoints are enabled.
    pub fn at_breakpoint(&self) -> bool {
        self.breakpoint_enable()
            && (self.read_pointer() & !CHUNK_OFFSET_MASK)
                == (self.breakpoint() & !CHUNK_OFFSET_MASK)
    }

    /// Consumer is allowed to move (enabled and not halted).
    #[inline]
    pub fn consumer_can_progress(&self) -> bool {
        self.read_enable() && !self.breakpoint_hit()
    }

    /// Consumer has something to do right now.
    #[inline]
    pub fn has_work(&self) -> bool {
        self.consumer_can_progress() && self.distance() > 0
    }

    // ---- pointer movement -----------------------------------------------

    /// Producer side: one chunk was written at the write pointer.
    ///
    /// The distance saturates at the ring capacity; when the link is off
    /// nothing consumes and the producer simply overwrites old data.
    pub fn producer_advance(&self) {
        let (base, end) = (self.base(), self.end());
        let capacity = end.saturating_sub(base);
        let wp = self.write_pointer();
        self.write_pointer
            .store(next_pointer(wp, base, end), Ordering::Release);

        let previous = self
            .distance
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| {
                Some(d.saturating_add(CHUNK_SIZE).min(capacity))
            })
            .unwrap_or_else(|d| d);
        if previous + CHUNK_SIZE > capacity && self.link_enable() {
            log::warn!(
                "FIFO overflow: producer overran consumer (distance 0x{previous:X}, capacity 0x{capacity:X})"
            );
        }
    }

    /// Consumer side: one chunk at the read pointer was dispatched.
    pub fn consumer_advance(&self) {
        let (base, end) = (self.base(), self.end());
        let rp = self.read_pointer();
        self.read_pointer
            .store(next_pointer(rp, base, end), Ordering::Release);
        let previous = self
            .distance
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| {
                Some(d.saturating_sub(CHUNK_SIZE))
            })
            .unwrap_or_else(|d| d);
        if previous < CHUNK_SIZE {
            log::warn!("FIFO underflow: consumer advanced with distance 0x{previous:X}");
        }
    }

    /// Producer cap used for backpressure in dual-core mode.
    pub fn producer_cap(&self) -> u32 {
        let capacity = self.capacity();
        let hi = self.hi_watermark();
        if hi == 0 || hi >= capacity {
            capacity.saturating_sub(CHUNK_SIZE)
        } else {
            hi
        }
    }

    // ---- snapshots ------------------------------------------------------

    pub fn registers(&self) -> FifoRegisters {
        FifoRegisters {
            base: self.base(),
            end: self.end(),
            hi_watermark: self.hi_watermark(),
            lo_watermark: self.lo_watermark(),
            write_pointer: self.write_pointer(),
            read_pointer: self.read_pointer(),
            breakpoint: self.breakpoint(),
            distance: self.distance(),
            read_enable: self.read_enable(),
            link_enable: self.link_enable(),
            breakpoint_enable: self.breakpoint_enable(),
            breakpoint_hit: self.breakpoint_hit(),
            breakpoint_released: self.breakpoint_released.load(Ordering::Acquire),
        }
    }

    /// Overwrite every field. Callers must make sure the consumer is blocked.
    pub fn load_registers(&self, regs: &FifoRegisters) {
        self.set_base(regs.base);
        self.set_end(regs.end);
        self.set_hi_watermark(regs.hi_watermark);
        self.set_lo_watermark(regs.lo_watermark);
        self.set_write_pointer(regs.write_pointer);
        self.set_read_pointer(regs.read_pointer);
        self.set_breakpoint(regs.breakpoint);
        self.distance.store(
            regs.distance.min(self.capacity()),
            Ordering::Release,
        );
        self.set_read_enable(regs.read_enable);
        self.set_link_enable(regs.link_enable);
        self.breakpoint_enable
            .store(regs.breakpoint_enable, Ordering::Release);
        self.breakpoint_hit
            .store(regs.breakpoint_hit, Ordering::Release);
        self.breakpoint_released
            .store(regs.breakpoint_released, Ordering::Release);
    }

    // ---- blocking -------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.sync.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake the consumer after the producer or a register write changed state.
    pub fn notify_gpu(&self) {
        let _guard = self.lock();
        self.gpu_wake.notify_all();
    }

    /// Wake the CPU side after the consumer moved or halted.
    pub fn notify_cpu(&self) {
        let _guard = self.lock();
        self.cpu_wake.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop both sides and release every waiter.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let _guard = self.lock();
        self.gpu_wake.notify_all();
        self.cpu_wake.notify_all();
    }

    /// Consumer side: block until there is work. Returns `false` on shutdown.
    pub fn wait_for_work(&self) -> bool {
        let mut guard = self.lock();
        loop {
            if self.is_shutdown() {
                return false;
            }
            if self.has_work() {
                return true;
            }
            guard = self
                .gpu_wake
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Producer side: block while more than `cap` bytes are queued and the
    /// consumer can still drain them.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_for_space(&self, cap: u32, timeout: Option<Duration>) -> bool {
        self.wait_cpu_until(timeout, || self.distance() <= cap)
    }

    /// CPU side: block until the consumer is idle or blocked.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_until_drained(&self, timeout: Option<Duration>) -> bool {
        self.wait_cpu_until(timeout, || self.distance() == 0)
    }

    fn wait_cpu_until(&self, timeout: Option<Duration>, done: impl Fn() -> bool) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.lock();
        loop {
            if self.is_shutdown() || done() || !self.consumer_can_progress() {
                return true;
            }
            match deadline {
                None => {
                    guard = self
                        .cpu_wake
                        .wait(guard)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    guard = self
                        .cpu_wake
                        .wait_timeout(guard, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }
}
