//! CPU-Timeline Event Scheduler
//!
//! Events raised on the GPU thread (PixelEngine token/finish, CP interrupt
//! recomputation) must not touch interrupt state directly. They are sent
//! through a [`ThreadsafeEventSender`] into an `mpsc` inbox and only take
//! effect when the CPU side calls [`EventScheduler::advance`].
//!
//! Pending events are ordered by due cycle, then by arrival, so events
//! scheduled for the same cycle fire in the order they were raised.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// Events applied on the CPU timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScheduledEvent {
    /// Latch the PixelEngine token interrupt.
    PeToken,
    /// Latch the PixelEngine finish interrupt.
    PeFinish,
    /// Recompute the CommandProcessor interrupt after a consumer state change.
    CpUpdateInterrupts,
}

/// Cloneable, `Send` handle for raising events from any thread.
#[derive(Debug, Clone)]
pub struct ThreadsafeEventSender {
    tx: Sender<(u64, ScheduledEvent)>,
    closed: Arc<AtomicBool>,
}

impl ThreadsafeEventSender {
    /// Queue `event` to fire `delay` cycles after the CPU next drains the
    /// inbox. Dropped silently once the scheduler is closed.
    pub fn schedule(&self, delay: u64, event: ScheduledEvent) {
        if self.closed.load(Ordering::Acquire) {
            log::debug!("scheduler closed: dropping {event:?}");
            return;
        }
        if self.tx.send((delay, event)).is_err() {
            log::debug!("scheduler gone: dropping {event:?}");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct EventScheduler {
    now: u64,
    sequence: u64,
    pending: BinaryHeap<Reverse<(u64, u64, ScheduledEvent)>>,
    inbox: Receiver<(u64, ScheduledEvent)>,
    sender: ThreadsafeEventSender,
}

impl EventScheduler {
    pub fn new() -> Self {
        let (tx, inbox) = mpsc::channel();
        Self {
            now: 0,
            sequence: 0,
            pending: BinaryHeap::new(),
            inbox,
            sender: ThreadsafeEventSender {
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
        }
    }

    /// Current virtual cycle.
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn threadsafe_sender(&self) -> ThreadsafeEventSender {
        self.sender.clone()
    }

    /// Schedule from the CPU thread.
    pub fn schedule(&mut self, delay: u64, event: ScheduledEvent) {
        let due = self.now.saturating_add(delay);
        self.pending.push(Reverse((due, self.sequence, event)));
        self.sequence += 1;
    }

    fn drain_inbox(&mut self) {
        while let Ok((delay, event)) = self.inbox.try_recv() {
            self.schedule(delay, event);
        }
    }

    /// Events not yet fired, including those still in the inbox.
    pub fn pending_len(&mut self) -> usize {
        self.drain_inbox();
        self.pending.len()
    }

    /// Move the clock forward and return every event that became due, in
    /// firing order.
    pub fn advance(&mut self, cycles: u64) -> Vec<ScheduledEvent> {
        self.drain_inbox();
        self.now = self.now.saturating_add(cycles);

        let mut due = Vec::new();
        while let Some(Reverse((when, _, event))) = self.pending.peek().copied() {
            if when > self.now {
                break;
            }
            self.pending.pop();
            due.push(event);
        }
        due
    }

    /// Stop accepting events from other threads.
    pub fn close(&self) {
        self.sender.closed.store(true, Ordering::Release);
    }

    /// Discard every pending and in-flight event.
    pub fn clear(&mut self) {
        while self.inbox.try_recv().is_ok() {}
        self.pending.clear();
    }
}

impl Default for EventScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_events_fire_in_time_then_arrival_order() {
        let mut scheduler = EventScheduler::new();
        scheduler.schedule(10, ScheduledEvent::PeFinish);
        scheduler.schedule(0, ScheduledEvent::PeToken);
        scheduler.schedule(0, ScheduledEvent::CpUpdateInterrupts);

        assert_eq!(
            scheduler.advance(0),
            vec![ScheduledEvent::PeToken, ScheduledEvent::CpUpdateInterrupts]
        );
        assert!(scheduler.advance(9).is_empty());
        assert_eq!(scheduler.advance(1), vec![ScheduledEvent::PeFinish]);
    }

    #[test]
    fn test_threadsafe_events_are_applied_on_advance() {
        let mut scheduler = EventScheduler::new();
        let sender = scheduler.threadsafe_sender();
        thread::spawn(move || sender.schedule(0, ScheduledEvent::PeToken))
            .join()
            .unwrap();
        assert_eq!(scheduler.advance(0), vec![ScheduledEvent::PeToken]);
    }

    #[test]
    fn test_closed_scheduler_drops_events() {
        let mut scheduler = EventScheduler::new();
        let sender = scheduler.threadsafe_sender();
        sender.schedule(5, ScheduledEvent::PeFinish);
        scheduler.close();
        sender.schedule(0, ScheduledEvent::PeToken);
        scheduler.clear();
        assert_eq!(scheduler.pending_len(), 0);
        assert!(scheduler.advance(100).is_empty());
    }
}
