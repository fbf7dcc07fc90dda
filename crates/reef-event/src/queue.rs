//! Bounded lock-free queues between the RT thread and everything else
//!
//! Both directions are `crossbeam`'s array queue (bounded, cache-padded
//! indices, CAS producers). Pushes never block; a full queue drops the
//! event and bumps an atomic overflow counter.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::ArrayQueue;

use crate::event::{Event, OutboundRtEvent};

/// Default inbound (non-RT → RT) queue capacity
pub const IN_QUEUE_CAPACITY: usize = 1024;

/// Default outbound (RT → non-RT) queue capacity
pub const OUT_QUEUE_CAPACITY: usize = 4096;

/// Default capacity of the deferred-event heap on the RT side
pub const PENDING_CAPACITY: usize = 512;

/// Multi-producer inbound queue of rich events, consumed by the RT thread
pub struct EventFifo {
    queue: ArrayQueue<Event>,
    dropped: AtomicU64,
}

impl EventFifo {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.next_power_of_two()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Non-RT push; drops and counts when full
    pub fn push(&self, event: Event) -> bool {
        match self.queue.push(event) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// RT pop
    #[inline]
    pub fn pop(&self) -> Option<Event> {
        self.queue.pop()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Outbound queue of RT events headed for the dispatcher thread
pub struct OutboundFifo {
    queue: ArrayQueue<OutboundRtEvent>,
    dropped: AtomicU64,
}

impl OutboundFifo {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.next_power_of_two()),
            dropped: AtomicU64::new(0),
        }
    }

    /// RT push; drops and counts when full
    #[inline]
    pub fn push(&self, event: OutboundRtEvent) -> bool {
        match self.queue.push(event) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Dispatcher pop
    pub fn pop(&self) -> Option<OutboundRtEvent> {
        self.queue.pop()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Heap entry ordered by (timestamp, arrival sequence) so identical
/// timestamps replay in insertion order
struct PendingEvent {
    timestamp: u64,
    seq: u64,
    event: Event,
}

impl PartialEq for PendingEvent {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.seq == other.seq
    }
}

impl Eq for PendingEvent {}

impl PartialOrd for PendingEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.timestamp, self.seq).cmp(&(other.timestamp, other.seq))
    }
}

/// RT-side consumer state: drains the inbound queue each block, delivers
/// events due inside the block in timestamp order, and parks events
/// timestamped beyond the block horizon for a later block.
pub struct RtEventDrain {
    pending: BinaryHeap<Reverse<PendingEvent>>,
    capacity: usize,
    seq: u64,
    overflowed: u64,
}

impl RtEventDrain {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: BinaryHeap::with_capacity(capacity),
            capacity,
            seq: 0,
            overflowed: 0,
        }
    }

    /// Pull everything currently queued plus anything parked from earlier
    /// blocks, and hand events with `timestamp < horizon_end` to `deliver`
    /// in (timestamp, insertion) order. Later events stay parked.
    ///
    /// Runs on the RT thread; the heap is preallocated and events beyond
    /// its capacity are dropped and counted.
    pub fn drain(&mut self, fifo: &EventFifo, horizon_end: u64, mut deliver: impl FnMut(Event)) {
        while let Some(event) = fifo.pop() {
            if self.pending.len() == self.capacity {
                self.overflowed += 1;
                continue;
            }
            let timestamp = event.timestamp;
            let seq = self.seq;
            self.seq += 1;
            self.pending.push(Reverse(PendingEvent {
                timestamp,
                seq,
                event,
            }));
        }

        while let Some(Reverse(head)) = self.pending.peek() {
            if head.timestamp >= horizon_end {
                break;
            }
            if let Some(Reverse(entry)) = self.pending.pop() {
                deliver(entry.event);
            }
        }
    }

    /// Events dropped because the deferred heap was full
    pub fn overflowed(&self) -> u64 {
        self.overflowed
    }

    /// Deferred events currently parked
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
