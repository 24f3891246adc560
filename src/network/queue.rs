use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

use parking_lot::Mutex;

use crate::network::Frame;

/// Identifier of one simplex link endpoint. Port `n` maps onto localhost TCP
/// port `port_base + n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub u16);

/// Ingress marker for self-delivered frames (synthesized NACKs) that never
/// crossed the wire.
pub const LOOPBACK: PortId = PortId(u16::MAX);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Priority-ordered queue of `(port, frame)` entries handed off between two
/// device loops.
///
/// The higher numeric priority value dequeues first; entries of equal
/// priority dequeue in arrival order (FIFO), enforced through a monotonic
/// arrival counter.
#[derive(Debug, Default)]
pub struct FrameQueue {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    heap: BinaryHeap<Entry>,
    arrivals: u64,
}

#[derive(Debug)]
struct Entry {
    priority: u8,
    arrival: u64,
    port: PortId,
    frame: Frame,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.arrival == other.arrival
    }
}

impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.arrival.cmp(&self.arrival))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FrameQueue {
    pub fn new() -> FrameQueue {
        FrameQueue::default()
    }

    pub fn push(&self, port: PortId, frame: Frame) {
        let mut inner = self.inner.lock();
        let arrival = inner.arrivals;
        inner.arrivals += 1;
        let priority = frame.priority;
        inner.heap.push(Entry {
            priority,
            arrival,
            port,
            frame,
        });
    }

    pub fn pop(&self) -> Option<(PortId, Frame)> {
        self.inner
            .lock()
            .heap
            .pop()
            .map(|entry| (entry.port, entry.frame))
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }
}
