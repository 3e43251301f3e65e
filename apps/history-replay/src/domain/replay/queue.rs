//! Time-ordered buffer of pending replay events.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::event::ReplayEvent;

/// Wrapper for `ReplayEvent` to use in `BinaryHeap` (min-heap by timestamp,
/// ties broken by insertion order).
#[derive(Debug)]
struct QueuedEvent {
    event: ReplayEvent,
    sequence: u64,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest timestamp first)
        other
            .event
            .timestamp
            .cmp(&self.event.timestamp)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Ordered multiset of pending events.
///
/// The queue itself is not synchronised; it lives inside
/// [`super::Schedule`], whose lock makes every push, pop and drain atomic
/// with respect to clock rebases.
#[derive(Debug, Default)]
pub struct ReplayQueue {
    heap: BinaryHeap<QueuedEvent>,
    next_sequence: u64,
}

impl ReplayQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an event in O(log n).
    pub fn push(&mut self, event: ReplayEvent) {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.heap.push(QueuedEvent { event, sequence });
    }

    /// Earliest event without removing it.
    #[must_use]
    pub fn peek_min(&self) -> Option<&ReplayEvent> {
        self.heap.peek().map(|queued| &queued.event)
    }

    /// Remove and return the earliest event.
    pub fn pop_min(&mut self) -> Option<ReplayEvent> {
        self.heap.pop().map(|queued| queued.event)
    }

    /// Discard every pending event, returning how many were dropped.
    pub fn drain_all(&mut self) -> usize {
        let drained = self.heap.len();
        self.heap.clear();
        drained
    }

    /// Number of pending events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl Extend<ReplayEvent> for ReplayQueue {
    fn extend<I: IntoIterator<Item = ReplayEvent>>(&mut self, iter: I) {
        for event in iter {
            self.push(event);
        }
    }
}
