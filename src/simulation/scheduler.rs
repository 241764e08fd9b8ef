//! Time-ordered event queue.
//!
//! A `BinaryHeap` with reversed ordering keyed by `(fire_time, sequence)`.
//! The sequence number is assigned at insertion, so events sharing a fire time
//! come out in the order they were scheduled. Protocol causality relies on
//! that: a send's immediate channel-status check must run in the same instant,
//! after the send itself.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::error::SimulationError;
use super::event::{NetworkEvent, ScheduledEvent};
use super::time::SimTime;

#[derive(Debug)]
struct QueuedEvent {
    at: SimTime,
    sequence: u64,
    event: NetworkEvent,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.sequence == other.sequence
    }
}

impl Eq for QueuedEvent {}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap pops the earliest (time, sequence) first.
        other.at.cmp(&self.at).then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<QueuedEvent>,
    now: SimTime,
    next_sequence: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current logical time: the fire time of the last popped event.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule `event` at `at`. Scheduling at exactly `now` is allowed.
    pub fn schedule(&mut self, at: SimTime, event: NetworkEvent) -> Result<(), SimulationError> {
        if at < self.now {
            return Err(SimulationError::NonCausalSchedule { requested: at, now: self.now });
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(QueuedEvent { at, sequence, event });
        Ok(())
    }

    pub fn schedule_all(&mut self, events: Vec<ScheduledEvent>) -> Result<(), SimulationError> {
        for scheduled in events {
            self.schedule(scheduled.at, scheduled.event)?;
        }
        Ok(())
    }

    /// Fire time of the next event without removing it.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|e| e.at)
    }

    /// Remove the next due event and advance the clock to its fire time.
    pub fn pop_next(&mut self) -> Option<ScheduledEvent> {
        let queued = self.heap.pop()?;
        self.now = queued.at;
        Some(ScheduledEvent::new(queued.at, queued.event))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop all pending events and rewind the clock to zero.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.now = 0;
        self.next_sequence = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::event::EventKind;

    fn event(node: u32) -> NetworkEvent {
        NetworkEvent::for_node(node, EventKind::LinkCheckChannelStatus)
    }

    #[test]
    fn fifo_at_same_time() {
        let mut queue = EventQueue::new();
        queue.schedule(10, event(1)).unwrap();
        queue.schedule(10, event(2)).unwrap();
        queue.schedule(10, event(3)).unwrap();

        let order: Vec<_> = std::iter::from_fn(|| queue.pop_next()).map(|e| e.event.node().unwrap()).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn time_ordering_and_clock() {
        let mut queue = EventQueue::new();
        queue.schedule(30, event(3)).unwrap();
        queue.schedule(10, event(1)).unwrap();
        queue.schedule(20, event(2)).unwrap();

        assert_eq!(queue.peek_time(), Some(10));
        let first = queue.pop_next().unwrap();
        assert_eq!(first.at, 10);
        assert_eq!(queue.now(), 10);
        assert_eq!(queue.pop_next().unwrap().at, 20);
        assert_eq!(queue.pop_next().unwrap().at, 30);
        assert_eq!(queue.now(), 30);
        assert!(queue.pop_next().is_none());
    }

    #[test]
    fn same_instant_chain_runs_after_pending_equal_time_events() {
        let mut queue = EventQueue::new();
        queue.schedule(5, event(1)).unwrap();
        queue.schedule(5, event(2)).unwrap();
        let first = queue.pop_next().unwrap();
        assert_eq!(first.event.node(), Some(1));
        // Raised while handling event 1 at t=5: must run after event 2.
        queue.schedule(5, event(9)).unwrap();
        assert_eq!(queue.pop_next().unwrap().event.node(), Some(2));
        assert_eq!(queue.pop_next().unwrap().event.node(), Some(9));
    }

    #[test]
    fn rejects_past_schedule() {
        let mut queue = EventQueue::new();
        queue.schedule(100, event(1)).unwrap();
        queue.pop_next();
        let err = queue.schedule(50, event(2)).unwrap_err();
        assert_eq!(err, SimulationError::NonCausalSchedule { requested: 50, now: 100 });
        assert!(queue.schedule(100, event(2)).is_ok());
    }

    #[test]
    fn clear_resets_clock() {
        let mut queue = EventQueue::new();
        queue.schedule(100, event(1)).unwrap();
        queue.pop_next();
        queue.schedule(200, event(1)).unwrap();
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.now(), 0);
    }
}
