//! Per-LP event queue.
//!
//! An ordered map keyed `(ts, uid)` rather than a binary heap: the facade
//! supports `remove(id)`, which needs keyed lookup, and uids are allocated
//! from one monotone process-wide counter so keys are unique and
//! same-timestamp events pop in insertion order.

use crate::{Event, EventId, EventKey};
use parsim_types::Time;
use std::collections::BTreeMap;

/// Min-ordered queue of future events for one logical process.
#[derive(Debug, Default)]
pub struct EventQueue {
    map: BTreeMap<EventKey, Event>,
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an event. Keys are unique by construction; inserting a
    /// duplicate key replaces the entry and indicates a uid-allocation bug
    /// upstream.
    pub fn insert(&mut self, event: Event) {
        debug_assert!(
            !self.map.contains_key(&event.key()),
            "duplicate event key {:?}",
            event.key()
        );
        self.map.insert(event.key(), event);
    }

    /// Remove the event `id` refers to, if it is still queued here.
    pub fn remove(&mut self, id: &EventId) -> Option<Event> {
        self.map.remove(&id.key())
    }

    /// Timestamp of the earliest event, or [`Time::MAX`] when empty.
    pub fn next_ts(&self) -> Time {
        self.map
            .keys()
            .next()
            .map(|k| k.ts)
            .unwrap_or(Time::MAX)
    }

    /// Key of the earliest event.
    pub fn peek(&self) -> Option<EventKey> {
        self.map.keys().next().copied()
    }

    /// Pop the earliest event.
    pub fn pop(&mut self) -> Option<Event> {
        let key = self.peek()?;
        self.map.remove(&key)
    }

    /// True when no events are queued.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Drain every event in `(ts, uid)` order.
    pub fn drain(&mut self) -> Vec<Event> {
        let map = std::mem::take(&mut self.map);
        map.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NO_CONTEXT;

    fn ev(ts_ms: i64, uid: u64) -> Event {
        Event::new(Time::millis(ts_ms), uid, NO_CONTEXT, || {})
    }

    #[test]
    fn test_pops_in_time_order() {
        let mut q = EventQueue::new();
        q.insert(ev(30, 0));
        q.insert(ev(10, 1));
        q.insert(ev(20, 2));

        assert_eq!(q.pop().unwrap().ts(), Time::millis(10));
        assert_eq!(q.pop().unwrap().ts(), Time::millis(20));
        assert_eq!(q.pop().unwrap().ts(), Time::millis(30));
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_fifo_tiebreak_at_same_time() {
        let mut q = EventQueue::new();
        q.insert(ev(10, 5));
        q.insert(ev(10, 3));
        q.insert(ev(10, 4));

        assert_eq!(q.pop().unwrap().uid(), 3);
        assert_eq!(q.pop().unwrap().uid(), 4);
        assert_eq!(q.pop().unwrap().uid(), 5);
    }

    #[test]
    fn test_next_ts_sentinel_when_empty() {
        let mut q = EventQueue::new();
        assert_eq!(q.next_ts(), Time::MAX);
        q.insert(ev(7, 0));
        assert_eq!(q.next_ts(), Time::millis(7));
    }

    #[test]
    fn test_remove_by_id() {
        let mut q = EventQueue::new();
        let target = ev(10, 1);
        let id = target.id();
        q.insert(ev(10, 0));
        q.insert(target);

        let removed = q.remove(&id).unwrap();
        assert_eq!(removed.uid(), 1);
        assert!(q.remove(&id).is_none());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_drain_is_ordered() {
        let mut q = EventQueue::new();
        q.insert(ev(20, 2));
        q.insert(ev(10, 1));
        q.insert(ev(10, 0));

        let keys: Vec<u64> = q.drain().iter().map(|e| e.uid()).collect();
        assert_eq!(keys, vec![0, 1, 2]);
        assert!(q.is_empty());
    }
}
