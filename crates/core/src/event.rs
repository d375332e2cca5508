//! Events and their handles.
//!
//! An [`Event`] couples an immutable `(ts, uid, context)` key with a boxed
//! action. The cancelled/done flags live in a shared [`EventState`] so the
//! [`EventId`] handed back to the scheduler can observe and cancel the
//! event without reaching into the owning LP's queue.

use parsim_types::Time;
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as MemOrdering};
use std::sync::Arc;

/// Context sentinel for events not tied to any simulated node.
pub const NO_CONTEXT: u32 = u32::MAX;

/// Distinguishes regular timeline events from end-of-simulation destroy
/// events, which live in a separate list and only run at `destroy()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Ordinary event on an LP timeline.
    Normal,
    /// Deferred until the simulator is destroyed.
    Destroy,
}

/// Flags shared between a scheduled event and its id handles.
#[derive(Debug, Default)]
struct EventState {
    cancelled: AtomicBool,
    done: AtomicBool,
}

/// Ordering key of a scheduled event: timestamp first, insertion uid as
/// the tiebreak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey {
    /// Absolute virtual time the event fires at.
    pub ts: Time,
    /// Process-wide monotone insertion sequence number.
    pub uid: u64,
}

/// A scheduled invocable.
///
/// `ts` is absolute and immutable once the event is constructed; cross-LP
/// delivery and partition replay move the whole event, key included.
pub struct Event {
    key: EventKey,
    context: u32,
    kind: EventKind,
    state: Arc<EventState>,
    action: Box<dyn FnOnce() + Send>,
}

impl Event {
    /// Create an event firing at absolute time `ts`.
    pub fn new(ts: Time, uid: u64, context: u32, action: impl FnOnce() + Send + 'static) -> Self {
        Event {
            key: EventKey { ts, uid },
            context,
            kind: EventKind::Normal,
            state: Arc::new(EventState::default()),
            action: Box::new(action),
        }
    }

    /// Create a destroy event; it sorts to the end of virtual time and is
    /// only invoked from the facade's `destroy()`.
    pub fn destroy(ts: Time, uid: u64, action: impl FnOnce() + Send + 'static) -> Self {
        Event {
            key: EventKey { ts, uid },
            context: NO_CONTEXT,
            kind: EventKind::Destroy,
            state: Arc::new(EventState::default()),
            action: Box::new(action),
        }
    }

    /// Ordering key.
    pub fn key(&self) -> EventKey {
        self.key
    }

    /// Absolute firing time.
    pub fn ts(&self) -> Time {
        self.key.ts
    }

    /// Insertion sequence number.
    pub fn uid(&self) -> u64 {
        self.key.uid
    }

    /// Context (simulated node id) or [`NO_CONTEXT`].
    pub fn context(&self) -> u32 {
        self.context
    }

    /// True once `cancel` was called on any handle.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(MemOrdering::Acquire)
    }

    /// A handle observing this event.
    pub fn id(&self) -> EventId {
        EventId {
            key: self.key,
            context: self.context,
            kind: self.kind,
            state: Arc::clone(&self.state),
        }
    }

    /// Consume the event: mark it done and run the action unless it was
    /// cancelled. Returns whether the action actually ran.
    pub fn invoke(self) -> bool {
        self.state.done.store(true, MemOrdering::Release);
        if self.state.cancelled.load(MemOrdering::Acquire) {
            return false;
        }
        (self.action)();
        true
    }

    /// Mark the event done without running it (removal path).
    pub fn discard(self) {
        self.state.done.store(true, MemOrdering::Release);
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("ts", &self.key.ts)
            .field("uid", &self.key.uid)
            .field("context", &self.context)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Handle to a scheduled event.
///
/// Cheap to clone; all handles of one event share the same flags.
#[derive(Debug, Clone)]
pub struct EventId {
    key: EventKey,
    context: u32,
    kind: EventKind,
    state: Arc<EventState>,
}

impl EventId {
    /// Ordering key of the underlying event.
    pub fn key(&self) -> EventKey {
        self.key
    }

    /// Absolute firing time.
    pub fn ts(&self) -> Time {
        self.key.ts
    }

    /// Insertion sequence number.
    pub fn uid(&self) -> u64 {
        self.key.uid
    }

    /// Context of the underlying event.
    pub fn context(&self) -> u32 {
        self.context
    }

    /// Whether this handle refers to a destroy event.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Prevent the action from running. Safe to call at any point; a
    /// cancelled event is skipped when popped.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, MemOrdering::Release);
    }

    /// True once cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(MemOrdering::Acquire)
    }

    /// True once the event ran, was removed, or was cancelled.
    pub fn is_expired(&self) -> bool {
        self.state.done.load(MemOrdering::Acquire) || self.is_cancelled()
    }

    /// Virtual time left before the event fires; zero once expired.
    pub fn delay_left(&self, now: Time) -> Time {
        if self.is_expired() || self.key.ts <= now {
            Time::ZERO
        } else {
            self.key.ts - now
        }
    }

    /// True when both handles point at the same underlying event, not
    /// just an equal key; destroy events live outside the uid-unique
    /// queues, so key equality is not identity for them.
    pub fn same_event(&self, other: &EventId) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl PartialEq for EventId {
    fn eq(&self, other: &Self) -> bool {
        self.key.uid == other.key.uid
            && self.key.ts == other.key.ts
            && self.context == other.context
    }
}

impl Eq for EventId {}

impl PartialOrd for EventId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_invoke_runs_action_once() {
        let hits = Arc::new(AtomicU64::new(0));
        let h = Arc::clone(&hits);
        let ev = Event::new(Time::millis(1), 0, NO_CONTEXT, move || {
            h.fetch_add(1, MemOrdering::Relaxed);
        });
        let id = ev.id();

        assert!(!id.is_expired());
        assert!(ev.invoke());
        assert_eq!(hits.load(MemOrdering::Relaxed), 1);
        assert!(id.is_expired());
    }

    #[test]
    fn test_cancel_suppresses_action() {
        let hits = Arc::new(AtomicU64::new(0));
        let h = Arc::clone(&hits);
        let ev = Event::new(Time::millis(1), 0, NO_CONTEXT, move || {
            h.fetch_add(1, MemOrdering::Relaxed);
        });
        let id = ev.id();

        id.cancel();
        assert!(!ev.invoke());
        assert_eq!(hits.load(MemOrdering::Relaxed), 0);
        assert!(id.is_expired());
    }

    #[test]
    fn test_delay_left() {
        let ev = Event::new(Time::millis(10), 0, NO_CONTEXT, || {});
        let id = ev.id();

        assert_eq!(id.delay_left(Time::millis(4)), Time::millis(6));
        ev.discard();
        assert_eq!(id.delay_left(Time::millis(4)), Time::ZERO);
    }

    #[test]
    fn test_equality_is_by_key_and_context() {
        let a = Event::new(Time::millis(1), 7, 3, || {});
        let b = Event::new(Time::millis(1), 7, 3, || {});
        assert_eq!(a.id(), b.id());
        assert!(!a.id().same_event(&b.id()));
        assert!(a.id().same_event(&a.id()));
    }

    #[test]
    fn test_destroy_kind() {
        let ev = Event::destroy(Time::MAX, 1, || {});
        assert_eq!(ev.id().kind(), EventKind::Destroy);
        assert_eq!(ev.context(), NO_CONTEXT);
    }
}
