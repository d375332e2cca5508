//! Logical processes: the unit of parallelism.
//!
//! An LP owns a single-threaded event timeline. During a round it is
//! touched by exactly one worker; everything another LP may do to it goes
//! through the inbox channel. The state mutex is never held across an
//! event invocation, so events are free to reenter the scheduling API.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use parsim_core::{Event, EventId, EventQueue, NO_CONTEXT};
use parsim_types::{LpId, Time};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::trace;

/// State touched only by the worker currently driving this LP (or by the
/// coordinator between rounds).
struct LpState {
    clock: Time,
    scheduled: EventQueue,
    current_context: u32,
}

/// A single-threaded event timeline with its own virtual clock.
pub struct LogicalProcess {
    id: LpId,
    state: Mutex<LpState>,
    /// Cross-LP delivery channel; senders are other LPs, the receiver is
    /// drained by the owning worker and by the coordinator between rounds.
    inbox_tx: Sender<Event>,
    inbox_rx: Receiver<Event>,
    /// Minimum extra delay any event leaving this LP must incur.
    lookahead: Time,
    stop: AtomicBool,
    processed: AtomicU64,
}

impl LogicalProcess {
    /// Create an LP starting at virtual time zero.
    pub fn new(id: LpId, lookahead: Time) -> Self {
        let (inbox_tx, inbox_rx) = crossbeam_channel::unbounded();
        LogicalProcess {
            id,
            state: Mutex::new(LpState {
                clock: Time::ZERO,
                scheduled: EventQueue::new(),
                current_context: NO_CONTEXT,
            }),
            inbox_tx,
            inbox_rx,
            lookahead,
            stop: AtomicBool::new(false),
            processed: AtomicU64::new(0),
        }
    }

    /// This LP's registry index.
    pub fn id(&self) -> LpId {
        self.id
    }

    /// Published lookahead of this LP's outgoing inter-LP edges.
    pub fn lookahead(&self) -> Time {
        self.lookahead
    }

    /// Current virtual time.
    pub fn now(&self) -> Time {
        self.state.lock().clock
    }

    /// Context of the event currently (or last) executed here.
    pub fn current_context(&self) -> u32 {
        self.state.lock().current_context
    }

    /// Schedule an event `delay` after this LP's clock, inheriting the
    /// currently executing context.
    pub fn schedule(
        &self,
        uid: u64,
        delay: Time,
        action: impl FnOnce() + Send + 'static,
    ) -> EventId {
        let mut state = self.state.lock();
        let ts = state.clock + delay;
        let event = Event::new(ts, uid, state.current_context, action);
        let id = event.id();
        state.scheduled.insert(event);
        id
    }

    /// Schedule locally with an explicit context.
    pub fn schedule_with_context(
        &self,
        uid: u64,
        context: u32,
        delay: Time,
        action: impl FnOnce() + Send + 'static,
    ) -> EventId {
        let mut state = self.state.lock();
        let ts = state.clock + delay;
        let event = Event::new(ts, uid, context, action);
        let id = event.id();
        state.scheduled.insert(event);
        id
    }

    /// Deliver an event produced by another LP. The timestamp is absolute;
    /// the event joins `scheduled` at the next inbox drain.
    pub fn enqueue_remote(&self, event: Event) {
        // Receiver lives as long as self, so the send cannot fail.
        let _ = self.inbox_tx.send(event);
    }

    /// Insert an event directly with its existing `(ts, uid)` key.
    /// Single-threaded callers only (partition replay).
    pub fn insert_staged(&self, event: Event) {
        self.state.lock().scheduled.insert(event);
    }

    /// Best-effort removal: drop the event from the local queue, or mark
    /// it cancelled if it is queued elsewhere.
    pub fn remove(&self, id: &EventId) {
        let removed = self.state.lock().scheduled.remove(id);
        match removed {
            Some(event) => event.discard(),
            None => id.cancel(),
        }
    }

    /// Execute an event synchronously at the current clock (partition
    /// replay of initialization events).
    pub fn invoke_now(&self, event: Event) {
        {
            let mut state = self.state.lock();
            state.current_context = event.context();
        }
        if event.invoke() {
            self.processed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Earliest pending event time, or [`Time::MAX`] when this LP has
    /// nothing to do (or was stopped). Drains the inbox first so events
    /// delivered since the last round are visible.
    pub fn next_time(&self) -> Time {
        if self.is_stopped() {
            return Time::MAX;
        }
        let mut state = self.state.lock();
        Self::drain_inbox(&self.inbox_rx, &mut state.scheduled);
        state.scheduled.next_ts()
    }

    /// Process every event with `ts <= horizon`.
    ///
    /// The stop flag is observed here, at round entry, so a stop issued
    /// mid-round never splits a time step: every LP either processes its
    /// whole window or none of it. A stopped LP still accepts in-flight
    /// cross-LP deliveries for clean shutdown.
    pub fn process_round(&self, horizon: Time) {
        if self.is_stopped() {
            let mut state = self.state.lock();
            Self::drain_inbox(&self.inbox_rx, &mut state.scheduled);
            return;
        }

        let mut executed = 0u64;
        loop {
            let event = {
                let mut state = self.state.lock();
                Self::drain_inbox(&self.inbox_rx, &mut state.scheduled);
                match state.scheduled.peek() {
                    Some(key) if key.ts <= horizon => {
                        let event = state.scheduled.pop().expect("peeked event present");
                        state.clock = event.ts();
                        state.current_context = event.context();
                        event
                    }
                    _ => break,
                }
            };
            // Invoke outside the state lock: the action may reenter the
            // scheduling API on this same LP.
            if event.invoke() {
                executed += 1;
            }
        }
        if executed > 0 {
            self.processed.fetch_add(executed, Ordering::Relaxed);
            trace!(lp = %self.id, executed, %horizon, "round complete");
        }

        let mut state = self.state.lock();
        Self::drain_inbox(&self.inbox_rx, &mut state.scheduled);
    }

    /// Stop this LP: it reports [`Time::MAX`] as its next event time and
    /// skips subsequent rounds.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// True once `stop` was called.
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// True when this LP no longer contributes work: stopped, or out of
    /// both queued and in-flight events.
    pub fn is_finished(&self) -> bool {
        if self.is_stopped() {
            return true;
        }
        let state = self.state.lock();
        state.scheduled.is_empty() && self.inbox_rx.is_empty()
    }

    /// Number of non-cancelled events invoked here.
    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Drain the whole queue in `(ts, uid)` order (registry resize).
    pub fn drain_scheduled(&self) -> Vec<Event> {
        let mut state = self.state.lock();
        Self::drain_inbox(&self.inbox_rx, &mut state.scheduled);
        state.scheduled.drain()
    }

    fn drain_inbox(inbox: &Receiver<Event>, scheduled: &mut EventQueue) {
        while let Ok(event) = inbox.try_recv() {
            scheduled.insert(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    #[test]
    fn test_schedule_and_process_in_order() {
        let lp = LogicalProcess::new(LpId(1), Time::ZERO);
        let log = Arc::new(Mutex::new(Vec::new()));

        for (uid, delay) in [(0u64, 30i64), (1, 10), (2, 20)] {
            let log = Arc::clone(&log);
            lp.schedule(uid, Time::millis(delay), move || log.lock().push(uid));
        }

        lp.process_round(Time::millis(100));
        assert_eq!(*log.lock(), vec![1, 2, 0]);
        assert_eq!(lp.now(), Time::millis(30));
        assert_eq!(lp.processed_count(), 3);
    }

    #[test]
    fn test_horizon_bounds_execution() {
        let lp = LogicalProcess::new(LpId(1), Time::ZERO);
        let hits = Arc::new(AtomicU64::new(0));

        for (uid, delay) in [(0u64, 5i64), (1, 15)] {
            let hits = Arc::clone(&hits);
            lp.schedule(uid, Time::millis(delay), move || {
                hits.fetch_add(1, Ordering::Relaxed);
            });
        }

        lp.process_round(Time::millis(10));
        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert_eq!(lp.next_time(), Time::millis(15));

        lp.process_round(Time::millis(20));
        assert_eq!(hits.load(Ordering::Relaxed), 2);
        assert_eq!(lp.next_time(), Time::MAX);
    }

    #[test]
    fn test_remote_delivery_joins_queue() {
        let lp = LogicalProcess::new(LpId(2), Time::ZERO);
        let hits = Arc::new(AtomicU64::new(0));
        let h = Arc::clone(&hits);

        lp.enqueue_remote(Event::new(Time::millis(3), 9, NO_CONTEXT, move || {
            h.fetch_add(1, Ordering::Relaxed);
        }));

        assert_eq!(lp.next_time(), Time::millis(3));
        lp.process_round(Time::millis(3));
        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert!(lp.is_finished());
    }

    #[test]
    fn test_cancelled_event_is_skipped() {
        let lp = LogicalProcess::new(LpId(1), Time::ZERO);
        let hits = Arc::new(AtomicU64::new(0));
        let h = Arc::clone(&hits);

        let id = lp.schedule(0, Time::millis(1), move || {
            h.fetch_add(1, Ordering::Relaxed);
        });
        id.cancel();

        lp.process_round(Time::millis(10));
        assert_eq!(hits.load(Ordering::Relaxed), 0);
        assert_eq!(lp.processed_count(), 0);
        assert!(id.is_expired());
    }

    #[test]
    fn test_stopped_lp_reports_idle_but_accepts_deliveries() {
        let lp = LogicalProcess::new(LpId(1), Time::ZERO);
        lp.schedule(0, Time::millis(1), || {});
        lp.stop();

        assert_eq!(lp.next_time(), Time::MAX);
        assert!(lp.is_finished());

        lp.enqueue_remote(Event::new(Time::millis(2), 1, NO_CONTEXT, || {}));
        lp.process_round(Time::millis(10));
        // Delivered into the queue, not invoked.
        assert_eq!(lp.processed_count(), 0);
    }

    #[test]
    fn test_clock_never_decreases() {
        let lp = LogicalProcess::new(LpId(1), Time::ZERO);
        lp.schedule(0, Time::millis(5), || {});
        lp.schedule(1, Time::millis(9), || {});

        lp.process_round(Time::millis(6));
        let after_first = lp.now();
        lp.process_round(Time::millis(20));
        assert!(lp.now() >= after_first);
    }
}
