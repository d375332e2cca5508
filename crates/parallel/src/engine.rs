//! LP registry and worker pool.
//!
//! The engine owns the logical processes and the long-lived worker
//! threads. One round: compute the smallest pending event time, widen it
//! by the minimum lookahead into the granted horizon `T*`, push every
//! ready LP onto the shared work queue, and wait for as many completion
//! reports as tasks were dispatched (the round barrier). Idle workers
//! pull whatever LP is next, so a skewed partition still spreads over all
//! cores.

use crate::lp::LogicalProcess;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, MutexGuard, RwLock};
use parsim_core::Event;
use parsim_types::{LpId, Time};
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace};

thread_local! {
    /// The LP whose event is executing on this thread, if any. Schedules
    /// issued from inside an event route through it; everything else
    /// (host setup code, tests) falls back to the public LP.
    static CURRENT_LP: RefCell<Option<Arc<LogicalProcess>>> = const { RefCell::new(None) };
}

/// One unit of round work: an LP and the horizon it may advance to.
struct RoundTask {
    lp: Arc<LogicalProcess>,
    horizon: Time,
}

/// Long-lived worker threads fed from a shared task channel.
struct WorkerPool {
    task_tx: Sender<RoundTask>,
    done_rx: Receiver<LpId>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn spawn(thread_count: usize) -> Self {
        let (task_tx, task_rx) = crossbeam_channel::unbounded::<RoundTask>();
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<LpId>();

        let handles = (0..thread_count)
            .map(|index| {
                let task_rx = task_rx.clone();
                let done_tx = done_tx.clone();
                thread::Builder::new()
                    .name(format!("parsim-worker-{index}"))
                    .spawn(move || worker_loop(&task_rx, &done_tx))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        WorkerPool {
            task_tx,
            done_rx,
            handles,
        }
    }

    /// Close the task channel and join every worker.
    fn shutdown(self) {
        drop(self.task_tx);
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(task_rx: &Receiver<RoundTask>, done_tx: &Sender<LpId>) {
    while let Ok(task) = task_rx.recv() {
        let id = task.lp.id();
        CURRENT_LP.with(|current| *current.borrow_mut() = Some(Arc::clone(&task.lp)));
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            task.lp.process_round(task.horizon);
        }));
        CURRENT_LP.with(|current| *current.borrow_mut() = None);

        // Event failures never propagate back into the scheduler; a
        // panicking event takes the whole process down.
        if outcome.is_err() {
            error!(lp = %id, "event invocation panicked, aborting");
            std::process::abort();
        }
        let _ = done_tx.send(id);
    }
}

/// The LP registry plus the parallel execution machinery.
pub struct MtpEngine {
    /// LPs indexed by id; slot 0 is the public LP. Immutable between
    /// `enable_new` calls.
    registry: RwLock<Vec<Arc<LogicalProcess>>>,
    pool: Mutex<Option<WorkerPool>>,
    /// Process-wide critical section for operations that must appear
    /// atomic to all LPs outside event execution.
    critical: Mutex<()>,
    /// Monotone insertion-sequence allocator shared by every LP, so
    /// `(ts, uid)` keys are unique engine-wide and survive replay.
    next_uid: AtomicU64,
    /// Virtual-time bound on the granted horizon; `i64::MAX` when unset.
    stop_time: AtomicI64,
    /// Set by `stop_all`, applied to the LPs at the next round boundary so
    /// a stop issued mid-round never splits a time step across LPs.
    stop_requested: AtomicBool,
}

impl MtpEngine {
    /// Create a disabled engine; call [`enable`](Self::enable) before
    /// scheduling.
    pub fn new() -> Self {
        MtpEngine {
            registry: RwLock::new(Vec::new()),
            pool: Mutex::new(None),
            critical: Mutex::new(()),
            next_uid: AtomicU64::new(0),
            stop_time: AtomicI64::new(i64::MAX),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Start `min(max_threads, max(1, lp_count))` workers and create the
    /// public LP plus `lp_count` real LPs.
    pub fn enable(&self, max_threads: usize, lp_count: u32) {
        let threads = max_threads.min((lp_count as usize).max(1));
        {
            let mut registry = self.registry.write();
            debug_assert!(registry.is_empty(), "enable called twice");
            for id in 0..=lp_count {
                registry.push(Arc::new(LogicalProcess::new(LpId(id), Time::ZERO)));
            }
        }
        *self.pool.lock() = Some(WorkerPool::spawn(threads));
        debug!(threads, lp_count, "engine enabled");
    }

    /// Resize the registry once the partitioner knows the real LP count.
    ///
    /// Returns the events staged on the public LP so the caller can replay
    /// them onto the new LPs; their `(ts, uid)` keys are preserved.
    pub fn enable_new(&self, threads: usize, lp_count: u32, lookahead: Time) -> Vec<Event> {
        let _cs = self.critical_section();

        let staged = {
            let registry = self.registry.read();
            registry
                .first()
                .map(|lp| lp.drain_scheduled())
                .unwrap_or_default()
        };

        {
            let mut registry = self.registry.write();
            registry.clear();
            for id in 0..=lp_count {
                registry.push(Arc::new(LogicalProcess::new(LpId(id), lookahead)));
            }
        }

        let mut pool = self.pool.lock();
        if let Some(old) = pool.take() {
            old.shutdown();
        }
        *pool = Some(WorkerPool::spawn(threads));
        debug!(threads, lp_count, %lookahead, staged = staged.len(), "registry resized");
        staged
    }

    /// Stop workers and destroy the LPs. Workers are joined before the
    /// registry is dropped.
    pub fn disable(&self) {
        if let Some(pool) = self.pool.lock().take() {
            pool.shutdown();
        }
        self.registry.write().clear();
        debug!("engine disabled");
    }

    /// Allocate the next insertion sequence number.
    pub fn next_uid(&self) -> u64 {
        self.next_uid.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of LPs, public LP included.
    pub fn len(&self) -> usize {
        self.registry.read().len()
    }

    /// True before `enable`.
    pub fn is_empty(&self) -> bool {
        self.registry.read().is_empty()
    }

    /// Look up an LP by id. A context that maps outside the registry is a
    /// partitioning bug, not a recoverable condition.
    pub fn lp(&self, id: LpId) -> Arc<LogicalProcess> {
        self.registry
            .read()
            .get(id.0 as usize)
            .cloned()
            .unwrap_or_else(|| panic!("{id} does not exist in the registry"))
    }

    /// The LP owning the calling thread's currently executing event, or
    /// the public LP outside event execution.
    pub fn current_lp(&self) -> Arc<LogicalProcess> {
        CURRENT_LP
            .with(|current| current.borrow().clone())
            .unwrap_or_else(|| self.lp(LpId::PUBLIC))
    }

    /// Scoped process-wide critical section. Never held across an event
    /// invocation.
    pub fn critical_section(&self) -> MutexGuard<'_, ()> {
        self.critical.lock()
    }

    /// Minimum next-event time across all LPs ([`Time::MAX`] when idle).
    pub fn smallest_time(&self) -> Time {
        self.registry
            .read()
            .iter()
            .map(|lp| lp.next_time())
            .min()
            .unwrap_or(Time::MAX)
    }

    /// Minimum published lookahead across all LPs.
    pub fn min_lookahead(&self) -> Time {
        self.registry
            .read()
            .iter()
            .map(|lp| lp.lookahead())
            .min()
            .unwrap_or(Time::ZERO)
    }

    /// Execute one round: every LP with an event inside `horizon`
    /// processes its window in parallel; returns once all have finished.
    pub fn process_round(&self, horizon: Time) {
        self.apply_pending_stop();
        let pool = self.pool.lock();
        let pool = pool.as_ref().expect("engine not enabled");

        let mut dispatched = 0usize;
        {
            let registry = self.registry.read();
            for lp in registry.iter() {
                if lp.next_time() <= horizon {
                    pool.task_tx
                        .send(RoundTask {
                            lp: Arc::clone(lp),
                            horizon,
                        })
                        .expect("worker pool disconnected");
                    dispatched += 1;
                }
            }
        }

        trace!(dispatched, %horizon, "round dispatched");
        for _ in 0..dispatched {
            pool.done_rx.recv().expect("worker pool disconnected");
        }
    }

    /// Drive rounds until every LP is finished and no cross-LP event is
    /// in flight.
    pub fn run(&self) {
        loop {
            self.apply_pending_stop();
            if self.is_finished() {
                break;
            }
            let smallest = self.smallest_time();
            if smallest.is_max() {
                break;
            }
            let horizon = smallest
                .saturating_add(self.min_lookahead())
                .min(self.stop_time());
            self.process_round(horizon);
        }
    }

    /// Request a stop: every LP's stop flag is set at the next round
    /// boundary, so LPs that are mid-window still finish it.
    pub fn stop_all(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Propagate a pending stop request to the LPs. A no-op between
    /// requests; called at every round boundary.
    pub fn apply_pending_stop(&self) {
        if self.stop_requested.swap(false, Ordering::AcqRel) {
            for lp in self.registry.read().iter() {
                lp.stop();
            }
        }
    }

    /// Clamp the granted horizon so no round reaches past `at`. Repeated
    /// calls keep the earliest bound.
    pub fn set_stop_time(&self, at: Time) {
        self.stop_time.fetch_min(at.ticks(), Ordering::AcqRel);
    }

    /// Current horizon clamp ([`Time::MAX`] when unset).
    pub fn stop_time(&self) -> Time {
        Time::from_ticks(self.stop_time.load(Ordering::Acquire))
    }

    /// True when every LP is stopped or out of work.
    pub fn is_finished(&self) -> bool {
        self.registry.read().iter().all(|lp| lp.is_finished())
    }

    /// Total non-cancelled events invoked across all LPs.
    pub fn event_count(&self) -> u64 {
        self.registry
            .read()
            .iter()
            .map(|lp| lp.processed_count())
            .sum()
    }

    /// Run an event synchronously on `lp`, with re-entrant schedules
    /// routed to that LP (partition replay of initialization events).
    pub fn invoke_now_on(&self, lp: &Arc<LogicalProcess>, event: Event) {
        let previous = CURRENT_LP.with(|current| current.replace(Some(Arc::clone(lp))));
        lp.invoke_now(event);
        CURRENT_LP.with(|current| *current.borrow_mut() = previous);
    }
}

impl Default for MtpEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MtpEngine {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.lock().take() {
            pool.shutdown();
        }
    }
}
