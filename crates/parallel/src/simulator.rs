//! Single-host multithreaded simulator facade.
//!
//! Implements the host simulator contract on top of [`MtpEngine`]:
//! schedule / cancel / run / stop / now / destroy. Calls made from inside
//! an executing event route through that event's LP; calls made from host
//! setup code route through the public LP. `run` partitions the topology
//! once, replays the staged initialization events, then drives rounds
//! until every LP is idle.

use crate::config::{ConfigError, EngineConfig};
use crate::engine::MtpEngine;
use crate::lp::LogicalProcess;
use crate::partition::Partitioner;
use parking_lot::Mutex;
use parsim_core::{Event, EventId, EventKind, NO_CONTEXT};
use parsim_types::{LpId, NetworkGraph, NodeId, Time};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Rank of a single-host simulation; every node in the graph must carry it.
const LOCAL_RANK: u32 = 0;

/// Host-facing simulator running all LPs in one process.
pub struct MultithreadedSimulator {
    engine: Arc<MtpEngine>,
    graph: Arc<NetworkGraph>,
    config: EngineConfig,
    rank: u32,
    /// Events deferred until `destroy`, in insertion order. Mutated only
    /// under the engine critical section.
    destroy_events: Mutex<Vec<Event>>,
    partitioned: AtomicBool,
}

impl MultithreadedSimulator {
    /// Create a simulator over `graph`. Scheduling is available
    /// immediately; everything lands on the public LP until `run`
    /// partitions the topology.
    pub fn new(graph: Arc<NetworkGraph>, config: EngineConfig) -> Result<Self, ConfigError> {
        Self::with_rank(graph, config, LOCAL_RANK)
    }

    /// Create a simulator owning only the nodes placed on `rank`
    /// (federation embeds one of these per rank).
    pub fn with_rank(
        graph: Arc<NetworkGraph>,
        config: EngineConfig,
        rank: u32,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let engine = Arc::new(MtpEngine::new());
        engine.enable(1, 0);
        Ok(MultithreadedSimulator {
            engine,
            graph,
            config,
            rank,
            destroy_events: Mutex::new(Vec::new()),
            partitioned: AtomicBool::new(false),
        })
    }

    /// The underlying engine (round-level driving, e.g. by the hybrid
    /// facade).
    pub fn engine(&self) -> &Arc<MtpEngine> {
        &self.engine
    }

    /// The topology this simulator partitions.
    pub fn graph(&self) -> &Arc<NetworkGraph> {
        &self.graph
    }

    /// Schedule `action` to run `delay` after the calling LP's clock.
    pub fn schedule(&self, delay: Time, action: impl FnOnce() + Send + 'static) -> EventId {
        self.engine
            .current_lp()
            .schedule(self.engine.next_uid(), delay, action)
    }

    /// Schedule `action` at the calling LP's current time.
    pub fn schedule_now(&self, action: impl FnOnce() + Send + 'static) -> EventId {
        self.schedule(Time::ZERO, action)
    }

    /// Schedule onto the LP owning `context` (a node id). Crossing LPs
    /// goes through the target's inbox; this is the only cross-LP
    /// side-effect path during a round.
    pub fn schedule_with_context(
        &self,
        context: u32,
        delay: Time,
        action: impl FnOnce() + Send + 'static,
    ) {
        let current = self.engine.current_lp();
        // Initialization stage: only the public LP exists, nothing is
        // remote yet.
        if self.engine.len() == 1 {
            current.schedule_with_context(self.engine.next_uid(), context, delay, action);
            return;
        }

        let target = self.lp_for_context(context);
        let uid = self.engine.next_uid();
        if Arc::ptr_eq(&current, &target) {
            target.schedule_with_context(uid, context, delay, action);
        } else {
            let ts = current.now() + delay;
            target.enqueue_remote(Event::new(ts, uid, context, action));
        }
    }

    /// Defer `action` until `destroy`.
    pub fn schedule_destroy(&self, action: impl FnOnce() + Send + 'static) -> EventId {
        let event = Event::destroy(
            self.maximum_simulation_time(),
            self.engine.next_uid(),
            action,
        );
        let id = event.id();
        let _cs = self.engine.critical_section();
        self.destroy_events.lock().push(event);
        id
    }

    /// Best-effort removal; marks the event cancelled when it is not on
    /// the calling LP's queue.
    pub fn remove(&self, id: &EventId) {
        if id.kind() == EventKind::Destroy {
            let _cs = self.engine.critical_section();
            let mut list = self.destroy_events.lock();
            if let Some(position) = list.iter().position(|event| id.same_event(&event.id())) {
                list.remove(position).discard();
            }
            return;
        }
        self.engine.current_lp().remove(id);
    }

    /// Cancel an event without touching any queue.
    pub fn cancel(&self, id: &EventId) {
        if !id.is_expired() {
            id.cancel();
        }
    }

    /// True once the event ran, was removed, or was cancelled.
    pub fn is_expired(&self, id: &EventId) -> bool {
        id.is_expired()
    }

    /// Virtual time left before `id` fires.
    pub fn delay_left(&self, id: &EventId) -> Time {
        id.delay_left(self.now())
    }

    /// The calling LP's virtual time.
    pub fn now(&self) -> Time {
        self.engine.current_lp().now()
    }

    /// Context of the event executing on the calling LP.
    pub fn context(&self) -> u32 {
        self.engine.current_lp().current_context()
    }

    /// Total non-cancelled events invoked so far.
    pub fn event_count(&self) -> u64 {
        self.engine.event_count()
    }

    /// True once every LP is stopped or out of work.
    pub fn is_finished(&self) -> bool {
        self.engine.is_finished()
    }

    /// Partition the topology (first call only) and drive rounds until
    /// the simulation is finished.
    pub fn run(&self) {
        self.partition();
        self.engine.run();
    }

    /// Stop every LP at the next round boundary.
    pub fn stop(&self) {
        self.engine.stop_all();
    }

    /// Stop at `now + delay`: events up to and including that time still
    /// run, nothing after it does.
    pub fn stop_after(&self, delay: Time) {
        let at = self.now() + delay;
        self.engine.set_stop_time(at);
        let engine = Arc::clone(&self.engine);
        self.schedule(delay, move || engine.stop_all());
    }

    /// Invoke pending destroy events in insertion order, then shut the
    /// engine down (workers joined before LPs are dropped).
    pub fn destroy(&self) {
        let events = {
            let _cs = self.engine.critical_section();
            std::mem::take(&mut *self.destroy_events.lock())
        };
        for event in events {
            event.invoke();
        }
        self.engine.disable();
    }

    /// Far-future bound used as the timestamp of destroy events.
    pub fn maximum_simulation_time(&self) -> Time {
        Time::from_ticks(i64::MAX / 2)
    }

    fn lp_for_context(&self, context: u32) -> Arc<LogicalProcess> {
        if context == NO_CONTEXT {
            return self.engine.lp(LpId::PUBLIC);
        }
        let node = NodeId(context);
        if self.graph.lp_of(node).is_none() {
            panic!("context {context} resolves to no node in the topology");
        }
        let system_id = self.graph.system_id(node);
        // Cross-rank delivery is the host transport's job, never the
        // local registry's.
        assert!(
            system_id.rank() == self.rank,
            "context {context} lives on rank {}, not local rank {}",
            system_id.rank(),
            self.rank
        );
        self.engine.lp(system_id.lp())
    }

    /// BFS-partition the graph, resize the registry, and replay the
    /// events staged on the public LP. Idempotent; `run` calls it, the
    /// federation facade calls it before driving rounds itself.
    pub fn partition(&self) {
        if self.partitioned.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut partitioner = Partitioner::new(self.rank);
        if let Some(lookahead) = self.config.min_lookahead {
            partitioner = partitioner.with_min_lookahead(lookahead);
        }
        let plan = partitioner.partition(&self.graph);

        let threads = self
            .config
            .max_threads
            .min((plan.lp_count as usize).max(1));
        let staged = self.engine.enable_new(threads, plan.lp_count, plan.min_lookahead);
        info!(
            lp_count = plan.lp_count,
            threads,
            staged = staged.len(),
            "topology partitioned"
        );

        // Replay staged events. Time-zero events carry initialization
        // ordering dependencies and must run now, in insertion order;
        // `(ts, uid)` drain order is exactly that. Later events keep
        // their keys and move to the LP owning their context.
        for event in staged {
            if event.ts() == Time::ZERO {
                let lp = if event.context() == NO_CONTEXT {
                    self.engine.lp(LpId::PUBLIC)
                } else {
                    self.lp_for_context(event.context())
                };
                self.engine.invoke_now_on(&lp, event);
            } else if event.context() == NO_CONTEXT {
                self.engine.lp(LpId::PUBLIC).insert_staged(event);
            } else {
                self.lp_for_context(event.context()).insert_staged(event);
            }
        }
    }
}

impl Drop for MultithreadedSimulator {
    fn drop(&mut self) {
        self.engine.disable();
    }
}
