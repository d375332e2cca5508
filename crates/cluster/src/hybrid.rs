//! Federated simulator facade.
//!
//! Embeds one [`MultithreadedSimulator`] per rank and replaces its run
//! loop with the granted-time-window protocol: local rounds only advance
//! inside the window every rank has agreed to, and the loop only ends
//! when every rank is finished with no messages in flight.

use parsim_core::{EventId, LbtsMessage, RankTransport, TransportError};
use parsim_parallel::{ConfigError, EngineConfig, MultithreadedSimulator};
use parsim_types::{NetworkGraph, Time};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors from a federated run.
#[derive(Debug, Error)]
pub enum HybridError {
    /// A collective transport operation failed; the global state is
    /// indeterminate and the run terminates without retrying.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
}

/// Simulator facade federating one engine per rank.
pub struct HybridSimulator<T: RankTransport> {
    local: MultithreadedSimulator,
    transport: Arc<T>,
    rank: u32,
    global_finished: AtomicBool,
}

impl<T: RankTransport> HybridSimulator<T> {
    /// Create the facade for this rank's share of `graph`.
    pub fn new(
        graph: Arc<NetworkGraph>,
        config: EngineConfig,
        transport: Arc<T>,
    ) -> Result<Self, ConfigError> {
        let rank = transport.rank();
        let local = MultithreadedSimulator::with_rank(graph, config, rank)?;
        Ok(HybridSimulator {
            local,
            transport,
            rank,
            global_finished: AtomicBool::new(false),
        })
    }

    /// This rank's id.
    pub fn rank(&self) -> u32 {
        self.rank
    }

    /// The embedded single-rank simulator.
    pub fn local(&self) -> &MultithreadedSimulator {
        &self.local
    }

    /// Schedule `action` on the calling LP.
    pub fn schedule(&self, delay: Time, action: impl FnOnce() + Send + 'static) -> EventId {
        self.local.schedule(delay, action)
    }

    /// Schedule `action` at the calling LP's current time.
    pub fn schedule_now(&self, action: impl FnOnce() + Send + 'static) -> EventId {
        self.local.schedule_now(action)
    }

    /// Schedule onto the LP owning `context`; the node must live on this
    /// rank (cross-rank traffic goes through the transport).
    pub fn schedule_with_context(
        &self,
        context: u32,
        delay: Time,
        action: impl FnOnce() + Send + 'static,
    ) {
        self.local.schedule_with_context(context, delay, action);
    }

    /// Defer `action` until `destroy`.
    pub fn schedule_destroy(&self, action: impl FnOnce() + Send + 'static) -> EventId {
        self.local.schedule_destroy(action)
    }

    /// Best-effort removal.
    pub fn remove(&self, id: &EventId) {
        self.local.remove(id);
    }

    /// Cancel without touching any queue.
    pub fn cancel(&self, id: &EventId) {
        self.local.cancel(id);
    }

    /// True once the event ran, was removed, or was cancelled.
    pub fn is_expired(&self, id: &EventId) -> bool {
        self.local.is_expired(id)
    }

    /// The calling LP's virtual time.
    pub fn now(&self) -> Time {
        self.local.now()
    }

    /// Context of the event executing on the calling LP.
    pub fn context(&self) -> u32 {
        self.local.context()
    }

    /// Non-cancelled events invoked on this rank.
    pub fn event_count(&self) -> u64 {
        self.local.event_count()
    }

    /// True once every rank agreed the federation is done.
    pub fn is_finished(&self) -> bool {
        self.global_finished.load(Ordering::Acquire)
    }

    /// True once this rank's LPs are out of work.
    pub fn is_local_finished(&self) -> bool {
        self.local.is_finished()
    }

    /// Stop this rank's LPs at the next round boundary.
    pub fn stop(&self) {
        self.local.stop();
    }

    /// Stop at `now + delay`.
    pub fn stop_after(&self, delay: Time) {
        self.local.stop_after(delay);
    }

    /// Run destroy events, shut the local engine down, then quiesce the
    /// transport.
    pub fn destroy(&self) {
        self.local.destroy();
        self.transport.quiesce();
    }

    /// Partition locally, then drive granted-time-window rounds until the
    /// federation is globally finished.
    pub fn run(&self) -> Result<(), HybridError> {
        self.local.partition();
        let engine = self.local.engine();
        info!(rank = self.rank, size = self.transport.size(), "federation run starting");

        loop {
            self.transport.receive_messages();
            self.transport.test_send_complete();

            let smallest = engine.smallest_time();
            let local_record = LbtsMessage::new(
                self.transport.rx_count(),
                self.transport.tx_count(),
                self.rank,
                self.is_local_finished(),
                smallest,
            );
            let records = self.transport.allgather(local_record)?;

            let mut granted = Time::MAX;
            let mut total_rx = 0u64;
            let mut total_tx = 0u64;
            let mut all_finished = true;
            for record in &records {
                granted = granted.min(record.smallest_time());
                total_rx += u64::from(record.rx);
                total_tx += u64::from(record.tx);
                all_finished &= record.finished;
            }

            // rx != tx means transient messages exist somewhere; granting
            // the window now could let a rank run past an undelivered
            // event.
            let in_flight = total_rx != total_tx;
            if all_finished && !in_flight {
                self.global_finished.store(true, Ordering::Release);
                debug!(rank = self.rank, total_rx, total_tx, "federation finished");
                return Ok(());
            }

            if !in_flight && !self.is_local_finished() {
                engine.process_round(granted.min(engine.stop_time()));
            }
        }
    }
}
