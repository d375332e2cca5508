//! Contract between the engine and a distributed-rank transport.
//!
//! The engine never serializes host packets itself; the transport only has
//! to surface delivery counters, collective all-gather of [`LbtsMessage`]
//! records, and hooks to drain pending traffic. A real deployment backs
//! this with MPI or similar; tests use the in-process channel transport
//! from `parsim-cluster`.

use parsim_types::Time;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lower-bound-timestamp record exchanged between ranks each granted-time
/// window round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbtsMessage {
    /// Inter-rank messages this rank has received so far.
    pub rx: u32,
    /// Inter-rank messages this rank has posted so far.
    pub tx: u32,
    /// Originating rank.
    pub rank: u32,
    /// Whether this rank's LPs are all locally finished.
    pub finished: bool,
    /// Earliest pending event time on this rank, in raw ticks
    /// (`i64::MAX` when idle).
    pub smallest_time_ticks: i64,
}

impl LbtsMessage {
    /// Assemble a record for the current round.
    pub fn new(rx: u32, tx: u32, rank: u32, finished: bool, smallest_time: Time) -> Self {
        LbtsMessage {
            rx,
            tx,
            rank,
            finished,
            smallest_time_ticks: smallest_time.ticks(),
        }
    }

    /// Earliest pending event time as a [`Time`].
    pub fn smallest_time(&self) -> Time {
        Time::from_ticks(self.smallest_time_ticks)
    }
}

/// Errors surfaced by a rank transport.
///
/// Collectives are all-or-nothing: after a failure the global state is
/// indeterminate and the federation loop terminates without retrying.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A collective operation (all-gather) failed.
    #[error("collective operation failed: {0}")]
    Collective(String),
    /// A peer rank is no longer reachable.
    #[error("rank {0} is unreachable")]
    Unreachable(u32),
}

/// Facade over the inter-rank message layer.
///
/// Counter semantics: `rx_count`/`tx_count` are monotone totals since
/// startup. The federation loop compares their global sums to detect
/// in-flight messages; a transport must count a message as received only
/// once it has been delivered into the local simulator.
pub trait RankTransport: Send + Sync {
    /// Drain pending inter-rank messages into the local simulator.
    fn receive_messages(&self);

    /// Poll outstanding sends for completion, releasing their buffers.
    fn test_send_complete(&self);

    /// Total messages delivered to this rank so far.
    fn rx_count(&self) -> u32;

    /// Total messages posted by this rank so far.
    fn tx_count(&self) -> u32;

    /// This rank's id.
    fn rank(&self) -> u32;

    /// Number of ranks in the communicator.
    fn size(&self) -> u32;

    /// Collective exchange: every rank contributes its record and receives
    /// all records, indexed by rank.
    fn allgather(&self, local: LbtsMessage) -> Result<Vec<LbtsMessage>, TransportError>;

    /// Release transport resources once the federation has terminated.
    /// Pending inbound messages are delivered first; no sends or
    /// collectives may follow.
    fn quiesce(&self);
}
