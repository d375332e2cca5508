//! Granted-time-window federation across cluster ranks.
//!
//! Each rank runs its own thread-pool engine over the nodes placed on it;
//! ranks agree on a global safe window by all-gathering lower-bound
//! timestamp ([`parsim_core::LbtsMessage`]) records every round:
//!
//! 1. Drain the transport and poll outstanding sends
//! 2. Compute the local smallest pending event time
//! 3. All-gather `(rx, tx, rank, finished, smallest_time)`
//! 4. The global minimum grants the window; mismatched rx/tx totals mean
//!    messages are still in flight and the window is withheld
//! 5. Execute one local round inside the window; repeat until every rank
//!    is finished and nothing is in flight
//!
//! The engine never serializes host traffic: cross-rank event delivery is
//! the host transport's business. [`ChannelTransport`] is the in-process
//! implementation used by tests and by single-host multi-rank setups.

mod hybrid;
mod transport;

pub use hybrid::{HybridError, HybridSimulator};
pub use transport::{ChannelTransport, Packet};
