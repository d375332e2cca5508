//! Event model and external contracts for the parsim engine.
//!
//! This crate defines what the engine actually moves around:
//!
//! - [`Event`]: an opaque invocable with a timestamp, context and uid
//! - [`EventId`]: the handle returned to schedulers (cancel, expiry, delay)
//! - [`EventQueue`]: the per-LP min structure keyed `(ts, uid)`
//! - [`RankTransport`] and [`LbtsMessage`]: the facade a distributed host
//!   plugs in for granted-time-window federation
//!
//! The engine never interprets event payloads; an event is a `FnOnce` the
//! host hands over, invoked exactly once unless cancelled first.

mod event;
mod queue;
mod transport;

pub use event::{Event, EventId, EventKey, EventKind, NO_CONTEXT};
pub use queue::EventQueue;
pub use transport::{LbtsMessage, RankTransport, TransportError};
