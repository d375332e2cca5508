//! Shared types for the parsim engine.
//!
//! This crate provides the foundational types consumed by every other
//! workspace member:
//!
//! - [`Time`]: integer-tick virtual time with a `MAX` sentinel for "no event"
//! - [`NodeId`], [`LpId`], [`SystemId`]: identifier newtypes, including the
//!   packed `lp << 16 | rank` system-id encoding
//! - [`NetworkGraph`]: the simulated topology the partitioner walks (nodes,
//!   links with delays, per-node system-id slots)

mod ids;
mod time;
mod topology;

pub use ids::{LpId, NodeId, SystemId};
pub use time::Time;
pub use topology::{Link, NetworkGraph};
