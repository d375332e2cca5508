//! Multithreaded conservative discrete-event scheduler.
//!
//! The simulated topology is partitioned into logical processes (LPs), each
//! a single-threaded event timeline with its own virtual clock. A pool of
//! worker threads advances the LPs round by round: every round the engine
//! computes a safe horizon `T*` (smallest pending event time plus the
//! minimum inter-LP lookahead), each LP processes every event with
//! `ts <= T*`, and a barrier ends the round. Events crossing LP boundaries
//! travel through per-LP inboxes, never directly into a foreign queue.
//!
//! # Goals
//!
//! 1. **Sequential semantics**: a parallel run is equivalent, under the
//!    causal order induced by cross-LP dependencies, to a sequential run
//! 2. **Multi-core utilization**: idle workers pull the next ready LP from
//!    a shared work queue, so uneven partitions still load all cores
//! 3. **Strictly conservative**: no speculation, no rollback; an LP never
//!    executes an event beyond the granted window
//!
//! # Non-Goals
//!
//! - **Optimistic execution**: there is no state saving or anti-message
//!   machinery
//! - **Repartitioning**: the LP assignment is fixed once `run` starts
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     MultithreadedSimulator                       │
//! │            (host facade: schedule / run / stop / destroy)        │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                           MtpEngine                              │
//! │        smallest-time → T* → dispatch → round barrier             │
//! │                                                                  │
//! │   work queue ────►  worker 0   worker 1   worker 2  ...          │
//! │                        │          │          │                   │
//! │   ┌────────┐      ┌────▼───┐  ┌───▼────┐  ┌──▼─────┐             │
//! │   │ LP 0   │      │ LP 1   │  │ LP 2   │  │ LP 3   │  ...        │
//! │   │ public │      │ queue  │  │ queue  │  │ queue  │             │
//! │   └────────┘      │ inbox ◄┼──┼─ inbox◄┼──┼─ inbox │             │
//! │                   └────────┘  └────────┘  └────────┘             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! LP 0 is the public LP: it stages events scheduled before partitioning
//! and owns no-context events afterwards. The [`Partitioner`] walks the
//! topology with a BFS, cutting point-to-point links whose delay is at
//! least the minimum lookahead, so every inter-LP edge is itself the
//! source of the lookahead that makes the window safe.

mod config;
mod engine;
mod lp;
mod partition;
mod simulator;

pub use config::{ConfigError, EngineConfig};
pub use engine::MtpEngine;
pub use lp::LogicalProcess;
pub use partition::{PartitionPlan, Partitioner};
pub use simulator::MultithreadedSimulator;
