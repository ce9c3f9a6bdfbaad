//! Selection engine front-end.
//!
//! # Data Flow
//! ```text
//! Accepted connection
//!     → Balancer::dispatch(key)
//!         → active Strategy::select(pool, key)      (none → NoServerAvailable)
//!         → ServerPool::adjust_connections(+1)
//!         → Strategy::on_dispatch / hedge_advice
//!     → Dispatch guard travels with the relay
//!     → Dispatch::complete(success) or drop
//!         → ServerPool::adjust_connections(-1) + report_outcome
//!         → Strategy::on_complete (the strategy that dispatched it)
//!         → stats.rs
//! ```
//!
//! # Design Decisions
//! - The active strategy is swapped whole through `ArcSwap`; never mutated in place
//! - A guard that is dropped unfinished reports a failure
//! - Status, metrics and performance views are read-only

pub mod balancer;
pub mod stats;

pub use balancer::{Balancer, Dispatch, EngineError, StatusView};
pub use stats::{PerformanceReport, PerformanceStats, RequestRecord};
