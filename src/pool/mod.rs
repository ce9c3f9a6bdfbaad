//! Server pool subsystem.
//!
//! # Data Flow
//! ```text
//! Static config / hot reload
//!     → registry.rs (add, remove, reconcile membership)
//!
//! Dispatch path:
//!     strategy reads list_healthy()
//!     → engine adjust_connections(+1)
//!     → proxy relays bytes
//!     → engine adjust_connections(-1), report_outcome(success, latency)
//!
//! Health monitor:
//!     → set_health(id, healthy) / record_failure(id)
//! ```
//!
//! # Design Decisions
//! - Single writer boundary: nothing outside the pool mutates server state
//! - Per-server atomics, no pool-wide lock on the hot path
//! - Reads used for scoring may be slightly stale
//! - Failures decay after a streak of successes, never reset on recovery

pub mod registry;
pub mod server;
pub mod window;

pub use registry::{MembershipChange, PoolError, ServerPool, ServerSnapshot};
pub use server::{Server, ServerId};
pub use window::LatencyWindow;
