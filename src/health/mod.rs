//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic timer (active.rs)
//!     → TCP connect probe per member, with retries
//!     → state.rs (consecutive good / failed probes)
//!     → ServerPool::record_failure or ServerPool::set_health
//! ```
//!
//! # Design Decisions
//! - State transitions require consecutive successes/failures
//! - Every failed probe counts exactly one failure
//! - A manually disabled server is never re-enabled by a probe

pub mod active;
pub mod state;

pub use active::HealthMonitor;
