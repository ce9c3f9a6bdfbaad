//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → pool → balancer → proxy, health monitor, admin API
//!
//! Reload (startup.rs):
//!     Watcher delivers config → reconcile membership → switch strategy if the file's section changed
//!
//! Shutdown (shutdown.rs):
//!     Signal received (signals.rs) → broadcast → stop accepting → tasks exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - In-flight relays are not cut when accepting stops

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{start, ConfigReloader, Services, StartupError};
