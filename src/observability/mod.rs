//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! pool, strategies, engine, relay, health monitor
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;
