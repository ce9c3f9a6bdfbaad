//! Backend server record.
//!
//! # Responsibilities
//! - Identify a single backend by `(host, port)`
//! - Track active connections, failures and the success streak
//! - Track health state (automatic and manual)
//! - Keep a bounded window of recent response times

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::pool::window::LatencyWindow;

/// Immutable identity of a backend server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerId {
    pub host: String,
    pub port: u16,
}

impl ServerId {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Error returned when parsing a `host:port` identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid server identity '{0}', expected host:port")]
pub struct ParseServerIdError(pub String);

impl FromStr for ServerId {
    type Err = ParseServerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseServerIdError(s.to_string()))?;
        if host.is_empty() {
            return Err(ParseServerIdError(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ParseServerIdError(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

/// A single backend server.
///
/// Every counter is written through the owning [`ServerPool`](crate::pool::ServerPool);
/// strategies only read.
#[derive(Debug)]
pub struct Server {
    id: ServerId,
    healthy: AtomicBool,
    manually_disabled: AtomicBool,
    active_connections: AtomicUsize,
    failure_count: AtomicU32,
    success_streak: AtomicU32,
    response_times: Mutex<LatencyWindow>,
}

impl Server {
    /// Create a new, healthy server with empty counters.
    pub fn new(id: ServerId, response_window: usize) -> Self {
        Self {
            id,
            healthy: AtomicBool::new(true),
            manually_disabled: AtomicBool::new(false),
            active_connections: AtomicUsize::new(0),
            failure_count: AtomicU32::new(0),
            success_streak: AtomicU32::new(0),
            response_times: Mutex::new(LatencyWindow::new(response_window)),
        }
    }

    pub fn id(&self) -> &ServerId {
        &self.id
    }

    /// True when the server may receive traffic.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire) && !self.is_manually_disabled()
    }

    pub fn is_manually_disabled(&self) -> bool {
        self.manually_disabled.load(Ordering::Acquire)
    }

    /// Get the current number of active connections.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Acquire)
    }

    pub fn success_streak(&self) -> u32 {
        self.success_streak.load(Ordering::Acquire)
    }

    /// Average of the recorded response times, if any.
    pub fn avg_response_time_ms(&self) -> Option<f64> {
        self.response_times.lock().average()
    }

    pub fn response_samples(&self) -> usize {
        self.response_times.lock().len()
    }

    pub(crate) fn inc_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement active connection count, saturating at zero.
    pub(crate) fn dec_connections(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Swap the automatic health flag, returning the previous value.
    pub(crate) fn swap_healthy(&self, healthy: bool) -> bool {
        self.healthy.swap(healthy, Ordering::AcqRel)
    }

    pub(crate) fn set_manually_disabled(&self, disabled: bool) {
        self.manually_disabled.store(disabled, Ordering::Release);
    }

    pub(crate) fn record_failure(&self) -> u32 {
        self.success_streak.store(0, Ordering::Release);
        self.failure_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Record a successful completion.
    ///
    /// Every `recovery_streak` consecutive successes forgive one failure.
    pub(crate) fn record_success(&self, latency_ms: f64, recovery_streak: u32) {
        self.response_times.lock().push(latency_ms);

        let streak = self.success_streak.fetch_add(1, Ordering::AcqRel) + 1;
        if recovery_streak > 0 && streak % recovery_streak == 0 {
            let _ = self
                .failure_count
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        }
    }

    pub(crate) fn clear_failures(&self) {
        self.failure_count.store(0, Ordering::Release);
        self.success_streak.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_id() {
        let id: ServerId = "127.0.0.1:8081".parse().unwrap();
        assert_eq!(id, ServerId::new("127.0.0.1", 8081));
        assert_eq!(id.to_string(), "127.0.0.1:8081");

        assert!("127.0.0.1".parse::<ServerId>().is_err());
        assert!(":80".parse::<ServerId>().is_err());
        assert!("host:http".parse::<ServerId>().is_err());
    }

    #[test]
    fn test_connections_never_negative() {
        let server = Server::new(ServerId::new("a", 1), 100);
        server.dec_connections();
        assert_eq!(server.active_connections(), 0);

        server.inc_connections();
        server.inc_connections();
        server.dec_connections();
        assert_eq!(server.active_connections(), 1);
    }

    #[test]
    fn test_success_streak_decays_failures() {
        let server = Server::new(ServerId::new("a", 1), 100);
        server.record_failure();
        server.record_failure();
        assert_eq!(server.failure_count(), 2);

        for _ in 0..9 {
            server.record_success(5.0, 10);
        }
        assert_eq!(server.failure_count(), 2);
        server.record_success(5.0, 10);
        assert_eq!(server.failure_count(), 1);

        // A failure resets the streak
        for _ in 0..5 {
            server.record_success(5.0, 10);
        }
        server.record_failure();
        for _ in 0..9 {
            server.record_success(5.0, 10);
        }
        assert_eq!(server.failure_count(), 2);
    }

    #[test]
    fn test_manual_disable_overrides_health() {
        let server = Server::new(ServerId::new("a", 1), 100);
        assert!(server.is_healthy());
        server.set_manually_disabled(true);
        assert!(!server.is_healthy());
        server.set_manually_disabled(false);
        assert!(server.is_healthy());
    }
}
