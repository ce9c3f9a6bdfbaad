//! Request accounting for the dashboard.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;

const HISTORY: usize = 100;
const RECENT_SHOWN: usize = 10;

/// One finished (or refused) connection.
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub server: Option<String>,
    pub success: bool,
    pub duration_ms: f64,
    pub client: Option<String>,
}

/// Aggregated view served at `/api/performance`.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub active_connections: usize,
    pub uptime_seconds: f64,
    /// Percentage of finished requests that succeeded.
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub requests_per_minute: f64,
    pub server_request_counts: BTreeMap<String, u64>,
    pub recent_requests: Vec<RequestRecord>,
}

#[derive(Debug)]
pub struct PerformanceStats {
    started: Instant,
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    active: AtomicUsize,
    history: Mutex<History>,
}

#[derive(Debug, Default)]
struct History {
    recent: VecDeque<RequestRecord>,
    per_server: BTreeMap<String, u64>,
}

impl Default for PerformanceStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            total: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            history: Mutex::new(History::default()),
        }
    }

    /// A connection was accepted and handed to a server.
    pub fn begin(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    /// A dispatched connection finished.
    pub fn finish(&self, server: &str, success: bool, elapsed: Duration, client: Option<String>) {
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        self.count_outcome(success);
        self.push(Some(server.to_string()), success, elapsed, client);
    }

    /// A connection was refused because no server was available.
    pub fn reject(&self, client: Option<String>) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.count_outcome(false);
        self.push(None, false, Duration::ZERO, client);
    }

    fn count_outcome(&self, success: bool) {
        if success {
            self.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn push(&self, server: Option<String>, success: bool, elapsed: Duration, client: Option<String>) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();

        let mut history = self.history.lock();
        if let Some(server) = &server {
            *history.per_server.entry(server.clone()).or_insert(0) += 1;
        }
        history.recent.push_back(RequestRecord {
            timestamp,
            server,
            success,
            duration_ms: elapsed.as_secs_f64() * 1000.0,
            client,
        });
        while history.recent.len() > HISTORY {
            history.recent.pop_front();
        }
    }

    pub fn report(&self) -> PerformanceReport {
        let uptime = self.started.elapsed().as_secs_f64();
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);

        let history = self.history.lock();
        let (sum, count) = history
            .recent
            .iter()
            .filter(|r| r.success)
            .fold((0.0, 0u32), |(sum, n), r| (sum + r.duration_ms, n + 1));
        let skip = history.recent.len().saturating_sub(RECENT_SHOWN);

        PerformanceReport {
            total_requests: total,
            successful_requests: successful,
            failed_requests: failed,
            active_connections: self.active.load(Ordering::Relaxed),
            uptime_seconds: uptime,
            success_rate: successful as f64 / (successful + failed).max(1) as f64 * 100.0,
            avg_response_time_ms: if count == 0 { 0.0 } else { sum / f64::from(count) },
            requests_per_minute: total as f64 / (uptime / 60.0).max(1.0),
            server_request_counts: history.per_server.clone(),
            recent_requests: history.recent.iter().skip(skip).cloned().collect(),
        }
    }
}
