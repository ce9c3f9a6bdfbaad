//! Read-only metrics views of the active strategy.

use serde::Serialize;

use crate::pool::{ServerId, ServerPool};
use crate::strategy::StrategyKind;

/// Per-server metrics. Strategy-specific fields are `None` unless the
/// active strategy fills them in.
#[derive(Debug, Clone, Serialize)]
pub struct ServerMetrics {
    pub host: String,
    pub port: u16,
    pub healthy: bool,
    pub connections: usize,
    pub failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_response_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_ewma: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interference_signal: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_request_age_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warmup_progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_keys: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_requests: Option<u64>,
}

/// Global ALPHA1 state.
#[derive(Debug, Clone, Serialize)]
pub struct Alpha1Summary {
    pub p99_ms: Option<f64>,
    pub target_p99_ms: f64,
    pub beta: f64,
    pub gamma: f64,
    pub hedge_rate: f64,
    pub completions: u64,
}

/// Global BETA1 cache accounting.
#[derive(Debug, Clone, Serialize)]
pub struct Beta1Summary {
    pub selections: u64,
    pub cache_hit_rate: f64,
    pub redirect_rate: f64,
    pub bounded_redirect_rate: f64,
    pub warmup_redirect_rate: f64,
    pub warming_servers: usize,
}

/// Metrics for the whole pool under the active strategy.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub strategy: StrategyKind,
    pub servers: Vec<ServerMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alpha1: Option<Alpha1Summary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beta1: Option<Beta1Summary>,
}

impl MetricsSnapshot {
    /// Pool-level fields shared by every strategy.
    pub fn base(strategy: StrategyKind, pool: &ServerPool) -> Self {
        let servers = pool
            .all()
            .iter()
            .map(|s| ServerMetrics {
                host: s.id().host.clone(),
                port: s.id().port,
                healthy: s.is_healthy(),
                connections: s.active_connections(),
                failures: s.failure_count(),
                avg_response_time_ms: s.avg_response_time_ms(),
                health_score: None,
                weight: None,
                work_ewma: None,
                interference_signal: None,
                head_request_age_ms: None,
                warmup_progress: None,
                recent_keys: None,
                total_requests: None,
            })
            .collect();

        Self {
            strategy,
            servers,
            alpha1: None,
            beta1: None,
        }
    }

    pub fn server(&self, id: &ServerId) -> Option<&ServerMetrics> {
        self.servers
            .iter()
            .find(|m| m.host == id.host && m.port == id.port)
    }

    pub fn server_mut(&mut self, id: &ServerId) -> Option<&mut ServerMetrics> {
        self.servers
            .iter_mut()
            .find(|m| m.host == id.host && m.port == id.port)
    }
}

pub(crate) fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
