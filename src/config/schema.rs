//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the balancer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::pool::ServerId;
use crate::strategy::StrategyKind;

/// Root configuration for the balancer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BalancerConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Backend servers, in rotation order.
    pub servers: Vec<ServerConfig>,

    /// Active strategy and its parameters.
    pub strategy: StrategyConfig,

    /// Server pool bookkeeping.
    pub pool: PoolConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Relay settings.
    pub proxy: ProxyConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl BalancerConfig {
    /// Server identities in configured order.
    pub fn server_ids(&self) -> Vec<ServerId> {
        self.servers.iter().map(ServerConfig::id).collect()
    }
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent client connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 200,
        }
    }
}

/// Backend server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn id(&self) -> ServerId {
        ServerId::new(self.host.clone(), self.port)
    }
}

/// Strategy selection and parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StrategyConfig {
    /// Which strategy routes new connections.
    pub kind: StrategyKind,

    /// Seed for randomized strategies; entropy when absent.
    pub seed: Option<u64>,

    pub response_time: ResponseTimeConfig,

    pub alpha1: Alpha1Config,

    pub beta1: Beta1Config,
}

/// Response-time strategy parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ResponseTimeConfig {
    /// Samples kept per server.
    pub window: usize,
}

impl Default for ResponseTimeConfig {
    fn default() -> Self {
        Self { window: 100 }
    }
}

/// ALPHA1 tail-latency parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Alpha1Config {
    /// Latency SLO in milliseconds; the p99 target is 90% of it.
    pub slo_ms: f64,

    /// EWMA smoothing factor.
    pub ewma_alpha: f64,

    /// Initial interference weight.
    pub beta: f64,

    /// Initial head-request-age weight.
    pub gamma: f64,

    pub beta_min: f64,
    pub beta_max: f64,
    pub gamma_min: f64,
    pub gamma_max: f64,

    /// Hedge when predicted finish exceeds `slo_ms × hedge_multiplier`.
    pub hedge_multiplier: f64,

    /// Completions between weight adjustments.
    pub adjust_every: u64,

    /// Completions kept for the rolling p99.
    pub p99_window: usize,

    /// Multiplier applied to β and γ while p99 is above target.
    pub increase_factor: f64,

    /// Fraction of the distance back to the initial weights recovered per step.
    pub decay_rate: f64,

    /// Connection-count samples used for the interference signal.
    pub volatility_window: usize,
}

impl Default for Alpha1Config {
    fn default() -> Self {
        Self {
            slo_ms: 100.0,
            ewma_alpha: 0.3,
            beta: 0.3,
            gamma: 0.4,
            beta_min: 0.05,
            beta_max: 2.0,
            gamma_min: 0.05,
            gamma_max: 2.0,
            hedge_multiplier: 1.5,
            adjust_every: 100,
            p99_window: 1000,
            increase_factor: 1.1,
            decay_rate: 0.1,
            volatility_window: 10,
        }
    }
}

/// BETA1 cache-aware hashing parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Beta1Config {
    /// Reject candidates above `capacity_factor × average` load.
    pub capacity_factor: f64,

    /// Warm-up period for newly observed servers, in seconds.
    pub warmup_secs: u64,

    /// Warming servers are capped at `warmup_quota_factor × average` load.
    pub warmup_quota_factor: f64,

    /// Recently seen keys remembered per server.
    pub recent_key_limit: usize,
}

impl Default for Beta1Config {
    fn default() -> Self {
        Self {
            capacity_factor: 1.25,
            warmup_secs: 60,
            warmup_quota_factor: 0.3,
            recent_key_limit: 1000,
        }
    }
}

/// Server pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Consecutive successes that forgive one recorded failure.
    pub recovery_streak: u32,

    /// Response-time samples kept per server.
    pub response_window: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            recovery_streak: 10,
            response_window: 100,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Connect timeout per probe attempt in seconds.
    pub timeout_secs: u64,

    /// Connect attempts per probe before it counts as failed.
    pub attempts: u32,

    /// Delay between attempts in milliseconds.
    pub retry_delay_ms: u64,

    /// Number of consecutive failed probes before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive good probes before marking healthy.
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
            timeout_secs: 3,
            attempts: 2,
            retry_delay_ms: 500,
            unhealthy_threshold: 3,
            healthy_threshold: 1,
        }
    }
}

/// Relay configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Backend connect timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 3,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// Bearer token; empty disables authentication.
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: String::new(),
            bind_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log output format.
    pub log_format: LogFormat,

    /// Enable Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9100".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: BalancerConfig = toml::from_str(
            r#"
            [[servers]]
            host = "127.0.0.1"
            port = 8081

            [strategy]
            kind = "beta1"

            [strategy.beta1]
            capacity_factor = 1.5
            "#,
        )
        .unwrap();

        assert_eq!(config.server_ids(), vec![ServerId::new("127.0.0.1", 8081)]);
        assert_eq!(config.strategy.kind, StrategyKind::Beta1);
        assert_eq!(config.strategy.beta1.capacity_factor, 1.5);
        assert_eq!(config.strategy.beta1.warmup_secs, 60);
        assert_eq!(config.strategy.alpha1.slo_ms, 100.0);
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.pool.recovery_streak, 10);
    }
}
