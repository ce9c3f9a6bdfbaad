//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Server identities are unique and addressable
//! - Value ranges for intervals, thresholds and strategy parameters
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BalancerConfig → Result<(), Vec<ValidationError>>
//! - Strategy checks are shared with runtime strategy switches

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::{
    Alpha1Config, BalancerConfig, Beta1Config, HealthCheckConfig, StrategyConfig,
};

/// A single semantic violation: which field, and what is wrong with it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a complete configuration.
pub fn validate_config(config: &BalancerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }

    let mut seen = HashSet::new();
    for (i, server) in config.servers.iter().enumerate() {
        if server.host.trim().is_empty() {
            errors.push(ValidationError::new(format!("servers[{i}].host"), "must not be empty"));
        }
        if server.port == 0 {
            errors.push(ValidationError::new(format!("servers[{i}].port"), "must be > 0"));
        }
        if !seen.insert(server.id()) {
            errors.push(ValidationError::new(
                format!("servers[{i}]"),
                format!("duplicate server {}", server.id()),
            ));
        }
    }

    if config.pool.response_window == 0 {
        errors.push(ValidationError::new("pool.response_window", "must be > 0"));
    }

    check_health(&config.health_check, &mut errors);

    if config.proxy.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("proxy.connect_timeout_secs", "must be > 0"));
    }

    if let Err(strategy_errors) = validate_strategy(&config.strategy) {
        errors.extend(strategy_errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate strategy parameters, for load time and for runtime switches.
pub fn validate_strategy(config: &StrategyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.response_time.window == 0 {
        errors.push(ValidationError::new("strategy.response_time.window", "must be > 0"));
    }
    check_alpha1(&config.alpha1, &mut errors);
    check_beta1(&config.beta1, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_health(health: &HealthCheckConfig, errors: &mut Vec<ValidationError>) {
    let checks = [
        ("health_check.interval_secs", health.interval_secs == 0),
        ("health_check.timeout_secs", health.timeout_secs == 0),
        ("health_check.attempts", health.attempts == 0),
        ("health_check.unhealthy_threshold", health.unhealthy_threshold == 0),
        ("health_check.healthy_threshold", health.healthy_threshold == 0),
    ];
    for (field, bad) in checks {
        if bad {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }
}

fn check_alpha1(a: &Alpha1Config, errors: &mut Vec<ValidationError>) {
    if !(a.slo_ms > 0.0) {
        errors.push(ValidationError::new("strategy.alpha1.slo_ms", "must be > 0"));
    }
    if !(a.ewma_alpha > 0.0 && a.ewma_alpha <= 1.0) {
        errors.push(ValidationError::new("strategy.alpha1.ewma_alpha", "must be in (0, 1]"));
    }
    if !(a.beta_min > 0.0 && a.beta_min <= a.beta && a.beta <= a.beta_max) {
        errors.push(ValidationError::new(
            "strategy.alpha1.beta",
            "must satisfy 0 < beta_min <= beta <= beta_max",
        ));
    }
    if !(a.gamma_min > 0.0 && a.gamma_min <= a.gamma && a.gamma <= a.gamma_max) {
        errors.push(ValidationError::new(
            "strategy.alpha1.gamma",
            "must satisfy 0 < gamma_min <= gamma <= gamma_max",
        ));
    }
    if !(a.hedge_multiplier > 0.0) {
        errors.push(ValidationError::new("strategy.alpha1.hedge_multiplier", "must be > 0"));
    }
    if a.adjust_every == 0 {
        errors.push(ValidationError::new("strategy.alpha1.adjust_every", "must be > 0"));
    }
    if a.p99_window == 0 {
        errors.push(ValidationError::new("strategy.alpha1.p99_window", "must be > 0"));
    }
    if !(a.increase_factor > 1.0) {
        errors.push(ValidationError::new("strategy.alpha1.increase_factor", "must be > 1"));
    }
    if !(a.decay_rate > 0.0 && a.decay_rate <= 1.0) {
        errors.push(ValidationError::new("strategy.alpha1.decay_rate", "must be in (0, 1]"));
    }
    if a.volatility_window == 0 {
        errors.push(ValidationError::new("strategy.alpha1.volatility_window", "must be > 0"));
    }
}

fn check_beta1(b: &Beta1Config, errors: &mut Vec<ValidationError>) {
    if !(b.capacity_factor >= 1.0) {
        errors.push(ValidationError::new("strategy.beta1.capacity_factor", "must be >= 1"));
    }
    if !(b.warmup_quota_factor > 0.0 && b.warmup_quota_factor <= 1.0) {
        errors.push(ValidationError::new(
            "strategy.beta1.warmup_quota_factor",
            "must be in (0, 1]",
        ));
    }
    if b.recent_key_limit == 0 {
        errors.push(ValidationError::new("strategy.beta1.recent_key_limit", "must be > 0"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ServerConfig;

    fn server(host: &str, port: u16) -> ServerConfig {
        ServerConfig {
            host: host.into(),
            port,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&BalancerConfig::default()).is_ok());
    }

    #[test]
    fn test_reports_every_violation() {
        let mut config = BalancerConfig::default();
        config.servers = vec![server("a", 1), server("a", 1), server("", 0)];
        config.health_check.interval_secs = 0;
        config.strategy.alpha1.beta = 5.0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"servers[1]"));
        assert!(fields.contains(&"servers[2].host"));
        assert!(fields.contains(&"servers[2].port"));
        assert!(fields.contains(&"health_check.interval_secs"));
        assert!(fields.contains(&"strategy.alpha1.beta"));
    }

    #[test]
    fn test_strategy_ranges() {
        let mut strategy = StrategyConfig::default();
        assert!(validate_strategy(&strategy).is_ok());

        strategy.alpha1.ewma_alpha = 0.0;
        strategy.alpha1.gamma_min = 0.0;
        strategy.beta1.warmup_quota_factor = 1.5;
        strategy.beta1.capacity_factor = f64::NAN;
        let errors = validate_strategy(&strategy).unwrap_err();
        assert_eq!(errors.len(), 4);
    }
}
