//! Selection strategies.
//!
//! # Data Flow
//! ```text
//! New connection
//!     → Strategy::select(pool, key)
//!         - round_robin.rs (rotate through healthy servers)
//!         - least_conn.rs (fewest active connections, rotating ties)
//!         - health_score.rs (connections × failures score)
//!         - weighted.rs (failure-aware interleaved weighted round robin)
//!         - response_time.rs (lowest recent average latency)
//!         - alpha1.rs (power-of-two-choices over tail-risk score)
//!         - beta1.rs (rendezvous hashing with bounded load and warm-up)
//!     → Strategy::on_dispatch(server, started)
//!     → ... relay ...
//!     → Strategy::on_complete(server, completion)
//! ```
//!
//! # Design Decisions
//! - One trait, one type per algorithm, built by [`build`]
//! - Strategies never write server counters; the pool does
//! - Private state lives and dies with the strategy instance
//! - Randomness and time are injected so tests are reproducible

pub mod alpha1;
pub mod beta1;
pub mod clock;
pub mod health_score;
pub mod least_conn;
pub mod response_time;
pub mod round_robin;
pub mod snapshot;
pub mod weighted;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::config::validation::{validate_strategy, ValidationError};
use crate::config::StrategyConfig;
use crate::pool::{Server, ServerId, ServerPool};

pub use clock::{Clock, ManualClock, SystemClock};
pub use snapshot::MetricsSnapshot;

/// Outcome of one relayed connection, as seen by a strategy.
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    pub success: bool,
    pub latency_ms: f64,
    /// Dispatch instant, when the caller still has it.
    pub started: Option<Instant>,
}

/// A routing policy.
pub trait Strategy: Send + Sync + fmt::Debug {
    fn kind(&self) -> StrategyKind;

    /// Pick a healthy server, or `None` when there is none.
    fn select(&self, pool: &ServerPool, key: Option<&str>) -> Option<Arc<Server>>;

    /// A connection was handed to `server`.
    fn on_dispatch(&self, _server: &ServerId, _started: Instant) {}

    /// A connection on `server` finished.
    fn on_complete(&self, _server: &ServerId, _completion: &Completion) {}

    /// Whether a request just dispatched to `server` should be flagged for hedging.
    fn hedge_advice(&self, _server: &ServerId) -> bool {
        false
    }

    /// Fill strategy-specific fields. Must not mutate algorithm state.
    fn annotate(&self, _snapshot: &mut MetricsSnapshot) {}
}

/// The closed set of available strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    RoundRobin,
    LeastConnections,
    HealthScore,
    WeightedRoundRobin,
    ResponseTime,
    Alpha1,
    Beta1,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 7] = [
        StrategyKind::RoundRobin,
        StrategyKind::LeastConnections,
        StrategyKind::HealthScore,
        StrategyKind::WeightedRoundRobin,
        StrategyKind::ResponseTime,
        StrategyKind::Alpha1,
        StrategyKind::Beta1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::RoundRobin => "round_robin",
            StrategyKind::LeastConnections => "least_connections",
            StrategyKind::HealthScore => "health_score",
            StrategyKind::WeightedRoundRobin => "weighted_round_robin",
            StrategyKind::ResponseTime => "response_time",
            StrategyKind::Alpha1 => "alpha1",
            StrategyKind::Beta1 => "beta1",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown strategy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown strategy '{0}'")]
pub struct UnknownStrategy(pub String);

impl FromStr for StrategyKind {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownStrategy(s.to_string()))
    }
}

/// Build a fresh strategy instance from validated parameters.
pub fn build(
    config: &StrategyConfig,
    clock: Arc<dyn Clock>,
) -> Result<Box<dyn Strategy>, Vec<ValidationError>> {
    validate_strategy(config)?;

    let strategy: Box<dyn Strategy> = match config.kind {
        StrategyKind::RoundRobin => Box::new(round_robin::RoundRobin::new()),
        StrategyKind::LeastConnections => Box::new(least_conn::LeastConnections::new()),
        StrategyKind::HealthScore => Box::new(health_score::HealthScore::new()),
        StrategyKind::WeightedRoundRobin => Box::new(weighted::WeightedRoundRobin::new()),
        StrategyKind::ResponseTime => {
            Box::new(response_time::ResponseTime::new(config.response_time.window))
        }
        StrategyKind::Alpha1 => Box::new(alpha1::Alpha1::new(
            config.alpha1.clone(),
            seeded_rng(config.seed),
            clock,
        )),
        StrategyKind::Beta1 => Box::new(beta1::Beta1::new(config.beta1.clone(), clock)),
    };
    Ok(strategy)
}

/// Seeded when `seed` is set, otherwise from OS entropy.
pub fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Take the next candidate in rotation. Each call consumes one slot.
pub(crate) fn rotate(cursor: &AtomicUsize, candidates: &[Arc<Server>]) -> Option<Arc<Server>> {
    if candidates.is_empty() {
        return None;
    }
    let slot = cursor.fetch_add(1, Ordering::Relaxed);
    Some(candidates[slot % candidates.len()].clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_name() {
        for kind in StrategyKind::ALL {
            assert_eq!(kind.as_str().parse::<StrategyKind>().unwrap(), kind);
        }
        assert_eq!("Least_Connections".parse::<StrategyKind>().unwrap(), StrategyKind::LeastConnections);
        assert_eq!(
            "fastest".parse::<StrategyKind>().unwrap_err(),
            UnknownStrategy("fastest".into())
        );
    }

    #[test]
    fn test_build_every_kind() {
        for kind in StrategyKind::ALL {
            let config = StrategyConfig {
                kind,
                ..StrategyConfig::default()
            };
            let strategy = build(&config, Arc::new(SystemClock)).unwrap();
            assert_eq!(strategy.kind(), kind);
        }
    }

    #[test]
    fn test_build_rejects_out_of_range_parameters() {
        let mut config = StrategyConfig {
            kind: StrategyKind::Beta1,
            ..StrategyConfig::default()
        };
        config.beta1.capacity_factor = 0.5;
        assert!(build(&config, Arc::new(SystemClock)).is_err());
    }
}
