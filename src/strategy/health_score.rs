//! Health-score based selection.
//!
//! `score = 1/(1 + connections) × 1/(1 + failures)`; the best score wins and
//! equal best scores rotate. Recovery is gradual because the pool only
//! forgives one failure per streak of successful completions.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use crate::pool::{Server, ServerPool};
use crate::strategy::{rotate, MetricsSnapshot, Strategy, StrategyKind};

const SCORE_EPSILON: f64 = 1e-9;

/// Health score of a server with the given load and failure history.
pub fn health_score(connections: usize, failures: u32) -> f64 {
    (1.0 / (1.0 + connections as f64)) * (1.0 / (1.0 + failures as f64))
}

#[derive(Debug, Default)]
pub struct HealthScore {
    tie_cursor: AtomicUsize,
}

impl HealthScore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for HealthScore {
    fn kind(&self) -> StrategyKind {
        StrategyKind::HealthScore
    }

    fn select(&self, pool: &ServerPool, _key: Option<&str>) -> Option<Arc<Server>> {
        let scored: Vec<(Arc<Server>, f64)> = pool
            .list_healthy()
            .into_iter()
            .map(|s| {
                let score = health_score(s.active_connections(), s.failure_count());
                (s, score)
            })
            .collect();

        let best = scored
            .iter()
            .map(|(_, score)| *score)
            .fold(f64::NEG_INFINITY, f64::max);

        let tied: Vec<Arc<Server>> = scored
            .into_iter()
            .filter(|(_, score)| (best - score).abs() <= SCORE_EPSILON)
            .map(|(s, _)| s)
            .collect();

        rotate(&self.tie_cursor, &tied)
    }

    fn annotate(&self, snapshot: &mut MetricsSnapshot) {
        for server in &mut snapshot.servers {
            server.health_score = Some(health_score(server.connections, server.failures));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::pool::ServerId;

    fn id(port: u16) -> ServerId {
        ServerId::new("127.0.0.1", port)
    }

    #[test]
    fn test_score_formula() {
        assert_eq!(health_score(0, 0), 1.0);
        assert_eq!(health_score(1, 0), 0.5);
        assert_eq!(health_score(1, 1), 0.25);
        assert!((health_score(2, 3) - (1.0 / 3.0) * 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_score_is_monotonic() {
        for c in 0..20 {
            for f in 0..20 {
                assert!(health_score(c, f + 1) <= health_score(c, f));
                assert!(health_score(c + 1, f) <= health_score(c, f));
            }
        }
    }

    #[test]
    fn test_prefers_fewer_failures() {
        let lb = HealthScore::new();
        let pool = ServerPool::with_servers([id(8080), id(8081)], PoolConfig::default()).unwrap();
        pool.report_outcome(&id(8080), false, 0.0).unwrap();

        for _ in 0..5 {
            assert_eq!(lb.select(&pool, None).unwrap().id(), &id(8081));
        }
    }

    #[test]
    fn test_equal_scores_rotate() {
        let lb = HealthScore::new();
        let pool = ServerPool::with_servers([id(8080), id(8081), id(8082)], PoolConfig::default())
            .unwrap();

        let picks: Vec<u16> = (0..6).map(|_| lb.select(&pool, None).unwrap().id().port).collect();
        assert_eq!(picks, vec![8080, 8081, 8082, 8080, 8081, 8082]);
    }

    #[test]
    fn test_recovered_server_regains_score_gradually() {
        let lb = HealthScore::new();
        let pool = ServerPool::with_servers([id(8080), id(8081)], PoolConfig::default()).unwrap();
        pool.report_outcome(&id(8080), false, 0.0).unwrap();
        pool.report_outcome(&id(8080), false, 0.0).unwrap();

        let streak = pool.config().recovery_streak;
        for _ in 0..streak {
            pool.report_outcome(&id(8080), true, 1.0).unwrap();
        }
        // One failure forgiven, one still held against it
        assert_eq!(pool.get(&id(8080)).unwrap().failure_count(), 1);
        assert_eq!(lb.select(&pool, None).unwrap().id(), &id(8081));

        for _ in 0..streak {
            pool.report_outcome(&id(8080), true, 1.0).unwrap();
        }
        assert_eq!(pool.get(&id(8080)).unwrap().failure_count(), 0);
        let picks: Vec<u16> = (0..2).map(|_| lb.select(&pool, None).unwrap().id().port).collect();
        assert!(picks.contains(&8080));
    }
}
