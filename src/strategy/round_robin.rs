//! Round-robin selection.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use crate::pool::{Server, ServerPool};
use crate::strategy::{rotate, Strategy, StrategyKind};

/// Round-robin selector.
/// Stores an internal counter to rotate through healthy servers.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for RoundRobin {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RoundRobin
    }

    fn select(&self, pool: &ServerPool, _key: Option<&str>) -> Option<Arc<Server>> {
        // Each caller claims its own slot; concurrent calls never share one
        rotate(&self.counter, &pool.list_healthy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::pool::ServerId;

    fn pool() -> ServerPool {
        ServerPool::with_servers(
            [8080, 8081].map(|p| ServerId::new("127.0.0.1", p)),
            PoolConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let pool = pool();

        let s1 = lb.select(&pool, None).unwrap();
        assert_eq!(s1.id().port, 8080);

        let s2 = lb.select(&pool, None).unwrap();
        assert_eq!(s2.id().port, 8081);

        let s3 = lb.select(&pool, None).unwrap();
        assert_eq!(s3.id().port, 8080);
    }

    #[test]
    fn test_skips_unhealthy() {
        let lb = RoundRobin::new();
        let pool = pool();
        pool.set_health(&ServerId::new("127.0.0.1", 8080), false).unwrap();

        for _ in 0..4 {
            assert_eq!(lb.select(&pool, None).unwrap().id().port, 8081);
        }

        pool.set_health(&ServerId::new("127.0.0.1", 8081), false).unwrap();
        assert!(lb.select(&pool, None).is_none());
    }
}
