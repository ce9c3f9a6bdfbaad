//! Failure-aware weighted round robin.
//!
//! Weights come from the failure history: 0 failures → 10, 1 → 5, 2+ → 1.
//! Selection walks the table in passes; pass `r` visits every server whose
//! weight exceeds `r`. Over one cycle of `Σweights` picks each server
//! appears exactly `weight` times and never twice within a pass.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::pool::{Server, ServerId, ServerPool};
use crate::strategy::{MetricsSnapshot, Strategy, StrategyKind};

/// Weight bucket for a failure count.
pub fn weight_for_failures(failures: u32) -> u32 {
    match failures {
        0 => 10,
        1 => 5,
        _ => 1,
    }
}

#[derive(Debug, Default)]
struct Cursor {
    table: Vec<(ServerId, u32)>,
    pass: u32,
    position: usize,
}

#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    cursor: Mutex<Cursor>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for WeightedRoundRobin {
    fn kind(&self) -> StrategyKind {
        StrategyKind::WeightedRoundRobin
    }

    fn select(&self, pool: &ServerPool, _key: Option<&str>) -> Option<Arc<Server>> {
        let healthy = pool.list_healthy();
        if healthy.is_empty() {
            return None;
        }

        let table: Vec<(ServerId, u32)> = healthy
            .iter()
            .map(|s| (s.id().clone(), weight_for_failures(s.failure_count())))
            .collect();

        let mut cursor = self.cursor.lock();
        if cursor.table != table {
            tracing::debug!(servers = table.len(), "Weight table rebuilt");
            cursor.table = table;
            cursor.pass = 0;
            cursor.position = 0;
        }

        let max_weight = cursor.table.iter().map(|(_, w)| *w).max().unwrap_or(1);
        // Pass 0 contains every server, so this terminates within one cycle
        loop {
            if cursor.position >= cursor.table.len() {
                cursor.position = 0;
                cursor.pass += 1;
                if cursor.pass >= max_weight {
                    cursor.pass = 0;
                }
            }
            let index = cursor.position;
            cursor.position += 1;
            if cursor.table[index].1 > cursor.pass {
                return Some(healthy[index].clone());
            }
        }
    }

    fn annotate(&self, snapshot: &mut MetricsSnapshot) {
        for server in &mut snapshot.servers {
            server.weight = Some(weight_for_failures(server.failures));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    fn id(port: u16) -> ServerId {
        ServerId::new("127.0.0.1", port)
    }

    #[test]
    fn test_weight_buckets() {
        assert_eq!(weight_for_failures(0), 10);
        assert_eq!(weight_for_failures(1), 5);
        assert_eq!(weight_for_failures(2), 1);
        assert_eq!(weight_for_failures(40), 1);
    }

    #[test]
    fn test_interleaved_cycle() {
        let lb = WeightedRoundRobin::new();
        let pool = ServerPool::with_servers([id(1), id(2), id(3)], PoolConfig::default()).unwrap();
        pool.report_outcome(&id(2), false, 0.0).unwrap();
        pool.report_outcome(&id(3), false, 0.0).unwrap();
        pool.report_outcome(&id(3), false, 0.0).unwrap();

        let picks: Vec<u16> = (0..16).map(|_| lb.select(&pool, None).unwrap().id().port).collect();
        let mut expected = vec![1, 2, 3];
        for _ in 0..4 {
            expected.extend([1, 2]);
        }
        expected.extend([1; 5]);
        assert_eq!(picks, expected);

        // The next cycle repeats exactly
        let again: Vec<u16> = (0..16).map(|_| lb.select(&pool, None).unwrap().id().port).collect();
        assert_eq!(again, expected);
    }

    #[test]
    fn test_bucket_change_rebuilds_table() {
        let lb = WeightedRoundRobin::new();
        let pool = ServerPool::with_servers([id(1), id(2)], PoolConfig::default()).unwrap();
        lb.select(&pool, None).unwrap();
        lb.select(&pool, None).unwrap();
        lb.select(&pool, None).unwrap();

        pool.report_outcome(&id(1), false, 0.0).unwrap();
        pool.report_outcome(&id(1), false, 0.0).unwrap();

        // Fresh cycle: 1 has weight 1, 2 has weight 10
        let picks: Vec<u16> = (0..11).map(|_| lb.select(&pool, None).unwrap().id().port).collect();
        assert_eq!(picks.iter().filter(|p| **p == 1).count(), 1);
        assert_eq!(picks.iter().filter(|p| **p == 2).count(), 10);
        assert_eq!(picks[0], 1);
    }
}
