//! Least Connections selection.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use crate::pool::{Server, ServerPool};
use crate::strategy::{rotate, Strategy, StrategyKind};

/// Least connections selector.
/// Selects a server with the minimum number of active connections; ties
/// rotate so no tied server is starved.
#[derive(Debug, Default)]
pub struct LeastConnections {
    tie_cursor: AtomicUsize,
}

impl LeastConnections {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for LeastConnections {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LeastConnections
    }

    fn select(&self, pool: &ServerPool, _key: Option<&str>) -> Option<Arc<Server>> {
        // Read each count once so the minimum and the tie set agree
        let loads: Vec<(Arc<Server>, usize)> = pool
            .list_healthy()
            .into_iter()
            .map(|s| {
                let n = s.active_connections();
                (s, n)
            })
            .collect();

        let min = loads.iter().map(|(_, n)| *n).min()?;
        let tied: Vec<Arc<Server>> = loads
            .into_iter()
            .filter(|(_, n)| *n == min)
            .map(|(s, _)| s)
            .collect();

        rotate(&self.tie_cursor, &tied)
    }
}
