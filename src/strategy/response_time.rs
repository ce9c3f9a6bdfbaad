//! Response-time based selection.
//!
//! Servers without samples are visited in rotation first; once every
//! healthy server has a sample the lowest recent average wins.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use dashmap::DashMap;

use crate::pool::{LatencyWindow, Server, ServerId, ServerPool};
use crate::strategy::{rotate, Completion, MetricsSnapshot, Strategy, StrategyKind};

const AVG_EPSILON: f64 = 1e-9;

#[derive(Debug)]
pub struct ResponseTime {
    windows: DashMap<ServerId, LatencyWindow>,
    window: usize,
    cursor: AtomicUsize,
}

impl ResponseTime {
    pub fn new(window: usize) -> Self {
        Self {
            windows: DashMap::new(),
            window,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn average(&self, id: &ServerId) -> Option<f64> {
        self.windows.get(id).and_then(|w| w.average())
    }

    pub fn record(&self, id: &ServerId, latency_ms: f64) {
        self.windows
            .entry(id.clone())
            .or_insert_with(|| LatencyWindow::new(self.window))
            .push(latency_ms);
    }
}

impl Strategy for ResponseTime {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ResponseTime
    }

    fn select(&self, pool: &ServerPool, _key: Option<&str>) -> Option<Arc<Server>> {
        let averaged: Vec<(Arc<Server>, Option<f64>)> = pool
            .list_healthy()
            .into_iter()
            .map(|s| {
                let avg = self.average(s.id());
                (s, avg)
            })
            .collect();

        let unsampled: Vec<Arc<Server>> = averaged
            .iter()
            .filter(|(_, avg)| avg.is_none())
            .map(|(s, _)| s.clone())
            .collect();
        if !unsampled.is_empty() {
            return rotate(&self.cursor, &unsampled);
        }

        let best = averaged
            .iter()
            .filter_map(|(_, avg)| *avg)
            .fold(f64::INFINITY, f64::min);
        let tied: Vec<Arc<Server>> = averaged
            .into_iter()
            .filter(|(_, avg)| avg.is_some_and(|a| (a - best).abs() <= AVG_EPSILON))
            .map(|(s, _)| s)
            .collect();

        rotate(&self.cursor, &tied)
    }

    fn on_complete(&self, server: &ServerId, completion: &Completion) {
        if completion.success {
            self.record(server, completion.latency_ms);
        }
    }

    fn annotate(&self, snapshot: &mut MetricsSnapshot) {
        for entry in self.windows.iter() {
            if let Some(server) = snapshot.server_mut(entry.key()) {
                server.avg_response_time_ms = entry.value().average();
            }
        }
    }
}
