//! The balancer front-end.
//!
//! # Responsibilities
//! - Hold the active strategy behind an atomic pointer
//! - Turn a selection into a tracked [`Dispatch`]
//! - Feed outcomes back into the pool, the strategy and the stats
//! - Serve read-only status, metrics and performance views

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use serde::Serialize;
use thiserror::Error;

use crate::config::{StrategyConfig, ValidationError};
use crate::engine::stats::{PerformanceReport, PerformanceStats};
use crate::observability::metrics;
use crate::pool::{PoolError, Server, ServerId, ServerPool};
use crate::strategy::{
    self, Clock, Completion, MetricsSnapshot, Strategy, StrategyKind, SystemClock, UnknownStrategy,
};

/// Errors surfaced by the engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("no server available")]
    NoServerAvailable,

    #[error("unknown strategy '{0}'")]
    UnknownStrategy(String),

    #[error("invalid strategy configuration: {}", join(.0))]
    InvalidConfig(Vec<ValidationError>),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl From<UnknownStrategy> for EngineError {
    fn from(err: UnknownStrategy) -> Self {
        EngineError::UnknownStrategy(err.0)
    }
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A strategy instance together with the parameters it was built from.
#[derive(Debug)]
struct ActiveStrategy {
    config: StrategyConfig,
    strategy: Arc<dyn Strategy>,
}

/// Summary served at `/api/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub running: bool,
    pub strategy: StrategyKind,
    pub total_servers: usize,
    pub healthy_servers: usize,
    pub all_servers_down: bool,
}

/// Routes connections through the active strategy.
#[derive(Debug)]
pub struct Balancer {
    pool: Arc<ServerPool>,
    active: ArcSwap<ActiveStrategy>,
    clock: Arc<dyn Clock>,
    stats: Arc<PerformanceStats>,
}

impl Balancer {
    pub fn new(pool: Arc<ServerPool>, config: StrategyConfig) -> Result<Self, EngineError> {
        Self::with_clock(pool, config, Arc::new(SystemClock))
    }

    /// Build with an explicit time source, shared with time-aware strategies.
    pub fn with_clock(
        pool: Arc<ServerPool>,
        config: StrategyConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let strategy = strategy::build(&config, clock.clone()).map_err(EngineError::InvalidConfig)?;
        tracing::info!(strategy = %config.kind, servers = pool.len(), "Balancer initialized");

        Ok(Self {
            pool,
            active: ArcSwap::from_pointee(ActiveStrategy {
                config,
                strategy: Arc::from(strategy),
            }),
            clock,
            stats: Arc::new(PerformanceStats::new()),
        })
    }

    pub fn pool(&self) -> &Arc<ServerPool> {
        &self.pool
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.active.load().config.kind
    }

    /// Parameters of the active strategy.
    pub fn strategy_config(&self) -> StrategyConfig {
        self.active.load().config.clone()
    }

    /// Ask the active strategy for a server without tracking a connection.
    pub fn select(&self, key: Option<&str>) -> Option<Arc<Server>> {
        self.active.load().strategy.select(&self.pool, key)
    }

    /// Select a server and account for a new connection on it.
    ///
    /// `key` is the request key for key-aware strategies; the relay passes
    /// the client address.
    pub fn dispatch(&self, key: Option<&str>) -> Result<Dispatch, EngineError> {
        let active = self.active.load_full();

        // A server removed between selection and accounting gets one reselect
        let mut attempts = 0;
        let server = loop {
            attempts += 1;
            let Some(server) = active.strategy.select(&self.pool, key) else {
                metrics::record_no_server();
                self.stats.reject(key.map(str::to_string));
                tracing::warn!(strategy = %active.config.kind, "No server available");
                return Err(EngineError::NoServerAvailable);
            };
            match self.pool.adjust_connections(server.id(), 1) {
                Ok(_) => break server,
                Err(PoolError::UnknownServer(id)) if attempts < 2 => {
                    tracing::debug!(server = %id, "Selected server left the pool, reselecting");
                }
                Err(e) => return Err(e.into()),
            }
        };

        let id = server.id().clone();
        let started = self.clock.now();
        active.strategy.on_dispatch(&id, started);
        let hedge = active.strategy.hedge_advice(&id);
        self.stats.begin();

        tracing::debug!(server = %id, strategy = %active.config.kind, hedge, "Dispatched");
        Ok(Dispatch {
            server,
            strategy: active.strategy.clone(),
            pool: self.pool.clone(),
            stats: self.stats.clone(),
            clock: self.clock.clone(),
            started,
            client: key.map(str::to_string),
            hedge,
            finished: false,
        })
    }

    /// Record an outcome reported outside a [`Dispatch`] guard.
    pub fn report_outcome(&self, id: &ServerId, success: bool, latency_ms: f64) -> Result<(), EngineError> {
        self.pool.report_outcome(id, success, latency_ms)?;
        self.active.load().strategy.on_complete(
            id,
            &Completion {
                success,
                latency_ms,
                started: None,
            },
        );
        Ok(())
    }

    pub fn adjust_connections(&self, id: &ServerId, delta: i64) -> Result<usize, EngineError> {
        Ok(self.pool.adjust_connections(id, delta)?)
    }

    /// Apply a health transition. Returns whether the status changed.
    pub fn set_health(&self, id: &ServerId, healthy: bool) -> Result<bool, EngineError> {
        Ok(self.pool.set_health(id, healthy)?)
    }

    /// Flip a server between manually disabled and enabled.
    /// Returns `true` if the server is now in rotation.
    pub fn toggle_server(&self, id: &ServerId) -> Result<bool, EngineError> {
        let server = self.pool.get(id).ok_or_else(|| PoolError::UnknownServer(id.clone()))?;
        if server.is_manually_disabled() {
            self.pool.enable(id)?;
            Ok(true)
        } else {
            self.pool.disable(id)?;
            Ok(false)
        }
    }

    /// Replace the active strategy with a fresh instance.
    ///
    /// On error the previous strategy stays in place. Connections already
    /// dispatched keep reporting to the strategy that chose them.
    pub fn switch_strategy(&self, config: StrategyConfig) -> Result<(), EngineError> {
        let strategy = strategy::build(&config, self.clock.clone()).map_err(|errors| {
            tracing::warn!(strategy = %config.kind, errors = errors.len(), "Rejected strategy switch");
            EngineError::InvalidConfig(errors)
        })?;

        let kind = config.kind;
        let previous = self.active.swap(Arc::new(ActiveStrategy {
            config,
            strategy: Arc::from(strategy),
        }));

        metrics::record_strategy_switch(kind.as_str());
        tracing::info!(from = %previous.config.kind, to = %kind, "Strategy switched");
        Ok(())
    }

    /// Switch by name. Without `params` the current parameters are reused.
    pub fn switch_strategy_named(
        &self,
        name: &str,
        params: Option<StrategyConfig>,
    ) -> Result<StrategyKind, EngineError> {
        let kind: StrategyKind = name.parse()?;
        let mut config = params.unwrap_or_else(|| self.strategy_config());
        config.kind = kind;
        self.switch_strategy(config)?;
        Ok(kind)
    }

    /// Metrics view of the pool under the active strategy.
    pub fn metrics(&self) -> MetricsSnapshot {
        let active = self.active.load();
        let mut snapshot = MetricsSnapshot::base(active.config.kind, &self.pool);
        active.strategy.annotate(&mut snapshot);
        snapshot
    }

    pub fn status(&self) -> StatusView {
        StatusView {
            running: true,
            strategy: self.strategy_kind(),
            total_servers: self.pool.len(),
            healthy_servers: self.pool.list_healthy().len(),
            all_servers_down: self.pool.all_servers_down(),
        }
    }

    pub fn performance(&self) -> PerformanceReport {
        self.stats.report()
    }
}

/// A connection in flight on one server.
///
/// Finish it with [`complete`](Dispatch::complete). Dropping it unfinished
/// reports a failure, so the connection count never leaks.
#[derive(Debug)]
#[must_use = "dropping a Dispatch reports a failed connection"]
pub struct Dispatch {
    server: Arc<Server>,
    strategy: Arc<dyn Strategy>,
    pool: Arc<ServerPool>,
    stats: Arc<PerformanceStats>,
    clock: Arc<dyn Clock>,
    started: Instant,
    client: Option<String>,
    hedge: bool,
    finished: bool,
}

impl Dispatch {
    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub fn id(&self) -> &ServerId {
        self.server.id()
    }

    /// Whether the strategy flagged this request for hedging.
    pub fn hedge_advised(&self) -> bool {
        self.hedge
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.started)
    }

    /// Report the outcome and release the connection.
    pub fn complete(mut self, success: bool) {
        self.finish(success);
    }

    fn finish(&mut self, success: bool) {
        if self.finished {
            return;
        }
        self.finished = true;

        let id = self.server.id();
        let elapsed = self.elapsed();
        let latency_ms = elapsed.as_secs_f64() * 1000.0;

        // The server may have left the pool while the connection was open
        if self.pool.adjust_connections(id, -1).is_err() {
            self.server.dec_connections();
        }
        if let Err(e) = self.pool.report_outcome(id, success, latency_ms) {
            tracing::debug!(server = %id, error = %e, "Outcome for departed server");
        }
        self.strategy.on_complete(
            id,
            &Completion {
                success,
                latency_ms,
                started: Some(self.started),
            },
        );

        let name = id.to_string();
        metrics::record_request(&name, success, elapsed);
        self.stats.finish(&name, success, elapsed, self.client.take());
        tracing::debug!(server = %id, success, latency_ms, "Connection finished");
    }
}

impl Drop for Dispatch {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(server = %self.server.id(), "Dispatch dropped without completion");
            self.finish(false);
        }
    }
}
