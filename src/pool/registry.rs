//! Server pool management.
//!
//! # Responsibilities
//! - Own every server record and its counters
//! - Provide the order-preserving healthy view strategies select from
//! - Apply connection deltas, outcomes and health transitions
//! - Apply membership changes as set differences

use std::collections::BTreeSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::PoolConfig;
use crate::observability::metrics;
use crate::pool::server::{Server, ServerId};

/// Errors produced by pool operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("unknown server {0}")]
    UnknownServer(ServerId),

    #[error("server {0} is already in the pool")]
    DuplicateServer(ServerId),
}

/// Result of reconciling the pool against a new membership list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipChange {
    pub added: Vec<ServerId>,
    pub removed: Vec<ServerId>,
}

impl MembershipChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Read-only view of one server, used by the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSnapshot {
    pub host: String,
    pub port: u16,
    pub healthy: bool,
    pub manually_disabled: bool,
    pub connections: usize,
    pub failures: u32,
    pub avg_response_time_ms: Option<f64>,
}

impl From<&Server> for ServerSnapshot {
    fn from(server: &Server) -> Self {
        Self {
            host: server.id().host.clone(),
            port: server.id().port,
            healthy: server.is_healthy(),
            manually_disabled: server.is_manually_disabled(),
            connections: server.active_connections(),
            failures: server.failure_count(),
            avg_response_time_ms: server.avg_response_time_ms(),
        }
    }
}

/// The shared registry of backend servers.
///
/// Reads are lock-free: the ordered member list sits behind an `ArcSwap`
/// and every counter is a per-server atomic. Only membership changes take
/// a lock, and only against each other.
#[derive(Debug)]
pub struct ServerPool {
    servers: ArcSwap<Vec<Arc<Server>>>,
    index: DashMap<ServerId, Arc<Server>>,
    membership: Mutex<()>,
    config: PoolConfig,
}

impl ServerPool {
    /// Create an empty pool.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            servers: ArcSwap::from_pointee(Vec::new()),
            index: DashMap::new(),
            membership: Mutex::new(()),
            config,
        }
    }

    /// Create a pool populated from a static server list.
    pub fn with_servers<I>(ids: I, config: PoolConfig) -> Result<Self, PoolError>
    where
        I: IntoIterator<Item = ServerId>,
    {
        let pool = Self::new(config);
        for id in ids {
            pool.add_server(id)?;
        }
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Insert a new server at the end of the rotation order.
    pub fn add_server(&self, id: ServerId) -> Result<Arc<Server>, PoolError> {
        let _guard = self.membership.lock();
        if self.index.contains_key(&id) {
            return Err(PoolError::DuplicateServer(id));
        }

        let server = Arc::new(Server::new(id.clone(), self.config.response_window));
        let mut next = self.servers.load().as_ref().clone();
        next.push(server.clone());
        self.index.insert(id.clone(), server.clone());
        self.servers.store(Arc::new(next));

        metrics::record_backend_health(&id.to_string(), true);
        tracing::info!(server = %id, "Server added to pool");
        Ok(server)
    }

    /// Remove a server. In-flight dispatches keep their `Arc` alive.
    pub fn remove_server(&self, id: &ServerId) -> Result<Arc<Server>, PoolError> {
        let _guard = self.membership.lock();
        let (_, server) = self
            .index
            .remove(id)
            .ok_or_else(|| PoolError::UnknownServer(id.clone()))?;

        let next: Vec<Arc<Server>> = self
            .servers
            .load()
            .iter()
            .filter(|s| s.id() != id)
            .cloned()
            .collect();
        self.servers.store(Arc::new(next));

        tracing::info!(server = %id, "Server removed from pool");
        Ok(server)
    }

    /// Bring the pool in line with `desired`.
    ///
    /// `added = desired − current`, `removed = current − desired`; servers in
    /// both keep their counters and position.
    pub fn reconcile(&self, desired: &[ServerId]) -> MembershipChange {
        let current: BTreeSet<ServerId> = self.members().into_iter().collect();
        let wanted: BTreeSet<ServerId> = desired.iter().cloned().collect();

        let mut change = MembershipChange::default();
        for id in current.difference(&wanted) {
            if self.remove_server(id).is_ok() {
                change.removed.push(id.clone());
            }
        }
        // Preserve the configured order for insertions
        for id in desired {
            if !current.contains(id) && !change.added.contains(id) && self.add_server(id.clone()).is_ok() {
                change.added.push(id.clone());
            }
        }

        if !change.is_empty() {
            tracing::info!(
                added = change.added.len(),
                removed = change.removed.len(),
                "Pool membership reconciled"
            );
        }
        change
    }

    /// Identities of every member, in rotation order.
    pub fn members(&self) -> Vec<ServerId> {
        self.servers.load().iter().map(|s| s.id().clone()).collect()
    }

    /// Every member, healthy or not, in rotation order.
    pub fn all(&self) -> Arc<Vec<Arc<Server>>> {
        self.servers.load_full()
    }

    /// Healthy members, in rotation order.
    pub fn list_healthy(&self) -> Vec<Arc<Server>> {
        self.servers
            .load()
            .iter()
            .filter(|s| s.is_healthy())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.servers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.load().is_empty()
    }

    pub fn get(&self, id: &ServerId) -> Option<Arc<Server>> {
        self.index.get(id).map(|entry| entry.value().clone())
    }

    fn require(&self, id: &ServerId) -> Result<Arc<Server>, PoolError> {
        self.get(id).ok_or_else(|| PoolError::UnknownServer(id.clone()))
    }

    /// Apply a connection delta; the count saturates at zero.
    pub fn adjust_connections(&self, id: &ServerId, delta: i64) -> Result<usize, PoolError> {
        let server = self.require(id)?;
        if delta >= 0 {
            for _ in 0..delta {
                server.inc_connections();
            }
        } else {
            for _ in 0..delta.unsigned_abs() {
                server.dec_connections();
            }
        }
        let now = server.active_connections();
        metrics::record_active_connections(&id.to_string(), now);
        Ok(now)
    }

    /// Record the outcome of a relayed connection.
    ///
    /// Latency is sampled only for successes. Failures bump `failure_count`
    /// and reset the success streak that drives failure decay.
    pub fn report_outcome(&self, id: &ServerId, success: bool, latency_ms: f64) -> Result<(), PoolError> {
        let server = self.require(id)?;
        if success {
            server.record_success(latency_ms, self.config.recovery_streak);
        } else {
            let failures = server.record_failure();
            tracing::debug!(server = %id, failures, "Connection failure recorded");
        }
        metrics::record_backend_failures(&id.to_string(), server.failure_count());
        Ok(())
    }

    /// Count a failure without any health transition (e.g. a failed probe).
    pub fn record_failure(&self, id: &ServerId) -> Result<u32, PoolError> {
        let server = self.require(id)?;
        let failures = server.record_failure();
        metrics::record_backend_failures(&id.to_string(), failures);
        Ok(failures)
    }

    /// Apply a health transition reported by the health monitor.
    ///
    /// Returns `true` if the automatic health flag changed. A transition to
    /// unhealthy counts as a failure.
    pub fn set_health(&self, id: &ServerId, healthy: bool) -> Result<bool, PoolError> {
        let server = self.require(id)?;
        let was = server.swap_healthy(healthy);
        if was == healthy {
            return Ok(false);
        }

        if healthy {
            tracing::info!(server = %id, "Server marked healthy");
        } else {
            let failures = server.record_failure();
            metrics::record_backend_failures(&id.to_string(), failures);
            tracing::warn!(server = %id, failures, "Server marked unhealthy");
        }
        metrics::record_backend_health(&id.to_string(), server.is_healthy());
        Ok(true)
    }

    /// Take a server out of rotation until [`enable`](Self::enable) is called.
    pub fn disable(&self, id: &ServerId) -> Result<(), PoolError> {
        let server = self.require(id)?;
        server.set_manually_disabled(true);
        metrics::record_backend_health(&id.to_string(), false);
        tracing::info!(server = %id, "Server manually disabled");
        Ok(())
    }

    /// Return a manually disabled server to rotation with a clean record.
    pub fn enable(&self, id: &ServerId) -> Result<(), PoolError> {
        let server = self.require(id)?;
        server.set_manually_disabled(false);
        server.swap_healthy(true);
        server.clear_failures();
        metrics::record_backend_health(&id.to_string(), true);
        tracing::info!(server = %id, "Server manually enabled");
        Ok(())
    }

    /// True when the pool has members and none of them is healthy.
    pub fn all_servers_down(&self) -> bool {
        let servers = self.servers.load();
        !servers.is_empty() && !servers.iter().any(|s| s.is_healthy())
    }

    pub fn snapshot(&self) -> Vec<ServerSnapshot> {
        self.servers
            .load()
            .iter()
            .map(|s| ServerSnapshot::from(s.as_ref()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(port: u16) -> ServerId {
        ServerId::new("127.0.0.1", port)
    }

    fn pool(ports: &[u16]) -> ServerPool {
        ServerPool::with_servers(ports.iter().map(|p| id(*p)), PoolConfig::default()).unwrap()
    }

    #[test]
    fn test_rejects_duplicate_identity() {
        let pool = pool(&[8081]);
        assert_eq!(
            pool.add_server(id(8081)).unwrap_err(),
            PoolError::DuplicateServer(id(8081))
        );
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_list_healthy_preserves_order() {
        let pool = pool(&[8081, 8082, 8083]);
        pool.set_health(&id(8082), false).unwrap();

        let healthy: Vec<u16> = pool.list_healthy().iter().map(|s| s.id().port).collect();
        assert_eq!(healthy, vec![8081, 8083]);
    }

    #[test]
    fn test_unhealthy_transition_counts_failure_once() {
        let pool = pool(&[8081]);
        assert!(pool.set_health(&id(8081), false).unwrap());
        assert!(!pool.set_health(&id(8081), false).unwrap());
        assert_eq!(pool.get(&id(8081)).unwrap().failure_count(), 1);

        // Recovery leaves the failure history to the decay rule
        assert!(pool.set_health(&id(8081), true).unwrap());
        assert_eq!(pool.get(&id(8081)).unwrap().failure_count(), 1);
    }

    #[test]
    fn test_adjust_connections() {
        let pool = pool(&[8081]);
        assert_eq!(pool.adjust_connections(&id(8081), 1).unwrap(), 1);
        assert_eq!(pool.adjust_connections(&id(8081), 2).unwrap(), 3);
        assert_eq!(pool.adjust_connections(&id(8081), -5).unwrap(), 0);
        assert!(matches!(
            pool.adjust_connections(&id(9999), 1),
            Err(PoolError::UnknownServer(_))
        ));
    }

    #[test]
    fn test_report_outcome_records_latency_on_success_only() {
        let pool = pool(&[8081]);
        pool.report_outcome(&id(8081), true, 12.0).unwrap();
        pool.report_outcome(&id(8081), false, 900.0).unwrap();

        let server = pool.get(&id(8081)).unwrap();
        assert_eq!(server.avg_response_time_ms(), Some(12.0));
        assert_eq!(server.failure_count(), 1);
    }

    #[test]
    fn test_manual_disable_survives_health_probe() {
        let pool = pool(&[8081, 8082]);
        pool.disable(&id(8081)).unwrap();
        pool.set_health(&id(8081), true).unwrap();
        assert_eq!(pool.list_healthy().len(), 1);

        pool.report_outcome(&id(8081), false, 0.0).unwrap();
        pool.enable(&id(8081)).unwrap();
        let server = pool.get(&id(8081)).unwrap();
        assert!(server.is_healthy());
        assert_eq!(server.failure_count(), 0);
    }

    #[test]
    fn test_all_servers_down() {
        let empty = ServerPool::new(PoolConfig::default());
        assert!(!empty.all_servers_down());

        let pool = pool(&[8081, 8082]);
        pool.set_health(&id(8081), false).unwrap();
        assert!(!pool.all_servers_down());
        pool.set_health(&id(8082), false).unwrap();
        assert!(pool.all_servers_down());
    }

    #[test]
    fn test_reconcile_is_set_difference() {
        let pool = pool(&[8081, 8082, 8083]);
        pool.adjust_connections(&id(8082), 4).unwrap();

        let change = pool.reconcile(&[id(8082), id(8083), id(8084)]);
        assert_eq!(change.added, vec![id(8084)]);
        assert_eq!(change.removed, vec![id(8081)]);
        assert_eq!(pool.members(), vec![id(8082), id(8083), id(8084)]);

        // Surviving members keep their counters
        assert_eq!(pool.get(&id(8082)).unwrap().active_connections(), 4);

        assert!(pool.reconcile(&pool.members()).is_empty());
    }
}
