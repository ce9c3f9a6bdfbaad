//! Ordered startup and config reload.
//!
//! Startup order: pool → balancer → proxy listener → health monitor → admin API.
//! Every spawned task subscribes to the shared [`Shutdown`].

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::admin::{self, AdminState};
use crate::config::{BalancerConfig, StrategyConfig};
use crate::engine::{Balancer, EngineError};
use crate::health::HealthMonitor;
use crate::lifecycle::shutdown::Shutdown;
use crate::pool::{MembershipChange, PoolError, ServerPool};
use crate::proxy::{Listener, ListenerError, ProxyServer};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("Failed to bind admin API: {0}")]
    Admin(std::io::Error),
}

/// Handles to the running services.
pub struct Services {
    pub balancer: Arc<Balancer>,
    pub proxy_addr: SocketAddr,
    pub admin_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl Services {
    /// Wait for every service task to exit.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Service task failed");
            }
        }
    }
}

/// Bring up every service described by `config`.
pub async fn start(config: &BalancerConfig, shutdown: &Shutdown) -> Result<Services, StartupError> {
    let pool = Arc::new(ServerPool::with_servers(config.server_ids(), config.pool.clone())?);
    let balancer = Arc::new(Balancer::new(pool.clone(), config.strategy.clone())?);
    let mut tasks = Vec::new();

    let listener = Listener::bind(&config.listener).await?;
    let proxy = ProxyServer::new(listener, balancer.clone(), &config.proxy);
    let proxy_addr = proxy.local_addr().map_err(ListenerError::Bind)?;
    let rx = shutdown.subscribe();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = proxy.run(rx).await {
            tracing::error!(error = %e, "Proxy stopped with error");
        }
    }));

    if config.health_check.enabled {
        let monitor = HealthMonitor::new(pool, config.health_check.clone());
        tasks.push(tokio::spawn(monitor.run(shutdown.subscribe())));
    }

    let mut admin_addr = None;
    if config.admin.enabled {
        let listener = TcpListener::bind(config.admin.bind_address.as_str())
            .await
            .map_err(StartupError::Admin)?;
        admin_addr = listener.local_addr().ok();
        let state = AdminState {
            balancer: balancer.clone(),
            api_key: Arc::from(config.admin.api_key.as_str()),
        };
        let rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = admin::serve(listener, state, rx).await {
                tracing::error!(error = %e, "Admin API stopped with error");
            }
        }));
    }

    tracing::info!(
        proxy = %proxy_addr,
        admin = ?admin_addr,
        strategy = %balancer.strategy_kind(),
        servers = balancer.pool().len(),
        "Balancer started"
    );

    Ok(Services {
        balancer,
        proxy_addr,
        admin_addr,
        tasks,
    })
}

/// Applies reloaded configuration files to a running balancer.
///
/// Membership is reconciled on every reload. The strategy is rebuilt only
/// when the file's `[strategy]` section changed since the previous load, so
/// a CLI override or an admin switch survives unrelated edits. Listener and
/// admin addresses are not rebound.
#[derive(Debug)]
pub struct ConfigReloader {
    balancer: Arc<Balancer>,
    file_strategy: StrategyConfig,
}

impl ConfigReloader {
    /// `file_strategy` is the `[strategy]` section as read from disk, before
    /// any command-line override.
    pub fn new(balancer: Arc<Balancer>, file_strategy: StrategyConfig) -> Self {
        Self {
            balancer,
            file_strategy,
        }
    }

    pub fn apply(&mut self, config: &BalancerConfig) -> MembershipChange {
        let change = self.balancer.pool().reconcile(&config.server_ids());

        if self.file_strategy != config.strategy {
            match self.balancer.switch_strategy(config.strategy.clone()) {
                Ok(()) => self.file_strategy = config.strategy.clone(),
                Err(e) => {
                    tracing::error!(error = %e, "Reloaded strategy rejected, keeping current strategy")
                }
            }
        }
        change
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolConfig, ServerConfig};
    use crate::pool::ServerId;
    use crate::strategy::StrategyKind;

    fn server(port: u16) -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port,
        }
    }

    fn reloader(ports: &[u16], file: &BalancerConfig) -> (Arc<Balancer>, ConfigReloader) {
        let ids = ports.iter().map(|p| ServerId::new("127.0.0.1", *p));
        let pool = Arc::new(ServerPool::with_servers(ids, PoolConfig::default()).unwrap());
        let balancer = Arc::new(Balancer::new(pool, file.strategy.clone()).unwrap());
        let reloader = ConfigReloader::new(balancer.clone(), file.strategy.clone());
        (balancer, reloader)
    }

    #[test]
    fn test_reload_reconciles_and_switches() {
        let mut config = BalancerConfig::default();
        config.servers = vec![server(1), server(2)];
        let (balancer, mut reloader) = reloader(&[1, 2], &config);

        config.servers = vec![server(2), server(3)];
        config.strategy.kind = StrategyKind::LeastConnections;

        let change = reloader.apply(&config);
        assert_eq!(change.added, vec![ServerId::new("127.0.0.1", 3)]);
        assert_eq!(change.removed, vec![ServerId::new("127.0.0.1", 1)]);
        assert_eq!(balancer.strategy_kind(), StrategyKind::LeastConnections);
        assert_eq!(
            balancer.pool().members(),
            vec![ServerId::new("127.0.0.1", 2), ServerId::new("127.0.0.1", 3)]
        );
    }

    #[test]
    fn test_runtime_switch_survives_membership_reload() {
        let mut config = BalancerConfig::default();
        config.servers = vec![server(1), server(2)];
        let (balancer, mut reloader) = reloader(&[1, 2], &config);

        balancer.switch_strategy_named("beta1", None).unwrap();

        config.servers.push(server(3));
        let change = reloader.apply(&config);
        assert_eq!(change.added, vec![ServerId::new("127.0.0.1", 3)]);
        assert_eq!(balancer.strategy_kind(), StrategyKind::Beta1);

        // An edit to the strategy section itself still takes effect
        config.strategy.kind = StrategyKind::Alpha1;
        reloader.apply(&config);
        assert_eq!(balancer.strategy_kind(), StrategyKind::Alpha1);
    }

    #[test]
    fn test_rejected_strategy_keeps_current_until_fixed() {
        let config = BalancerConfig::default();
        let (balancer, mut reloader) = reloader(&[], &config);

        let mut bad = config.clone();
        bad.strategy.kind = StrategyKind::Alpha1;
        bad.strategy.alpha1.ewma_alpha = 0.0;
        reloader.apply(&bad);
        assert_eq!(balancer.strategy_kind(), StrategyKind::RoundRobin);

        bad.strategy.alpha1.ewma_alpha = 0.5;
        reloader.apply(&bad);
        assert_eq!(balancer.strategy_kind(), StrategyKind::Alpha1);
    }
}
