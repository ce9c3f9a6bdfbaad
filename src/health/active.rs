//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every member with a TCP connect
//! - Retry a failed connect before counting the probe as failed
//! - Report failures and health transitions to the pool

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::health::state::{ProbeTracker, Verdict};
use crate::pool::{ServerId, ServerPool};

pub struct HealthMonitor {
    pool: Arc<ServerPool>,
    config: HealthCheckConfig,
    tracker: ProbeTracker,
}

impl HealthMonitor {
    pub fn new(pool: Arc<ServerPool>, config: HealthCheckConfig) -> Self {
        let tracker = ProbeTracker::new(config.healthy_threshold, config.unhealthy_threshold);
        Self {
            pool,
            config,
            tracker,
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            attempts = self.config.attempts,
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every member once and apply the results.
    pub async fn check_all(&mut self) {
        let members = self.pool.members();
        self.tracker.retain(&members);

        for id in members {
            let ok = self.probe(&id).await;
            self.apply(&id, ok);
        }
    }

    async fn probe(&self, id: &ServerId) -> bool {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let attempts = self.config.attempts.max(1);
        let addr = (id.host.as_str(), id.port);

        for attempt in 1..=attempts {
            match time::timeout(timeout, TcpStream::connect(addr)).await {
                Ok(Ok(_)) => return true,
                Ok(Err(e)) => {
                    tracing::debug!(server = %id, attempt, error = %e, "Health probe connect failed");
                }
                Err(_) => {
                    tracing::debug!(server = %id, attempt, "Health probe timed out");
                }
            }
            if attempt < attempts {
                time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            }
        }
        false
    }

    fn apply(&mut self, id: &ServerId, ok: bool) {
        let Some(server) = self.pool.get(id) else {
            return;
        };

        let result = match self.tracker.observe(id, ok) {
            Verdict::Recover if server.is_manually_disabled() => Ok(()),
            Verdict::Recover => self.pool.set_health(id, true).map(|_| ()),
            Verdict::Pending => Ok(()),
            Verdict::Failed => self.pool.record_failure(id).map(|_| ()),
            // Already unhealthy: the transition did not count this probe
            Verdict::Trip => match self.pool.set_health(id, false) {
                Ok(false) => self.pool.record_failure(id).map(|_| ()),
                other => other.map(|_| ()),
            },
        };

        if let Err(e) = result {
            tracing::debug!(server = %id, error = %e, "Server left the pool during health check");
        } else if !ok {
            tracing::warn!(server = %id, failures = server.failure_count(), "Health check failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use tokio::net::TcpListener;

    fn config() -> HealthCheckConfig {
        HealthCheckConfig {
            enabled: true,
            interval_secs: 1,
            timeout_secs: 1,
            attempts: 1,
            retry_delay_ms: 0,
            unhealthy_threshold: 2,
            healthy_threshold: 1,
        }
    }

    /// A port nothing listens on.
    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn test_failed_probes_trip_after_threshold() {
        let id = ServerId::new("127.0.0.1", closed_port().await);
        let pool = Arc::new(ServerPool::with_servers([id.clone()], PoolConfig::default()).unwrap());
        let mut monitor = HealthMonitor::new(pool.clone(), config());

        monitor.check_all().await;
        let server = pool.get(&id).unwrap();
        assert!(server.is_healthy());
        assert_eq!(server.failure_count(), 1);

        monitor.check_all().await;
        assert!(!server.is_healthy());
        assert_eq!(server.failure_count(), 2);

        monitor.check_all().await;
        assert_eq!(server.failure_count(), 3);
    }

    #[tokio::test]
    async fn test_recovers_but_respects_manual_disable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let up = ServerId::new("127.0.0.1", listener.local_addr().unwrap().port());
        let pool = Arc::new(ServerPool::with_servers([up.clone()], PoolConfig::default()).unwrap());
        let mut monitor = HealthMonitor::new(pool.clone(), config());

        pool.set_health(&up, false).unwrap();
        monitor.check_all().await;
        assert!(pool.get(&up).unwrap().is_healthy());

        pool.disable(&up).unwrap();
        monitor.check_all().await;
        assert!(!pool.get(&up).unwrap().is_healthy());
    }
}
