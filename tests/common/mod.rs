//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use tcp_balancer::config::{PoolConfig, StrategyConfig};
use tcp_balancer::strategy::{Clock, ManualClock};
use tcp_balancer::{Balancer, ServerId, ServerPool, StrategyKind};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub fn id(port: u16) -> ServerId {
    ServerId::new("127.0.0.1", port)
}

pub fn pool(ports: &[u16]) -> Arc<ServerPool> {
    Arc::new(ServerPool::with_servers(ports.iter().map(|p| id(*p)), PoolConfig::default()).unwrap())
}

pub fn strategy(kind: StrategyKind) -> StrategyConfig {
    StrategyConfig {
        kind,
        seed: Some(42),
        ..StrategyConfig::default()
    }
}

/// A balancer over `pool` driven by a manual clock.
pub fn balancer(pool: Arc<ServerPool>, kind: StrategyKind) -> (Arc<Balancer>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let balancer = Balancer::with_clock(pool, strategy(kind), dyn_clock).unwrap();
    (Arc::new(balancer), clock)
}

/// Start a mock HTTP backend that answers every connection with `body`.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// A local port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}
