//! End-to-end TCP relay through the balancer.

use std::time::Duration;

use tcp_balancer::config::BalancerConfig;
use tcp_balancer::config::ServerConfig;
use tcp_balancer::lifecycle::{self, Shutdown};
use tcp_balancer::proxy::{handle_connection, RelayOutcome};
use tcp_balancer::StrategyKind;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

mod common;
use common::{balancer, closed_port, id, pool, start_mock_backend};

async fn request(addr: std::net::SocketAddr) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\nHost: test\r\n\r\n").await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

fn config_for(ports: &[u16]) -> BalancerConfig {
    let mut config = BalancerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.admin.enabled = false;
    config.health_check.enabled = false;
    config.servers = ports
        .iter()
        .map(|port| ServerConfig {
            host: "127.0.0.1".into(),
            port: *port,
        })
        .collect();
    config
}

#[tokio::test]
async fn relays_round_robin_across_backends() {
    let a = start_mock_backend("alpha").await;
    let b = start_mock_backend("bravo").await;

    let shutdown = Shutdown::new();
    let services = lifecycle::start(&config_for(&[a.port(), b.port()]), &shutdown)
        .await
        .unwrap();

    let mut bodies = Vec::new();
    for _ in 0..4 {
        bodies.push(request(services.proxy_addr).await);
    }
    assert!(bodies[0].ends_with("alpha"));
    assert!(bodies[1].ends_with("bravo"));
    assert!(bodies[2].ends_with("alpha"));
    assert!(bodies[3].ends_with("bravo"));

    // Completion is reported after the relay task finishes
    let balancer = services.balancer.clone();
    for _ in 0..50 {
        if balancer.performance().successful_requests == 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let report = balancer.performance();
    assert_eq!(report.successful_requests, 4);
    assert_eq!(report.active_connections, 0);
    assert_eq!(report.server_request_counts.get(&a.to_string()), Some(&2));

    shutdown.trigger();
    services.join().await;
}

#[tokio::test]
async fn answers_503_when_no_server_is_available() {
    let shutdown = Shutdown::new();
    let services = lifecycle::start(&config_for(&[]), &shutdown).await.unwrap();

    // Read only: unread request bytes would turn the close into a reset
    let mut stream = TcpStream::connect(services.proxy_addr).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 503 Service Unavailable"));
    assert_eq!(services.balancer.performance().failed_requests, 1);

    shutdown.trigger();
    services.join().await;
}

#[tokio::test]
async fn connect_failure_counts_against_the_server() {
    let dead = closed_port().await;
    let pool = pool(&[dead]);
    let (lb, _) = balancer(pool.clone(), StrategyKind::LeastConnections);

    let front = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let front_addr = front.local_addr().unwrap();
    let client = tokio::spawn(async move { TcpStream::connect(front_addr).await.unwrap() });
    let (accepted, peer) = front.accept().await.unwrap();
    let _client = client.await.unwrap();

    let outcome = handle_connection(accepted, peer, &lb, Duration::from_secs(1)).await;
    assert_eq!(outcome, RelayOutcome::ConnectFailed);

    let server = pool.get(&id(dead)).unwrap();
    assert_eq!(server.failure_count(), 1);
    assert_eq!(server.active_connections(), 0);
    assert_eq!(lb.performance().failed_requests, 1);
}
