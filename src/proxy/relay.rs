//! Byte relay between a client and the chosen backend.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{self, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ProxyConfig;
use crate::engine::{Balancer, EngineError};
use crate::proxy::listener::{Listener, ListenerError};

const UNAVAILABLE: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\n\r\nService Unavailable";

/// How one client connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Relayed,
    NoServer,
    ConnectFailed,
    RelayFailed,
}

/// Accept loop feeding connections through the balancer.
pub struct ProxyServer {
    listener: Listener,
    balancer: Arc<Balancer>,
    connect_timeout: Duration,
}

impl ProxyServer {
    pub fn new(listener: Listener, balancer: Arc<Balancer>, config: &ProxyConfig) -> Self {
        Self {
            listener,
            balancer,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Serve until shutdown. In-flight relays finish on their own tasks.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ListenerError> {
        tracing::info!(address = ?self.local_addr().ok(), "Proxy accepting connections");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let balancer = self.balancer.clone();
                        let connect_timeout = self.connect_timeout;
                        tokio::spawn(async move {
                            let _permit = permit;
                            handle_connection(stream, peer, &balancer, connect_timeout).await;
                        });
                    }
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Accept failed");
                    }
                    Err(e) => return Err(e),
                },
                _ = shutdown.recv() => {
                    tracing::info!("Proxy received shutdown signal, no longer accepting");
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Route one client connection and relay it to completion.
pub async fn handle_connection(
    client: TcpStream,
    peer: SocketAddr,
    balancer: &Balancer,
    connect_timeout: Duration,
) -> RelayOutcome {
    let span = tracing::info_span!("connection", id = %Uuid::new_v4(), peer = %peer);
    relay(client, peer, balancer, connect_timeout)
        .instrument(span)
        .await
}

async fn relay(
    mut client: TcpStream,
    peer: SocketAddr,
    balancer: &Balancer,
    connect_timeout: Duration,
) -> RelayOutcome {
    let key = peer.ip().to_string();
    let dispatch = match balancer.dispatch(Some(&key)) {
        Ok(dispatch) => dispatch,
        Err(EngineError::NoServerAvailable) => {
            reply_unavailable(&mut client).await;
            return RelayOutcome::NoServer;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Dispatch failed");
            reply_unavailable(&mut client).await;
            return RelayOutcome::NoServer;
        }
    };

    let id = dispatch.id().clone();
    let mut backend = match time::timeout(connect_timeout, TcpStream::connect((id.host.as_str(), id.port))).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            tracing::warn!(server = %id, error = %e, "Backend connect failed");
            dispatch.complete(false);
            return RelayOutcome::ConnectFailed;
        }
        Err(_) => {
            tracing::warn!(server = %id, timeout = ?connect_timeout, "Backend connect timed out");
            dispatch.complete(false);
            return RelayOutcome::ConnectFailed;
        }
    };

    match io::copy_bidirectional(&mut client, &mut backend).await {
        Ok((to_backend, to_client)) => {
            tracing::debug!(server = %id, to_backend, to_client, "Relay finished");
            dispatch.complete(true);
            RelayOutcome::Relayed
        }
        Err(e) => {
            tracing::warn!(server = %id, error = %e, "Relay failed");
            dispatch.complete(false);
            RelayOutcome::RelayFailed
        }
    }
}

async fn reply_unavailable(client: &mut TcpStream) {
    if let Err(e) = client.write_all(UNAVAILABLE).await {
        tracing::debug!(error = %e, "Could not send 503");
    }
    let _ = client.shutdown().await;
}
