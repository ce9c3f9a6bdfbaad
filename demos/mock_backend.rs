//! Minimal HTTP backend for trying the balancer locally.
//!
//! ```text
//! cargo run --example mock_backend -- 8081 8082 8083
//! ```
//!
//! Each port answers every request with its own name. `?delay=<ms>` in the
//! request line delays the reply.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("mock_backend=info").init();

    let ports: Vec<u16> = std::env::args()
        .skip(1)
        .map(|p| p.parse())
        .collect::<Result<_, _>>()?;
    let ports = if ports.is_empty() { vec![8081, 8082, 8083] } else { ports };

    let mut tasks = Vec::new();
    for port in ports {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        tracing::info!(port, "Mock backend listening");
        tasks.push(tokio::spawn(serve(listener, port)));
    }
    for task in tasks {
        task.await?;
    }
    Ok(())
}

async fn serve(listener: TcpListener, port: u16) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(respond(stream, port));
            }
            Err(e) => tracing::warn!(port, error = %e, "Accept failed"),
        }
    }
}

async fn respond(mut stream: TcpStream, port: u16) {
    let mut buf = [0u8; 1024];
    let n = stream.read(&mut buf).await.unwrap_or(0);
    let request = String::from_utf8_lossy(&buf[..n]);

    if let Some(ms) = delay_ms(&request) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    let body = format!("Server-{port}\n");
    let reply = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(reply.as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn delay_ms(request: &str) -> Option<u64> {
    let path = request.lines().next()?.split_whitespace().nth(1)?;
    let query = path.split_once('?')?.1;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("delay="))
        .and_then(|v| v.parse().ok())
}
