//! Admin HTTP API over the balancer.
//!
//! # Routes
//! - `GET  /api/status`             running flag, strategy, server counts
//! - `GET  /api/servers`            per-server snapshot
//! - `GET  /api/performance`        request statistics
//! - `GET  /api/algorithm-metrics`  strategy metrics snapshot
//! - `POST /api/strategy`           `{strategy, config?}`
//! - `POST /api/servers/toggle`     `{host, port}`

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::engine::Balancer;

use self::auth::admin_auth_middleware;
use self::handlers::*;

#[derive(Clone)]
pub struct AdminState {
    pub balancer: Arc<Balancer>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/servers", get(get_servers))
        .route("/api/performance", get(get_performance))
        .route("/api/algorithm-metrics", get(get_algorithm_metrics))
        .route("/api/strategy", post(post_strategy))
        .route("/api/servers/toggle", post(post_toggle))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until shutdown.
pub async fn serve(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    tracing::info!(address = ?listener.local_addr().ok(), "Admin API listening");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    tracing::info!("Admin API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolConfig, StrategyConfig};
    use crate::pool::{ServerId, ServerPool};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    fn state(api_key: &str) -> AdminState {
        let ids = [ServerId::new("127.0.0.1", 8081), ServerId::new("127.0.0.1", 8082)];
        let pool = Arc::new(ServerPool::with_servers(ids, PoolConfig::default()).unwrap());
        AdminState {
            balancer: Arc::new(Balancer::new(pool, StrategyConfig::default()).unwrap()),
            api_key: Arc::from(api_key),
        }
    }

    async fn call(router: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_status_and_servers() {
        let router = setup_admin_router(state(""));

        let (status, body) = call(router.clone(), get("/api/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["strategy"], "round_robin");
        assert_eq!(body["total_servers"], 2);
        assert_eq!(body["all_servers_down"], false);

        let (_, body) = call(router, get("/api/servers")).await;
        assert_eq!(body.as_array().map(Vec::len), Some(2));
        assert_eq!(body[0]["port"], 8081);
    }

    #[tokio::test]
    async fn test_switch_strategy() {
        let state = state("");
        let router = setup_admin_router(state.clone());

        let (status, body) = call(router.clone(), post("/api/strategy", serde_json::json!({"strategy": "alpha1"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["strategy"], "alpha1");

        let (status, _) = call(router.clone(), post("/api/strategy", serde_json::json!({"strategy": "nope"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let bad = serde_json::json!({
            "strategy": "beta1",
            "config": { "beta1": { "capacity_factor": 0.5 } }
        });
        let (status, body) = call(router.clone(), post("/api/strategy", bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("capacity_factor"));

        let (_, body) = call(router, get("/api/algorithm-metrics")).await;
        assert_eq!(body["strategy"], "alpha1");
        assert!(body["alpha1"]["beta"].is_number());
    }

    #[tokio::test]
    async fn test_toggle_server() {
        let state = state("");
        let router = setup_admin_router(state.clone());

        let (status, body) = call(
            router.clone(),
            post("/api/servers/toggle", serde_json::json!({"host": "127.0.0.1", "port": 8081})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enabled"], false);
        assert_eq!(state.balancer.status().healthy_servers, 1);

        let (status, _) = call(
            router,
            post("/api/servers/toggle", serde_json::json!({"host": "127.0.0.1", "port": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bearer_auth() {
        let router = setup_admin_router(state("secret"));

        let (status, _) = call(router.clone(), get("/api/performance")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = Request::get("/api/performance")
            .header(header::AUTHORIZATION, "Bearer secret")
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_requests"], 0);
    }
}
