use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::config::StrategyConfig;
use crate::engine::{EngineError, PerformanceReport, StatusView};
use crate::pool::{PoolError, ServerId, ServerSnapshot};
use crate::strategy::{MetricsSnapshot, StrategyKind};

#[derive(Debug, Deserialize)]
pub struct StrategyRequest {
    pub strategy: String,
    /// Parameters for the new strategy; the current ones when absent.
    #[serde(default)]
    pub config: Option<StrategyConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StrategyResponse {
    pub strategy: StrategyKind,
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleResponse {
    pub server: String,
    pub enabled: bool,
}

/// Engine errors as JSON responses.
#[derive(Debug)]
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::UnknownStrategy(_) | EngineError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            EngineError::Pool(PoolError::UnknownServer(_)) => StatusCode::NOT_FOUND,
            EngineError::Pool(PoolError::DuplicateServer(_)) => StatusCode::CONFLICT,
            EngineError::NoServerAvailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<StatusView> {
    Json(state.balancer.status())
}

pub async fn get_servers(State(state): State<AdminState>) -> Json<Vec<ServerSnapshot>> {
    Json(state.balancer.pool().snapshot())
}

pub async fn get_performance(State(state): State<AdminState>) -> Json<PerformanceReport> {
    Json(state.balancer.performance())
}

pub async fn get_algorithm_metrics(State(state): State<AdminState>) -> Json<MetricsSnapshot> {
    Json(state.balancer.metrics())
}

pub async fn post_strategy(
    State(state): State<AdminState>,
    Json(request): Json<StrategyRequest>,
) -> Result<Json<StrategyResponse>, ApiError> {
    let strategy = state
        .balancer
        .switch_strategy_named(&request.strategy, request.config)?;
    Ok(Json(StrategyResponse { strategy }))
}

pub async fn post_toggle(
    State(state): State<AdminState>,
    Json(request): Json<ToggleRequest>,
) -> Result<Json<ToggleResponse>, ApiError> {
    let id = ServerId::new(request.host, request.port);
    let enabled = state.balancer.toggle_server(&id)?;
    Ok(Json(ToggleResponse {
        server: id.to_string(),
        enabled,
    }))
}
