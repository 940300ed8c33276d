//! HTTP API
//!
//! Health probes are public. Everything else sits behind an optional
//! bearer token.

use crate::error::ApiError;
use crate::escalation::Alert;
use crate::health::{HealthResponse, LivenessResponse, ReadinessResponse};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self as axum_middleware, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use timebox_common::{Registration, ResourceStatus, ScheduleRequest, TickReport};
use tower_http::trace::TraceLayer;

pub fn router(state: Arc<AppState>) -> Router {
    let protected_routes = Router::new()
        .merge(resource_routes())
        .merge(tick_routes())
        .merge(alert_routes())
        .with_state(state.clone())
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_token,
        ));

    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/health/detailed", get(health_detailed))
        .route("/api/health/live", get(liveness_probe))
        .route("/api/health/ready", get(readiness_probe))
        .with_state(state)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
}

fn resource_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/resources", get(list_resources).post(register_resource))
        .route(
            "/api/resources/:id",
            get(get_resource).delete(deregister_resource),
        )
}

fn tick_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tick", post(trigger_tick))
        .route("/api/tick/last", get(last_tick))
}

fn alert_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/alerts", get(list_alerts))
        .route("/api/alerts/history", get(alert_history))
}

/// Reject requests without the configured bearer token
async fn require_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.api_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();

    if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(path = %request.uri().path(), "Rejected request with missing or invalid token");
        Err(ApiError::AuthenticationFailed)
    }
}

async fn health_check() -> &'static str {
    "OK"
}

async fn health_detailed(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let checker = &state.health;
    let controller = &state.controller;

    let last_tick = controller.last_tick().await;
    let escalation = controller.escalation();
    let active = escalation.active_alerts().await.len();
    let critical = escalation.critical_count().await;

    let components = vec![
        checker.check_store(controller.store().as_ref()).await,
        checker.check_trigger_loop(
            last_tick.as_ref(),
            controller.now(),
            controller.settings().tick_interval(),
        ),
        checker.check_alerts(active, critical),
    ];

    Json(checker.build_response(components))
}

async fn liveness_probe(State(state): State<Arc<AppState>>) -> Json<LivenessResponse> {
    Json(state.health.liveness())
}

async fn readiness_probe(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReadinessResponse>, StatusCode> {
    let components = vec![
        state
            .health
            .check_store(state.controller.store().as_ref())
            .await,
    ];
    let response = state.health.readiness(&components);

    if response.ready {
        Ok(Json(response))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    pending: bool,
}

async fn list_resources(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ResourceStatus>>, ApiError> {
    Ok(Json(state.controller.list(query.pending).await?))
}

async fn register_resource(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ScheduleRequest>,
) -> Result<(StatusCode, Json<Registration>), ApiError> {
    let registration = state.controller.register(request).await?;
    let status = if registration.registered {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(registration)))
}

async fn get_resource(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ResourceStatus>, ApiError> {
    Ok(Json(state.controller.status(&id).await?))
}

async fn deregister_resource(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.controller.deregister(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Entry point for an external cron-style scheduler.
///
/// The tick runs in its own task: a caller that hangs up must not cancel
/// destroy calls the tick has already issued.
async fn trigger_tick(State(state): State<Arc<AppState>>) -> Result<Json<TickReport>, ApiError> {
    let controller = state.controller.clone();
    let report = tokio::spawn(async move { controller.tick().await })
        .await
        .map_err(|e| ApiError::Internal(format!("Tick task failed: {}", e)))?;

    report
        .map(Json)
        .ok_or_else(|| ApiError::Conflict("A tick is already in progress".to_string()))
}

async fn last_tick(State(state): State<Arc<AppState>>) -> Json<Option<TickReport>> {
    Json(state.controller.last_tick().await)
}

async fn list_alerts(State(state): State<Arc<AppState>>) -> Json<Vec<Alert>> {
    Json(state.controller.escalation().active_alerts().await)
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn alert_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<Alert>> {
    Json(state.controller.escalation().history(query.limit).await)
}
