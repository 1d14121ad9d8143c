use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::delivery_engine::DeliveryEngine;
use crate::error::AdminError;
use crate::status_store::StatusStore;

/// Shared state for the admin HTTP surface. Out of scope for the delivery
/// pipeline itself (spec treats it as an external collaborator), wired up
/// the way the teacher's own health/routes layer is.
#[derive(Clone)]
pub struct AdminState {
    pub status_store: Arc<StatusStore>,
    pub engine: Arc<DeliveryEngine>,
    pub service: &'static str,
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/status/:notification_id", get(status))
        .route("/circuits", get(circuits))
        .with_state(state)
}

#[derive(Serialize)]
struct RootResponse {
    service: &'static str,
    version: &'static str,
}

async fn root(State(state): State<AdminState>) -> impl IntoResponse {
    Json(RootResponse {
        service: state.service,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    status_store_reachable: bool,
}

async fn health(State(state): State<AdminState>) -> impl IntoResponse {
    let store_ok = state.status_store.health().await;
    Json(HealthResponse {
        status: if store_ok { "healthy" } else { "degraded" },
        service: state.service,
        status_store_reachable: store_ok,
    })
}

async fn status(
    State(state): State<AdminState>,
    Path(notification_id): Path<String>,
) -> Result<impl IntoResponse, AdminError> {
    let record = state
        .status_store
        .get_status(&notification_id)
        .await
        .map_err(|e| AdminError::StoreUnavailable(e.to_string()))?
        .ok_or(AdminError::NotFound(notification_id))?;

    Ok(Json(record))
}

#[derive(Serialize)]
struct CircuitsResponse {
    template_service: crate::circuit_breaker::CircuitSnapshot,
    provider: crate::circuit_breaker::CircuitSnapshot,
}

async fn circuits(State(state): State<AdminState>) -> impl IntoResponse {
    Json(CircuitsResponse {
        template_service: state.engine.template_breaker().snapshot(),
        provider: state.engine.provider_breaker().snapshot(),
    })
}
