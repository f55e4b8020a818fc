//! HTTP API — route registration and handlers
//!
//! Thin axum surface over [`TicketEngine`]; all lifecycle decisions live
//! in the engine. Ingestion posts candidate batches to `/api/tickets/
//! reconcile`; agent UIs poll `/api/tickets/distribute` for their queue.

use crate::engine::{EngineError, TicketEngine};
use crate::persistent::{SledStore, StoreStats};
use crate::reconcile::ReconcileOutcome;
use crate::store::{ClosedTicketLog, TicketStore};
use crate::types::{CandidateTicket, ClosedEntry, Ticket};
use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state for all handlers.
pub struct AppState {
    pub engine: TicketEngine,
    pub store: SledStore,
}

/// Build the complete API router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let ticket_routes = Router::new()
        .route("/tickets/reconcile", axum::routing::post(reconcile))
        .route("/tickets/distribute", axum::routing::post(distribute))
        .route("/tickets", axum::routing::get(list_tickets))
        .route("/tickets/closed", axum::routing::get(list_closed))
        .route("/health", axum::routing::get(get_health));

    Router::new()
        .nest("/api", ticket_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn map_engine_error(err: EngineError) -> ApiError {
    let status = match &err {
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
        EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

fn map_store_error(err: crate::store::StoreError) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    pub tickets: Vec<CandidateTicket>,
}

/// POST /api/tickets/reconcile — merge a candidate batch into the store.
pub async fn reconcile(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReconcileRequest>,
) -> Result<Json<ReconcileOutcome>, ApiError> {
    let outcome = state
        .engine
        .reconcile(&req.tickets)
        .map_err(map_engine_error)?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct DistributeRequest {
    pub agent: String,
}

/// POST /api/tickets/distribute — run one scheduling pass and return the
/// requesting agent's prioritized queue.
pub async fn distribute(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DistributeRequest>,
) -> Result<Json<Vec<Ticket>>, ApiError> {
    let queue = state
        .engine
        .distribute(&req.agent)
        .map_err(map_engine_error)?;
    Ok(Json(queue))
}

/// GET /api/tickets — every ticket in the active store.
pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Ticket>>, ApiError> {
    let tickets = state.store.list_active().map_err(map_store_error)?;
    Ok(Json(tickets))
}

/// GET /api/tickets/closed — recent closed-log entries, newest first.
pub async fn list_closed(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ClosedEntry>>, ApiError> {
    let entries = state.store.recent(100).map_err(map_store_error)?;
    Ok(Json(entries))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub backend: &'static str,
    pub stats: StoreStats,
}

/// GET /api/health — liveness plus store statistics.
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        backend: state.store.backend_name(),
        stats: state.store.stats(),
    })
}
