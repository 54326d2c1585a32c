//! API Handlers
//!
//! HTTP request handlers for each admin endpoint. Every handler goes through
//! the shared [`CacheEngine`], so HTTP traffic sees the same tiers, counters
//! and stampede guard as in-process callers.

use std::time::Duration;

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::debug;

use crate::cache::{CacheEngine, StatisticsReport, TierScope};
use crate::error::{CacheError, Result};
use crate::models::{
    ClearRequest, ClearResponse, DeleteResponse, GetResponse, HealthResponse, SetRequest,
    SetResponse,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: CacheEngine,
}

impl AppState {
    pub fn new(engine: CacheEngine) -> Self {
        Self { engine }
    }
}

/// Handler for PUT /set
///
/// Stores a JSON value with an optional TTL in seconds.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let ttl = req
        .ttl
        .map(Duration::from_secs)
        .unwrap_or_else(|| state.engine.policy().ttl_for(&req.key));
    let scope = req.scope();

    state.engine.set(&req.key, req.value, Some(ttl), scope).await;

    Ok(Json(SetResponse::new(req.key, ttl.as_secs())))
}

/// Handler for GET /get/:key
///
/// Looks the key up in both tiers; a miss is a 404.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    match state.engine.get(&key, TierScope::All).await {
        Some(value) => Ok(Json(GetResponse::new(key, value))),
        None => Err(CacheError::NotFound(key)),
    }
}

/// Handler for DELETE /del/:key
///
/// Succeeds whether or not the key existed.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Json<DeleteResponse> {
    state.engine.delete(&key).await;
    Json(DeleteResponse::new(key))
}

/// Handler for POST /clear
///
/// The body is optional; `{"pattern": "authz:*"}` limits the remote flush.
pub async fn clear_handler(
    State(state): State<AppState>,
    body: Option<Json<ClearRequest>>,
) -> Json<ClearResponse> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    debug!(pattern = ?req.pattern, "clear requested");
    state.engine.clear(req.pattern.as_deref()).await;
    Json(ClearResponse::new(req.pattern))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatisticsReport> {
    Json(state.engine.statistics())
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::healthy(state.engine.remote_available()))
}
