//! Server-wide admin endpoints

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};
use chrono::Utc;
use serde::Serialize;

use crate::admin::{db_error, verify_api_key, AdminState, ApiResponse, ApiResult};
use crate::db;
use crate::session::Protocol;

#[derive(Debug, Serialize)]
pub struct ServerStats {
    pub version: &'static str,
    pub uptime_secs: i64,
    pub total_connections: usize,
    pub logon_authenticated: usize,
    pub world_authenticated: usize,
    pub accounts: i64,
    pub active_bans: usize,
}

/// GET /api/server/stats - Get server statistics
pub async fn get_stats(
    headers: HeaderMap,
    State(state): State<Arc<AdminState>>,
) -> ApiResult<ServerStats> {
    verify_api_key(&headers, &state.api_key)?;

    let accounts = db::count_accounts(&state.db).await.map_err(db_error)?;
    let active_bans = db::list_active_bans(&state.db, db::unix_now())
        .await
        .map_err(db_error)?
        .len();

    let stats = ServerStats {
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        total_connections: state.registry.connection_count(),
        logon_authenticated: state.registry.authenticated_count(Protocol::Logon),
        world_authenticated: state.registry.authenticated_count(Protocol::World),
        accounts,
        active_bans,
    };

    Ok(Json(ApiResponse::success(stats)))
}
