//! Live session endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::admin::{api_error, verify_api_key, AdminState, ApiResponse, ApiResult};
use crate::session::SessionSummary;

#[derive(Deserialize, Default)]
pub struct ListSessionsQuery {
    /// "logon" or "world"
    pub protocol: Option<String>,
    pub account: Option<String>,
}

/// GET /api/sessions - List live sessions
pub async fn list_sessions(
    headers: HeaderMap,
    State(state): State<Arc<AdminState>>,
    Query(query): Query<ListSessionsQuery>,
) -> ApiResult<Vec<SessionSummary>> {
    verify_api_key(&headers, &state.api_key)?;

    let sessions = state
        .registry
        .list()
        .into_iter()
        .filter(|s| query.protocol.as_deref().map_or(true, |p| s.protocol == p))
        .filter(|s| match (&query.account, &s.account) {
            (Some(wanted), Some(account)) => account.eq_ignore_ascii_case(wanted),
            (Some(_), None) => false,
            (None, _) => true,
        })
        .collect();

    Ok(Json(ApiResponse::success(sessions)))
}

#[derive(Debug, Serialize)]
pub struct KickResponse {
    pub kicked: bool,
}

/// POST /api/sessions/:id/kick - Close one session
pub async fn kick_session(
    headers: HeaderMap,
    Path(id): Path<String>,
    State(state): State<Arc<AdminState>>,
) -> ApiResult<KickResponse> {
    verify_api_key(&headers, &state.api_key)?;

    let id = Uuid::parse_str(&id)
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, format!("Invalid session id '{}'", id)))?;

    if !state.registry.kick(&id) {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Session {} not found", id),
        ));
    }
    info!("Admin API kicked session {}", id);

    Ok(Json(ApiResponse::success(KickResponse { kicked: true })))
}
