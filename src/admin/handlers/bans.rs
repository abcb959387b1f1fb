//! Ban management admin endpoints

use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::admin::{api_error, db_error, verify_api_key, AdminState, ApiResponse, ApiResult};
use crate::db::{self, BanInfo};

/// GET /api/bans - List bans currently in force
pub async fn list_bans(
    headers: HeaderMap,
    State(state): State<Arc<AdminState>>,
) -> ApiResult<Vec<BanInfo>> {
    verify_api_key(&headers, &state.api_key)?;

    let bans = db::list_active_bans(&state.db, db::unix_now())
        .await
        .map_err(db_error)?;

    Ok(Json(ApiResponse::success(bans)))
}

#[derive(Deserialize)]
pub struct CreateIpBanRequest {
    pub ip: String,
    pub reason: String,
    /// None = permanent
    #[serde(default)]
    pub duration_secs: Option<i64>,
    #[serde(default)]
    pub banned_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateBanResponse {
    pub id: i64,
    pub expires_at: Option<i64>,
}

/// POST /api/bans - Ban an address
pub async fn create_ip_ban(
    headers: HeaderMap,
    State(state): State<Arc<AdminState>>,
    Json(req): Json<CreateIpBanRequest>,
) -> ApiResult<CreateBanResponse> {
    verify_api_key(&headers, &state.api_key)?;

    let ip: IpAddr = req
        .ip
        .parse()
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, format!("Invalid address '{}'", req.ip)))?;
    if req.reason.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Ban reason cannot be empty"));
    }
    if req.duration_secs.map_or(false, |d| d <= 0) {
        return Err(api_error(StatusCode::BAD_REQUEST, "Ban duration must be positive"));
    }

    let expires_at = req.duration_secs.map(|d| db::unix_now().saturating_add(d));
    let banned_by = req.banned_by.as_deref().unwrap_or("admin_api");
    let id = db::ban_ip(&state.db, &ip.to_string(), expires_at, banned_by, &req.reason)
        .await
        .map_err(db_error)?;
    info!("Admin API banned address {} ({})", ip, req.reason);

    Ok(Json(ApiResponse::success(CreateBanResponse { id, expires_at })))
}

#[derive(Debug, Serialize)]
pub struct DeleteBanResponse {
    pub lifted: u64,
}

/// DELETE /api/bans/ip/:ip - Lift the bans on an address
pub async fn delete_ip_ban(
    headers: HeaderMap,
    Path(ip): Path<String>,
    State(state): State<Arc<AdminState>>,
) -> ApiResult<DeleteBanResponse> {
    verify_api_key(&headers, &state.api_key)?;

    let lifted = db::unban_ip(&state.db, &ip).await.map_err(db_error)?;

    Ok(Json(ApiResponse::success(DeleteBanResponse { lifted })))
}
