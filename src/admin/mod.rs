//! Admin HTTP API for remote server management
//!
//! REST endpoints for the admin CLI: live sessions, accounts and bans.

use std::sync::Arc;

use axum::{
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::crypto::ct_eq;
use crate::db::{DbPool, StoreError};
use crate::session::SessionRegistry;

mod handlers;

/// Shared state for admin API handlers
pub struct AdminState {
    pub db: DbPool,
    pub api_key: String,
    /// Live sessions of both listeners
    pub registry: Arc<SessionRegistry>,
    pub started_at: DateTime<Utc>,
}

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

pub type ApiError = (StatusCode, Json<ApiResponse<()>>);
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ApiResponse::<()>::error(message)))
}

fn db_error(e: StoreError) -> ApiError {
    error!("Admin API database error: {}", e);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Database error: {}", e))
}

/// Verify the API key from request headers
fn verify_api_key(headers: &HeaderMap, expected_key: &str) -> Result<(), ApiError> {
    if expected_key.is_empty() {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Admin API key is not configured",
        ));
    }

    let provided_key = headers
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        });

    match provided_key {
        Some(key) if ct_eq(key.as_bytes(), expected_key.as_bytes()) => Ok(()),
        Some(_) => Err(api_error(StatusCode::UNAUTHORIZED, "Invalid API key")),
        None => Err(api_error(
            StatusCode::UNAUTHORIZED,
            "Missing API key. Use X-API-Key header or Authorization: Bearer <key>",
        )),
    }
}

/// Create the admin API router
pub fn create_router(state: Arc<AdminState>) -> Router {
    Router::new()
        // Server endpoints
        .route("/api/server/stats", get(handlers::server::get_stats))
        // Live sessions
        .route("/api/sessions", get(handlers::sessions::list_sessions))
        .route("/api/sessions/:id/kick", post(handlers::sessions::kick_session))
        // Account endpoints
        .route(
            "/api/accounts",
            get(handlers::accounts::list_accounts).post(handlers::accounts::create_account),
        )
        .route("/api/accounts/:username", get(handlers::accounts::get_account))
        .route("/api/accounts/:username/password", post(handlers::accounts::reset_password))
        .route("/api/accounts/:username/ban", post(handlers::accounts::ban_account))
        .route("/api/accounts/:username/unban", post(handlers::accounts::unban_account))
        .route("/api/accounts/:username/lock", post(handlers::accounts::set_lock))
        .route("/api/accounts/:username/security", post(handlers::accounts::set_security))
        .route("/api/accounts/:username/totp", post(handlers::accounts::set_totp))
        .route("/api/accounts/:username/kick", post(handlers::accounts::kick_account))
        // Ban management
        .route(
            "/api/bans",
            get(handlers::bans::list_bans).post(handlers::bans::create_ip_ban),
        )
        .route("/api/bans/ip/:ip", axum::routing::delete(handlers::bans::delete_ip_ban))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the admin API server
pub async fn start_server(host: &str, port: u16, state: Arc<AdminState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Admin API listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::http::HeaderValue;

    use super::*;
    use crate::db::test_pool;

    pub const KEY: &str = "test-key";

    pub async fn state() -> Arc<AdminState> {
        Arc::new(AdminState {
            db: test_pool::pool().await,
            api_key: KEY.to_string(),
            registry: Arc::new(SessionRegistry::new()),
            started_at: Utc::now(),
        })
    }

    pub fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("X-API-Key", HeaderValue::from_static(KEY));
        headers
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_api_key_header_forms() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            verify_api_key(&headers, "k").unwrap_err().0,
            StatusCode::UNAUTHORIZED
        );

        headers.insert("Authorization", HeaderValue::from_static("Bearer k"));
        assert!(verify_api_key(&headers, "k").is_ok());

        headers.insert("X-API-Key", HeaderValue::from_static("wrong"));
        assert_eq!(
            verify_api_key(&headers, "k").unwrap_err().0,
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_response_omits_empty_fields() {
        let ok = serde_json::to_value(ApiResponse::success(7)).unwrap();
        assert_eq!(ok, serde_json::json!({ "success": true, "data": 7 }));

        let err = serde_json::to_value(ApiResponse::<()>::error("nope")).unwrap();
        assert_eq!(err, serde_json::json!({ "success": false, "error": "nope" }));
    }

    #[test]
    fn test_empty_configured_key_rejects_everything() {
        let mut headers = HeaderMap::new();
        headers.insert("X-API-Key", HeaderValue::from_static(""));

        assert_eq!(
            verify_api_key(&headers, "").unwrap_err().0,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
