//! Account admin endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::admin::{api_error, db_error, verify_api_key, AdminState, ApiError, ApiResponse, ApiResult};
use crate::constants::{MAX_ACCOUNT_NAME, MAX_PASSWORD_LENGTH};
use crate::crypto::srp6;
use crate::db::{self, AccountRecord, BanInfo};
use crate::session::{AccountLevel, SessionSummary};

async fn load_account(state: &AdminState, username: &str) -> Result<AccountRecord, ApiError> {
    db::find_account_by_username(&state.db, username)
        .await
        .map_err(db_error)?
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                format!("Account '{}' not found", username),
            )
        })
}

fn validate_username(username: &str) -> Result<(), ApiError> {
    if username.is_empty() || username.len() > MAX_ACCOUNT_NAME {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("Username must be 1-{} characters", MAX_ACCOUNT_NAME),
        ));
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Username may only contain letters and digits",
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.is_empty() || password.len() > MAX_PASSWORD_LENGTH || !password.is_ascii() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("Password must be 1-{} ASCII characters", MAX_PASSWORD_LENGTH),
        ));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct AccountSummary {
    pub id: i64,
    pub username: String,
    pub security: AccountLevel,
    pub locked: bool,
    pub failed_logins: u32,
    pub created_at: i64,
    pub last_login: Option<i64>,
}

impl From<AccountRecord> for AccountSummary {
    fn from(account: AccountRecord) -> Self {
        Self {
            id: account.id,
            username: account.username,
            security: account.security,
            locked: account.locked,
            failed_logins: account.failed_logins,
            created_at: account.created_at,
            last_login: account.last_login,
        }
    }
}

#[derive(Deserialize, Default)]
pub struct ListAccountsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub search: Option<String>,
}

/// GET /api/accounts - List accounts
pub async fn list_accounts(
    headers: HeaderMap,
    State(state): State<Arc<AdminState>>,
    Query(query): Query<ListAccountsQuery>,
) -> ApiResult<Vec<AccountSummary>> {
    verify_api_key(&headers, &state.api_key)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    let accounts = db::list_accounts(&state.db, query.search.as_deref(), limit, offset)
        .await
        .map_err(db_error)?
        .into_iter()
        .map(AccountSummary::from)
        .collect();

    Ok(Json(ApiResponse::success(accounts)))
}

#[derive(Debug, Serialize)]
pub struct AccountDetail {
    #[serde(flatten)]
    pub summary: AccountSummary,
    pub last_ip: Option<String>,
    pub os: Option<String>,
    pub expansion: u8,
    pub has_authenticator: bool,
    pub has_session_key: bool,
    pub active_ban: Option<BanInfo>,
    pub sessions: Vec<SessionSummary>,
}

/// GET /api/accounts/:username - Get account details
pub async fn get_account(
    headers: HeaderMap,
    Path(username): Path<String>,
    State(state): State<Arc<AdminState>>,
) -> ApiResult<AccountDetail> {
    verify_api_key(&headers, &state.api_key)?;

    let account = load_account(&state, &username).await?;
    let active_ban = db::find_active_ban(
        &state.db,
        account.id,
        account.last_ip.as_deref().unwrap_or(""),
        db::unix_now(),
    )
    .await
    .map_err(db_error)?;

    let sessions = state
        .registry
        .list()
        .into_iter()
        .filter(|s| {
            s.account
                .as_deref()
                .map_or(false, |name| name.eq_ignore_ascii_case(&account.username))
        })
        .collect();

    Ok(Json(ApiResponse::success(AccountDetail {
        last_ip: account.last_ip.clone(),
        os: account.os.clone(),
        expansion: account.expansion,
        has_authenticator: account.totp_secret.is_some(),
        has_session_key: account.session_key.is_some(),
        active_ban,
        sessions,
        summary: AccountSummary::from(account),
    })))
}

#[derive(Deserialize)]
pub struct CreateAccountRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub security: Option<AccountLevel>,
}

#[derive(Debug, Serialize)]
pub struct CreateAccountResponse {
    pub id: i64,
    pub username: String,
}

/// POST /api/accounts - Register a new account
pub async fn create_account(
    headers: HeaderMap,
    State(state): State<Arc<AdminState>>,
    Json(req): Json<CreateAccountRequest>,
) -> ApiResult<CreateAccountResponse> {
    verify_api_key(&headers, &state.api_key)?;

    validate_username(&req.username)?;
    validate_password(&req.password)?;

    let username = req.username.to_ascii_uppercase();
    if db::username_exists(&state.db, &username).await.map_err(db_error)? {
        return Err(api_error(
            StatusCode::CONFLICT,
            format!("Account '{}' already exists", username),
        ));
    }

    let (salt, verifier) = srp6::make_registration(&username, &req.password);
    let security = req.security.unwrap_or(AccountLevel::Player);
    let id = db::create_account(&state.db, &username, &salt, &verifier, security)
        .await
        .map_err(db_error)?;
    info!("Admin API created account {} ({})", username, security);

    Ok(Json(ApiResponse::success(CreateAccountResponse { id, username })))
}

#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    pub updated: bool,
}

#[derive(Deserialize)]
pub struct PasswordRequest {
    pub password: String,
}

/// POST /api/accounts/:username/password - Replace the password
pub async fn reset_password(
    headers: HeaderMap,
    Path(username): Path<String>,
    State(state): State<Arc<AdminState>>,
    Json(req): Json<PasswordRequest>,
) -> ApiResult<UpdateResponse> {
    verify_api_key(&headers, &state.api_key)?;
    validate_password(&req.password)?;

    let account = load_account(&state, &username).await?;
    let (salt, verifier) = srp6::make_registration(&account.username, &req.password);
    let updated = db::update_credentials(&state.db, account.id, &salt, &verifier)
        .await
        .map_err(db_error)?;
    info!("Admin API reset the password of {}", account.username);

    Ok(Json(ApiResponse::success(UpdateResponse { updated })))
}

#[derive(Deserialize)]
pub struct BanRequest {
    pub reason: String,
    /// None = permanent
    #[serde(default)]
    pub duration_secs: Option<i64>,
    #[serde(default)]
    pub banned_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BanResponse {
    pub ban_id: i64,
    pub expires_at: Option<i64>,
    pub sessions_kicked: usize,
}

/// POST /api/accounts/:username/ban - Ban an account and close its sessions
pub async fn ban_account(
    headers: HeaderMap,
    Path(username): Path<String>,
    State(state): State<Arc<AdminState>>,
    Json(req): Json<BanRequest>,
) -> ApiResult<BanResponse> {
    verify_api_key(&headers, &state.api_key)?;

    if req.reason.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Ban reason cannot be empty"));
    }
    if req.duration_secs.map_or(false, |d| d <= 0) {
        return Err(api_error(StatusCode::BAD_REQUEST, "Ban duration must be positive"));
    }

    let account = load_account(&state, &username).await?;
    let expires_at = req.duration_secs.map(|d| db::unix_now().saturating_add(d));
    let banned_by = req.banned_by.as_deref().unwrap_or("admin_api");
    let ban_id = db::ban_account(&state.db, account.id, expires_at, banned_by, &req.reason)
        .await
        .map_err(db_error)?;

    let sessions_kicked = state.registry.kick_account(&account.username);
    info!(
        "Admin API banned {} ({}), {} sessions kicked",
        account.username, req.reason, sessions_kicked
    );

    Ok(Json(ApiResponse::success(BanResponse {
        ban_id,
        expires_at,
        sessions_kicked,
    })))
}

#[derive(Debug, Serialize)]
pub struct UnbanResponse {
    pub lifted: u64,
}

/// POST /api/accounts/:username/unban - Lift every ban on an account
pub async fn unban_account(
    headers: HeaderMap,
    Path(username): Path<String>,
    State(state): State<Arc<AdminState>>,
) -> ApiResult<UnbanResponse> {
    verify_api_key(&headers, &state.api_key)?;

    let account = load_account(&state, &username).await?;
    let lifted = db::unban_account(&state.db, account.id)
        .await
        .map_err(db_error)?;

    Ok(Json(ApiResponse::success(UnbanResponse { lifted })))
}

#[derive(Deserialize)]
pub struct LockRequest {
    pub locked: bool,
}

/// POST /api/accounts/:username/lock - Restrict logins to the last address
pub async fn set_lock(
    headers: HeaderMap,
    Path(username): Path<String>,
    State(state): State<Arc<AdminState>>,
    Json(req): Json<LockRequest>,
) -> ApiResult<UpdateResponse> {
    verify_api_key(&headers, &state.api_key)?;

    let account = load_account(&state, &username).await?;
    let updated = db::set_locked(&state.db, account.id, req.locked)
        .await
        .map_err(db_error)?;

    Ok(Json(ApiResponse::success(UpdateResponse { updated })))
}

#[derive(Deserialize)]
pub struct SecurityRequest {
    pub level: String,
}

/// POST /api/accounts/:username/security - Change the security level
pub async fn set_security(
    headers: HeaderMap,
    Path(username): Path<String>,
    State(state): State<Arc<AdminState>>,
    Json(req): Json<SecurityRequest>,
) -> ApiResult<UpdateResponse> {
    verify_api_key(&headers, &state.api_key)?;

    let level = AccountLevel::from_name(&req.level).ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("Unknown security level '{}'", req.level),
        )
    })?;

    let account = load_account(&state, &username).await?;
    let updated = db::set_security(&state.db, account.id, level)
        .await
        .map_err(db_error)?;
    info!("Admin API set {} to {}", account.username, level);

    Ok(Json(ApiResponse::success(UpdateResponse { updated })))
}

#[derive(Deserialize)]
pub struct TotpRequest {
    /// Hex-encoded shared secret; absent or empty clears the authenticator.
    #[serde(default)]
    pub secret: Option<String>,
}

/// POST /api/accounts/:username/totp - Set or clear the authenticator secret
pub async fn set_totp(
    headers: HeaderMap,
    Path(username): Path<String>,
    State(state): State<Arc<AdminState>>,
    Json(req): Json<TotpRequest>,
) -> ApiResult<UpdateResponse> {
    verify_api_key(&headers, &state.api_key)?;

    let secret = match req.secret.as_deref().filter(|s| !s.is_empty()) {
        Some(hex_secret) => Some(hex::decode(hex_secret).map_err(|e| {
            api_error(StatusCode::BAD_REQUEST, format!("Invalid hex secret: {}", e))
        })?),
        None => None,
    };

    let account = load_account(&state, &username).await?;
    let updated = db::set_totp_secret(&state.db, account.id, secret.as_deref())
        .await
        .map_err(db_error)?;

    Ok(Json(ApiResponse::success(UpdateResponse { updated })))
}

#[derive(Debug, Serialize)]
pub struct KickAccountResponse {
    pub sessions_kicked: usize,
}

/// POST /api/accounts/:username/kick - Close every session of an account
pub async fn kick_account(
    headers: HeaderMap,
    Path(username): Path<String>,
    State(state): State<Arc<AdminState>>,
) -> ApiResult<KickAccountResponse> {
    verify_api_key(&headers, &state.api_key)?;

    let sessions_kicked = state.registry.kick_account(&username);

    Ok(Json(ApiResponse::success(KickAccountResponse { sessions_kicked })))
}
