//! HTTP client for the admin API

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Admin API client
pub struct AdminClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

/// Standard API response wrapper
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn into_result(self) -> Result<T> {
        if self.success {
            self.data
                .ok_or_else(|| anyhow::anyhow!("No data in response"))
        } else {
            Err(anyhow::anyhow!(self
                .error
                .unwrap_or_else(|| "Unknown error".to_string())))
        }
    }
}

// Response types
#[derive(Debug, Deserialize, Serialize)]
pub struct ServerStats {
    pub version: String,
    pub uptime_secs: i64,
    pub total_connections: usize,
    pub logon_authenticated: usize,
    pub world_authenticated: usize,
    pub accounts: i64,
    pub active_bans: usize,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub protocol: String,
    pub peer: String,
    pub account: Option<String>,
    pub state: String,
    pub connected_at: String,
    pub messages: u64,
    pub latency_ms: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct KickResponse {
    pub kicked: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct KickAccountResponse {
    pub sessions_kicked: usize,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AccountSummary {
    pub id: i64,
    pub username: String,
    pub security: String,
    pub locked: bool,
    pub failed_logins: u32,
    pub created_at: i64,
    pub last_login: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AccountDetail {
    #[serde(flatten)]
    pub summary: AccountSummary,
    pub last_ip: Option<String>,
    pub os: Option<String>,
    pub expansion: u8,
    pub has_authenticator: bool,
    pub has_session_key: bool,
    pub active_ban: Option<BanRecord>,
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateAccountResponse {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateResponse {
    pub updated: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BanResponse {
    pub ban_id: i64,
    pub expires_at: Option<i64>,
    pub sessions_kicked: usize,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UnbanResponse {
    pub lifted: u64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BanRecord {
    pub id: i64,
    pub account_id: Option<i64>,
    pub ip: Option<String>,
    pub banned_at: i64,
    pub expires_at: Option<i64>,
    pub banned_by: String,
    pub reason: String,
    pub active: bool,
}

impl BanRecord {
    /// "account 12" or "ip 10.0.0.1"
    pub fn target(&self) -> String {
        match (&self.ip, self.account_id) {
            (Some(ip), _) => format!("ip {}", ip),
            (None, Some(id)) => format!("account {}", id),
            (None, None) => "?".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateBanResponse {
    pub id: i64,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DeleteBanResponse {
    pub lifted: u64,
}

impl AdminClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response.text().await.context("Failed to read response")?;

        if !status.is_success() {
            // Try to parse as API error
            if let Ok(api_resp) = serde_json::from_str::<ApiResponse<()>>(&body) {
                return Err(anyhow::anyhow!(api_resp
                    .error
                    .unwrap_or_else(|| format!("HTTP {}", status))));
            }
            return Err(anyhow::anyhow!("HTTP {}: {}", status, body));
        }

        let api_response: ApiResponse<T> =
            serde_json::from_str(&body).context("Failed to parse response")?;
        api_response.into_result()
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        self.send(self.client.get(&url)).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        self.send(self.client.post(&url).json(body)).await
    }

    async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        self.send(self.client.delete(&url)).await
    }

    // Server endpoints
    pub async fn get_stats(&self) -> Result<ServerStats> {
        self.get("/api/server/stats").await
    }

    // Session endpoints
    pub async fn list_sessions(
        &self,
        protocol: Option<&str>,
        account: Option<&str>,
    ) -> Result<Vec<SessionSummary>> {
        let mut params = vec![];
        if let Some(protocol) = protocol {
            params.push(format!("protocol={}", protocol));
        }
        if let Some(account) = account {
            params.push(format!("account={}", account));
        }
        let mut path = "/api/sessions".to_string();
        if !params.is_empty() {
            path = format!("{}?{}", path, params.join("&"));
        }
        self.get(&path).await
    }

    pub async fn kick_session(&self, id: &str) -> Result<KickResponse> {
        self.post(&format!("/api/sessions/{}/kick", id), &serde_json::json!({}))
            .await
    }

    // Account endpoints
    pub async fn list_accounts(
        &self,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AccountSummary>> {
        let mut path = format!("/api/accounts?limit={}&offset={}", limit, offset);
        if let Some(search) = search {
            path = format!("{}&search={}", path, search);
        }
        self.get(&path).await
    }

    pub async fn get_account(&self, username: &str) -> Result<AccountDetail> {
        self.get(&format!("/api/accounts/{}", username)).await
    }

    pub async fn create_account(
        &self,
        username: &str,
        password: &str,
        security: Option<&str>,
    ) -> Result<CreateAccountResponse> {
        #[derive(Serialize)]
        struct CreateReq<'a> {
            username: &'a str,
            password: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            security: Option<&'a str>,
        }
        self.post(
            "/api/accounts",
            &CreateReq {
                username,
                password,
                security,
            },
        )
        .await
    }

    pub async fn reset_password(&self, username: &str, password: &str) -> Result<UpdateResponse> {
        #[derive(Serialize)]
        struct PasswordReq<'a> {
            password: &'a str,
        }
        self.post(
            &format!("/api/accounts/{}/password", username),
            &PasswordReq { password },
        )
        .await
    }

    pub async fn ban_account(
        &self,
        username: &str,
        reason: &str,
        duration_secs: Option<i64>,
    ) -> Result<BanResponse> {
        #[derive(Serialize)]
        struct BanReq<'a> {
            reason: &'a str,
            duration_secs: Option<i64>,
        }
        self.post(
            &format!("/api/accounts/{}/ban", username),
            &BanReq {
                reason,
                duration_secs,
            },
        )
        .await
    }

    pub async fn unban_account(&self, username: &str) -> Result<UnbanResponse> {
        self.post(&format!("/api/accounts/{}/unban", username), &serde_json::json!({}))
            .await
    }

    pub async fn set_lock(&self, username: &str, locked: bool) -> Result<UpdateResponse> {
        self.post(
            &format!("/api/accounts/{}/lock", username),
            &serde_json::json!({ "locked": locked }),
        )
        .await
    }

    pub async fn set_security(&self, username: &str, level: &str) -> Result<UpdateResponse> {
        self.post(
            &format!("/api/accounts/{}/security", username),
            &serde_json::json!({ "level": level }),
        )
        .await
    }

    pub async fn set_totp(&self, username: &str, secret: Option<&str>) -> Result<UpdateResponse> {
        self.post(
            &format!("/api/accounts/{}/totp", username),
            &serde_json::json!({ "secret": secret }),
        )
        .await
    }

    pub async fn kick_account(&self, username: &str) -> Result<KickAccountResponse> {
        self.post(&format!("/api/accounts/{}/kick", username), &serde_json::json!({}))
            .await
    }

    // Ban endpoints
    pub async fn list_bans(&self) -> Result<Vec<BanRecord>> {
        self.get("/api/bans").await
    }

    pub async fn ban_ip(
        &self,
        ip: &str,
        reason: &str,
        duration_secs: Option<i64>,
    ) -> Result<CreateBanResponse> {
        #[derive(Serialize)]
        struct IpBanReq<'a> {
            ip: &'a str,
            reason: &'a str,
            duration_secs: Option<i64>,
        }
        self.post(
            "/api/bans",
            &IpBanReq {
                ip,
                reason,
                duration_secs,
            },
        )
        .await
    }

    pub async fn unban_ip(&self, ip: &str) -> Result<DeleteBanResponse> {
        self.delete(&format!("/api/bans/ip/{}", ip)).await
    }
}
