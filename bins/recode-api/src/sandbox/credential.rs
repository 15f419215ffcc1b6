// Bearer tokens for the Azure management plane
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{SandboxError, SandboxResult};
use crate::config::CredentialConfig;

/// Refresh this long before the token actually expires
const REFRESH_MARGIN: Duration = Duration::from_secs(300);
const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Seconds, as a number (client credentials) or a string (some identity endpoints)
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
    /// Unix seconds, as returned by managed identity endpoints
    #[serde(default)]
    expires_on: Option<serde_json::Value>,
}

impl TokenResponse {
    fn lifetime(&self) -> Duration {
        if let Some(secs) = self.expires_in.as_ref().and_then(as_seconds) {
            return Duration::from_secs(secs);
        }
        if let Some(at) = self.expires_on.as_ref().and_then(as_seconds) {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            return Duration::from_secs(at.saturating_sub(now));
        }
        DEFAULT_LIFETIME
    }
}

fn as_seconds(value: &serde_json::Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

/// Fetches and caches a management-plane token
pub struct TokenProvider {
    http: Client,
    credential: CredentialConfig,
    resource: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    /// `resource` is the management endpoint the token is for
    pub fn new(http: Client, credential: CredentialConfig, resource: &str) -> Self {
        Self {
            http,
            credential,
            resource: resource.trim_end_matches('/').to_string(),
            cached: Mutex::new(None),
        }
    }

    pub async fn token(&self) -> SandboxResult<String> {
        let mut cached = self.cached.lock().await;

        if let Some(entry) = cached.as_ref() {
            if Instant::now() < entry.refresh_at {
                return Ok(entry.token.clone());
            }
            debug!("Management token due for refresh");
        }

        let fresh = self.fetch().await?;
        let lifetime = fresh.lifetime();
        info!(lifetime_secs = lifetime.as_secs(), "Acquired management token");

        let token = fresh.access_token;
        *cached = Some(CachedToken {
            token: token.clone(),
            refresh_at: Instant::now() + lifetime.saturating_sub(REFRESH_MARGIN),
        });
        Ok(token)
    }

    async fn fetch(&self) -> SandboxResult<TokenResponse> {
        let request = match &self.credential {
            CredentialConfig::ClientSecret {
                authority_host,
                tenant_id,
                client_id,
                client_secret,
            } => {
                let scope = format!("{}/.default", self.resource);
                self.http
                    .post(format!("{}/{}/oauth2/v2.0/token", authority_host, tenant_id))
                    .form(&[
                        ("grant_type", "client_credentials"),
                        ("client_id", client_id.as_str()),
                        ("client_secret", client_secret.as_str()),
                        ("scope", scope.as_str()),
                    ])
            }
            CredentialConfig::ManagedIdentity { endpoint, header } => {
                let resource = format!("{}/", self.resource);
                self.http
                    .get(endpoint)
                    .query(&[("api-version", "2019-08-01"), ("resource", resource.as_str())])
                    .header("X-IDENTITY-HEADER", header)
            }
        };

        let resp = request
            .send()
            .await
            .map_err(|e| SandboxError::Credential(format!("token request: {}", e.without_url())))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SandboxError::Credential(format!("token endpoint {}: {}", status, body)));
        }

        resp.json()
            .await
            .map_err(|e| SandboxError::Credential(format!("token decode: {}", e)))
    }
}
