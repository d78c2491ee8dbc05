use crate::config::ManagementConfig;
use crate::error::{server_message, RegoloError, Result};
use crate::store::JsonFile;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const BEARER_PREFIX: &str = "Bearer ";

/// Formats a token as an `Authorization` header value. Values that already
/// carry the scheme are passed through untouched.
pub fn bearer(token: &str) -> String {
    if token.starts_with(BEARER_PREFIX) {
        token.to_string()
    } else {
        format!("{BEARER_PREFIX}{token}")
    }
}

/// The persisted access/refresh token pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Owns the process's management-API credentials and their on-disk record.
///
/// Cloning is cheap; clones share the same in-memory state.
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    file: JsonFile,
    base_url: String,
    http: reqwest::Client,
    current: RwLock<Credentials>,
    issued_at: RwLock<Option<DateTime<Utc>>>,
    refresh_gate: Mutex<()>,
}

impl CredentialStore {
    /// Opens the store described by `config`, loading any persisted record.
    pub async fn load(config: &ManagementConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Self::load_with(
            JsonFile::private(&config.credentials_path),
            &config.base_url,
            http,
        )
        .await
    }

    pub async fn load_with(file: JsonFile, base_url: &str, http: reqwest::Client) -> Result<Self> {
        let current = file.read::<Credentials>().await?.unwrap_or_default();
        debug!(
            path = %file.path().display(),
            authenticated = current.access_token.is_some(),
            "loaded credential record"
        );
        Ok(Self {
            inner: Arc::new(StoreInner {
                file,
                base_url: base_url.trim_end_matches('/').to_string(),
                http,
                current: RwLock::new(current),
                issued_at: RwLock::new(None),
                refresh_gate: Mutex::new(()),
            }),
        })
    }

    pub fn credentials(&self) -> Credentials {
        self.inner.current.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.current.read().access_token.clone()
    }

    pub fn has_refresh_token(&self) -> bool {
        self.inner.current.read().refresh_token.is_some()
    }

    /// When the current access token was obtained by this process, if it was.
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        *self.inner.issued_at.read()
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Persists `credentials` and makes them current. Memory is only updated
    /// once the record is safely on disk.
    pub async fn save(&self, credentials: Credentials) -> Result<()> {
        self.inner.file.write(&credentials).await?;
        let issued = credentials.access_token.is_some().then(Utc::now);
        *self.inner.current.write() = credentials;
        *self.inner.issued_at.write() = issued;
        Ok(())
    }

    /// Deletes the record and forgets all tokens. Clearing an empty store is fine.
    pub async fn clear(&self) -> Result<()> {
        let removed = self.inner.file.remove().await?;
        *self.inner.current.write() = Credentials::default();
        *self.inner.issued_at.write() = None;
        debug!(removed, "cleared credential record");
        Ok(())
    }

    /// Exchanges a username and password for a fresh token pair.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<()> {
        let url = format!("{}/auth/login", self.inner.base_url);
        let response = self
            .inner
            .http
            .post(&url)
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .as_ref()
                .and_then(server_message)
                .unwrap_or_else(|| "Authentication failed".to_string());
            return Err(RegoloError::auth(message));
        }
        let tokens: TokenResponse = serde_json::from_str(&text)
            .map_err(|_| RegoloError::auth("login response did not contain an access token"))?;
        self.save(Credentials::new(tokens.access_token, tokens.refresh_token))
            .await?;
        info!("authenticated against management API");
        Ok(())
    }

    /// Trades the refresh token for a new pair. `false` means "cannot refresh":
    /// no refresh token is held or the exchange failed, and the previous
    /// credentials are left as they were.
    pub async fn refresh(&self) -> bool {
        let _gate = self.inner.refresh_gate.lock().await;
        self.exchange_refresh_token().await
    }

    /// Refresh on behalf of a request rejected while using `rejected`. When a
    /// concurrent caller already rotated the token, the rotation is reused.
    pub(crate) async fn refresh_rejected(&self, rejected: &str) -> bool {
        let _gate = self.inner.refresh_gate.lock().await;
        match self.access_token() {
            Some(current) if current != rejected => {
                debug!("access token already rotated by a concurrent refresh");
                true
            }
            _ => self.exchange_refresh_token().await,
        }
    }

    async fn exchange_refresh_token(&self) -> bool {
        let Some(refresh_token) = self.refresh_token() else {
            return false;
        };
        let tokens = match self.request_refresh(&refresh_token).await {
            Ok(tokens) => tokens,
            Err(err) => {
                warn!(error = %err, "token refresh failed");
                return false;
            }
        };
        let updated = Credentials::new(
            tokens.access_token,
            tokens.refresh_token.or(Some(refresh_token)),
        );
        match self.save(updated).await {
            Ok(()) => {
                debug!("access token refreshed");
                true
            }
            Err(err) => {
                warn!(error = %err, "refreshed credentials could not be persisted");
                false
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let url = format!("{}/auth/refresh", self.inner.base_url);
        let response = self
            .inner
            .http
            .post(&url)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RegoloError::from_response(response).await);
        }
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    fn refresh_token(&self) -> Option<String> {
        self.inner.current.read().refresh_token.clone()
    }
}
