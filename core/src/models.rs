use crate::auth::bearer;
use crate::config::ClientConfig;
use crate::error::{RegoloError, Result};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Validates a model name before a request is issued with it.
#[async_trait]
pub trait ModelCheck: Send + Sync {
    /// Returns the name to use, or an error when the model cannot be used.
    async fn check_model(&self, model: &str) -> Result<String>;
}

/// Accepts every non-empty name without asking the server.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoModelCheck;

#[async_trait]
impl ModelCheck for NoModelCheck {
    async fn check_model(&self, model: &str) -> Result<String> {
        Ok(model.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelMode {
    #[serde(default)]
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelInfo {
    pub model_name: String,
    pub model_info: ModelMode,
}

#[derive(Deserialize)]
struct ModelList<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Deserialize)]
struct ModelId {
    id: String,
}

/// Lists the models served by the inference API.
#[derive(Clone)]
pub struct ModelCatalog {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    checks_enabled: bool,
}

impl ModelCatalog {
    pub fn new(config: &ClientConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            checks_enabled: config.enable_model_checks,
        }
    }

    pub async fn model_names(&self) -> Result<Vec<String>> {
        let list: ModelList<ModelId> = self.fetch("/models").await?;
        Ok(list.data.into_iter().map(|model| model.id).collect())
    }

    pub async fn model_info(&self) -> Result<Vec<ModelInfo>> {
        let list: ModelList<ModelInfo> = self.fetch("/model/info").await?;
        Ok(list.data)
    }

    async fn fetch<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let api_key = self.api_key.as_deref().ok_or(RegoloError::MissingApiKey)?;
        let url = format!("{}{}", self.base_url, path);
        debug!(path, "fetching model catalog");
        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, bearer(api_key))
            .send()
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(RegoloError::auth(
                "Authentication failed. Couldn't fetch models",
            ));
        }
        if !response.status().is_success() {
            return Err(RegoloError::from_response(response).await);
        }
        let body: Value = response.json().await?;
        Ok(serde_json::from_value(body)?)
    }
}

#[async_trait]
impl ModelCheck for ModelCatalog {
    async fn check_model(&self, model: &str) -> Result<String> {
        if !self.checks_enabled {
            return Ok(model.to_string());
        }
        if model.trim().is_empty() {
            return Err(RegoloError::InvalidRequest("model is required".into()));
        }
        let available = self.model_names().await?;
        if available.iter().any(|name| name == model) {
            Ok(model.to_string())
        } else {
            Err(RegoloError::ModelNotFound {
                model: model.to_string(),
            })
        }
    }
}
