//! Client for the model-management API (SSH keys, model registry, GPU
//! inference sessions). Every call goes through [`AuthenticatedRequester`].

use crate::auth::CredentialStore;
use crate::config::ManagementConfig;
use crate::error::Result;
use crate::requester::AuthenticatedRequester;
use serde::Serialize;
use serde_json::{json, Map, Value};
use url::form_urlencoded;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisterModel {
    pub name: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadModel {
    pub model_name: String,
    pub gpu: String,
    pub force: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vllm_config: Option<Map<String, Value>>,
}

/// Usage window for [`ManagementClient::user_status`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusQuery {
    pub month: Option<String>,
    pub time_range_start: Option<String>,
    pub time_range_end: Option<String>,
}

impl StatusQuery {
    fn to_query_string(&self) -> String {
        let pairs = [
            ("month", &self.month),
            ("time_range_start", &self.time_range_start),
            ("time_range_end", &self.time_range_end),
        ];
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        let mut any = false;
        for (key, value) in pairs {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                serializer.append_pair(key, value);
                any = true;
            }
        }
        if any {
            format!("?{}", serializer.finish())
        } else {
            String::new()
        }
    }
}

#[derive(Clone)]
pub struct ManagementClient {
    requester: AuthenticatedRequester,
}

impl ManagementClient {
    /// Loads the persisted credentials described by `config`.
    pub async fn connect(config: &ManagementConfig) -> Result<Self> {
        let credentials = CredentialStore::load(config).await?;
        Ok(Self::new(AuthenticatedRequester::new(
            credentials,
            config.timeout,
        )))
    }

    pub fn new(requester: AuthenticatedRequester) -> Self {
        Self { requester }
    }

    pub fn credentials(&self) -> &CredentialStore {
        self.requester.credentials()
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        self.credentials().authenticate(username, password).await
    }

    pub async fn logout(&self) -> Result<()> {
        self.credentials().clear().await
    }

    pub async fn ssh_keys(&self) -> Result<Value> {
        self.requester.get("/ssh-keys").await
    }

    pub async fn add_ssh_key(&self, title: &str, key: &str) -> Result<Value> {
        self.requester
            .post("/ssh-keys", &json!({"title": title, "key": key}))
            .await
    }

    pub async fn delete_ssh_key(&self, key_id: &str) -> Result<Value> {
        self.requester.delete(&format!("/ssh-keys/{key_id}")).await
    }

    pub async fn gpus(&self) -> Result<Value> {
        self.requester.get("/inference/gpus").await
    }

    pub async fn loaded_models(&self) -> Result<Value> {
        self.requester.get("/inference/loaded-models").await
    }

    pub async fn models(&self) -> Result<Value> {
        self.requester.get("/models").await
    }

    pub async fn model(&self, name: &str) -> Result<Value> {
        self.requester.get(&format!("/models/{name}")).await
    }

    pub async fn register_model(&self, model: &RegisterModel) -> Result<Value> {
        self.requester
            .post("/models/load", &serde_json::to_value(model)?)
            .await
    }

    pub async fn delete_model(&self, name: &str) -> Result<Value> {
        self.requester.delete(&format!("/models/{name}")).await
    }

    pub async fn load_model(&self, request: &LoadModel) -> Result<Value> {
        self.requester
            .post("/inference/load", &serde_json::to_value(request)?)
            .await
    }

    pub async fn unload_model(&self, session_id: u64) -> Result<Value> {
        self.requester
            .post("/inference/unload", &json!({"session_id": session_id}))
            .await
    }

    pub async fn user_status(&self, query: &StatusQuery) -> Result<Value> {
        self.requester
            .get(&format!("/inference/user-status{}", query.to_query_string()))
            .await
    }
}
