use crate::auth::{bearer, CredentialStore};
use crate::error::{RegoloError, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, Response, StatusCode};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

/// Issues management-API calls with the current access token, refreshing and
/// retrying once when the server rejects it.
#[derive(Clone)]
pub struct AuthenticatedRequester {
    http: reqwest::Client,
    credentials: CredentialStore,
    timeout: Duration,
}

impl AuthenticatedRequester {
    pub fn new(credentials: CredentialStore, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials,
            timeout,
        }
    }

    pub fn with_client(
        credentials: CredentialStore,
        http: reqwest::Client,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            credentials,
            timeout,
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Sends `method path` and returns the parsed JSON body. An empty body
    /// yields an empty object.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        headers: Option<&HeaderMap>,
    ) -> Result<Value> {
        let token = self
            .credentials
            .access_token()
            .ok_or(RegoloError::Unauthenticated)?;

        let mut response = self.send(&method, path, body, headers, &token).await?;

        if response.status() == StatusCode::UNAUTHORIZED && self.credentials.has_refresh_token() {
            debug!(%method, path, "access token rejected, refreshing");
            if !self.credentials.refresh_rejected(&token).await {
                return Err(RegoloError::login_again());
            }
            let token = self
                .credentials
                .access_token()
                .ok_or(RegoloError::Unauthenticated)?;
            response = self.send(&method, path, body, headers, &token).await?;
        }

        if !response.status().is_success() {
            let err = RegoloError::from_response(response).await;
            debug!(%method, path, error = %err, "management request failed");
            return Err(err);
        }

        parse_body(response).await
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        self.request(Method::GET, path, None, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.request(Method::POST, path, Some(body), None).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value> {
        self.request(Method::DELETE, path, None, None).await
    }

    async fn send(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        headers: Option<&HeaderMap>,
        token: &str,
    ) -> Result<Response> {
        let url = format!("{}{}", self.credentials.base_url(), path);
        let mut merged = headers.cloned().unwrap_or_default();
        let authorization = HeaderValue::from_str(&bearer(token)).map_err(|_| {
            RegoloError::InvalidRequest("access token is not a valid header value".into())
        })?;
        merged.insert(AUTHORIZATION, authorization);
        let mut request = self
            .http
            .request(method.clone(), &url)
            .timeout(self.timeout)
            .headers(merged);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        debug!(%method, path, status = response.status().as_u16(), "management response");
        Ok(response)
    }
}

async fn parse_body(response: Response) -> Result<Value> {
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    Ok(serde_json::from_str(&text)?)
}
