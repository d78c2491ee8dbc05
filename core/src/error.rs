use crate::config::ConfigError;
use serde_json::Value;
use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, RegoloError>;

const LOGIN_AGAIN: &str = "Authentication failed. Please login again.";

#[derive(thiserror::Error, Debug)]
pub enum RegoloError {
    #[error("not authenticated; run `regolo auth login` first")]
    Unauthenticated,
    #[error("an API key is required")]
    MissingApiKey,
    #[error("authentication error: {message}")]
    Auth { message: String },
    #[error("network error: {message}")]
    Network { message: String },
    #[error("request timed out: {message}")]
    Timeout { message: String },
    #[error("API error {status} {reason}")]
    Api {
        status: u16,
        reason: String,
        body: Option<Value>,
    },
    #[error("stored record at {} is unreadable: {source}", path.display())]
    ConfigCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("model not found: {model}")]
    ModelNotFound { model: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed JSON: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RegoloError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn login_again() -> Self {
        Self::auth(LOGIN_AGAIN)
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds an `Api` error from a status line and the raw response text.
    /// The body is kept only when it parses as JSON.
    pub fn api(status: reqwest::StatusCode, body_text: &str) -> Self {
        let body = serde_json::from_str::<Value>(body_text.trim()).ok();
        Self::Api {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            body,
        }
    }

    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Self::api(status, &text)
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Human-readable message suitable for printing to a terminal.
    pub fn user_message(&self) -> String {
        match self {
            Self::Api {
                status,
                reason,
                body,
            } => match body.as_ref().and_then(server_message) {
                Some(message) => format!("API Error ({status}): {message}"),
                None => format!("API Error: {reason} ({status})"),
            },
            Self::Auth { message } => message.clone(),
            Self::Config(err) => err.user_message(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for RegoloError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                message: err.to_string(),
            }
        } else {
            Self::Network {
                message: err.to_string(),
            }
        }
    }
}

/// Extracts the server-supplied message from an error body.
pub fn server_message(body: &Value) -> Option<String> {
    let text = body
        .get("detail")
        .and_then(Value::as_str)
        .or_else(|| body.pointer("/error/message").and_then(Value::as_str))
        .or_else(|| body.get("error").and_then(Value::as_str))
        .or_else(|| body.get("message").and_then(Value::as_str))?;
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use serde_json::json;

    #[test]
    fn api_error_surfaces_server_detail() {
        let err = RegoloError::api(StatusCode::FORBIDDEN, r#"{"detail":"quota   exhausted"}"#);
        assert_eq!(err.status_code(), Some(403));
        assert_eq!(err.user_message(), "API Error (403): quota exhausted");
    }

    #[test]
    fn api_error_falls_back_to_reason() {
        let err = RegoloError::api(StatusCode::BAD_GATEWAY, "<html>oops</html>");
        assert!(matches!(err, RegoloError::Api { body: None, .. }));
        assert_eq!(err.user_message(), "API Error: Bad Gateway (502)");
    }

    #[test]
    fn server_message_checks_nested_error_objects() {
        let body = json!({"error": {"message": "model overloaded", "type": "server"}});
        assert_eq!(server_message(&body).as_deref(), Some("model overloaded"));
        assert_eq!(
            server_message(&json!({"error": "bad key"})).as_deref(),
            Some("bad key")
        );
        assert_eq!(server_message(&json!({"status": "failed"})), None);
    }

    #[test]
    fn login_again_is_actionable() {
        let err = RegoloError::login_again();
        assert!(err.user_message().contains("login again"));
    }
}
