//! Remote API seam shared by every workflow.
//!
//! Workflows speak to the investment portal through [`RemoteApi`], a single `execute` call
//! taking an [`ApiRequest`]. The production implementation is [`HttpApiClient`]; tests swap in
//! in-memory fakes that serve canned JSON.

mod client;
mod upload;

use std::fmt;
use std::path::PathBuf;

use serde_json::Value;

use crate::auth::AuthError;

pub use client::HttpApiClient;
pub use upload::FileUploader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
    Post,
}

impl HttpMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials attached to an outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestAuth {
    /// Investor session managed by the token manager, optionally scoped to one investor.
    Investor(Option<String>),
    /// A bearer token obtained elsewhere (approval users, payment gateway).
    Bearer(String),
    Anonymous,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub auth: RequestAuth,
}

impl ApiRequest {
    fn new(method: HttpMethod, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body,
            auth: RequestAuth::Investor(None),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path, None)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Put, path, Some(body))
    }

    pub fn post(path: impl Into<String>, body: Option<Value>) -> Self {
        Self::new(HttpMethod::Post, path, body)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn acting_as(mut self, user_id: Option<&str>) -> Self {
        self.auth = RequestAuth::Investor(user_id.map(str::to_string));
        self
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.auth = RequestAuth::Bearer(token.to_string());
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.auth = RequestAuth::Anonymous;
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

/// Blocking JSON transport used by all workflows.
pub trait RemoteApi: Send + Sync {
    fn execute(&self, request: ApiRequest) -> Result<Value, ApiError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{method} {url} failed: {message}")]
    Transport {
        method: HttpMethod,
        url: String,
        message: String,
    },
    #[error("{method} {url} unauthorized after re-authentication ({status})")]
    Unauthorized {
        method: HttpMethod,
        url: String,
        status: u16,
    },
    #[error(
        "validation {status} (code={}, log_id={}): {message}",
        .code.as_deref().unwrap_or("-"),
        .log_id.as_deref().unwrap_or("-")
    )]
    Rejected {
        status: u16,
        code: Option<String>,
        log_id: Option<String>,
        message: String,
        details: Option<Value>,
    },
    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: HttpMethod,
        url: String,
        status: u16,
        body: String,
    },
    #[error("response from {url} is not valid JSON: {message}")]
    Decode { url: String, message: String },
    #[error("unable to read upload file {}: {source}", .path.display())]
    File {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("http runtime unavailable: {0}")]
    Runtime(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { status, .. }
            | ApiError::Rejected { status, .. }
            | ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }
}

/// The `data` envelope of a portal response, or `Null` when absent.
pub fn data_of(response: &Value) -> &Value {
    response.get("data").unwrap_or(&Value::Null)
}

/// Renders an identifier that the portal may send as either a string or a number.
pub fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_collects_query_and_auth() {
        let request = ApiRequest::get("/step/applicant")
            .query("invt_id", 42)
            .query("type", "qip")
            .acting_as(Some("7"));

        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.query_value("invt_id"), Some("42"));
        assert_eq!(request.query_value("type"), Some("qip"));
        assert_eq!(request.auth, RequestAuth::Investor(Some("7".to_string())));
    }

    #[test]
    fn rejected_error_keeps_server_detail() {
        let err = ApiError::Rejected {
            status: 400,
            code: Some("E1001".to_string()),
            log_id: None,
            message: "field required".to_string(),
            details: Some(json!({"field": "email"})),
        };

        assert_eq!(
            err.to_string(),
            "validation 400 (code=E1001, log_id=-): field required"
        );
        assert!(!err.is_unauthorized());
    }

    #[test]
    fn id_text_accepts_numbers_and_strings() {
        assert_eq!(id_text(&json!(17)), Some("17".to_string()));
        assert_eq!(id_text(&json!(" abc ")), Some("abc".to_string()));
        assert_eq!(id_text(&json!("")), None);
        assert_eq!(id_text(&Value::Null), None);
    }
}
