use std::sync::{Mutex, PoisonError};

use reqwest::header::ACCEPT;
use reqwest::multipart::Form;
use serde_json::{json, Value};
use tokio::runtime::Runtime;
use tracing::{debug, warn};

use super::{data_of, id_text, ApiError, ApiRequest, HttpMethod, RemoteApi, RequestAuth};
use crate::auth::{AuthBackend, AuthError, TokenGrant, TokenManager};
use crate::config::ApiConfig;

pub(super) enum Body {
    Empty,
    Json(Value),
    Form(Form),
}

struct RawResponse {
    status: u16,
    body: String,
}

/// Blocking reqwest client for the portal and upload service.
///
/// Owns its tokio runtime so synchronous workflows never see async details. Investor requests
/// carry a token from the [`TokenManager`] and are retried once after a forced refresh or login
/// when the server answers 401/403.
pub struct HttpApiClient {
    http: reqwest::Client,
    runtime: Runtime,
    base_url: String,
    upload_base_url: String,
    tokens: TokenManager,
    uploader_id: Mutex<Option<String>>,
}

impl HttpApiClient {
    pub fn new(config: &ApiConfig, tokens: TokenManager) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| ApiError::Runtime(err.to_string()))?;
        let runtime = Runtime::new().map_err(|err| ApiError::Runtime(err.to_string()))?;
        Ok(Self {
            http,
            runtime,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            upload_base_url: config.upload_base_url.trim_end_matches('/').to_string(),
            tokens,
            uploader_id: Mutex::new(None),
        })
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub(super) fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(super) fn upload_url(&self, path: &str) -> String {
        format!("{}/{}", self.upload_base_url, path.trim_start_matches('/'))
    }

    fn bearer(&self, auth: &RequestAuth) -> Result<Option<String>, ApiError> {
        match auth {
            RequestAuth::Investor(user) => Ok(Some(self.tokens.bearer(self, user.as_deref())?)),
            RequestAuth::Bearer(token) => Ok(Some(token.clone())),
            RequestAuth::Anonymous => Ok(None),
        }
    }

    fn dispatch(
        &self,
        method: HttpMethod,
        url: &str,
        query: &[(String, String)],
        bearer: Option<&str>,
        body: Body,
    ) -> Result<RawResponse, ApiError> {
        let verb = match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Post => reqwest::Method::POST,
        };
        let mut builder = self.http.request(verb, url).header(ACCEPT, "*/*");
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        builder = match body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(&value),
            Body::Form(form) => builder.multipart(form),
        };

        debug!(%method, url, "sending request");
        let result = self.runtime.block_on(async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>(RawResponse { status, body })
        });

        let raw = result.map_err(|err| ApiError::Transport {
            method,
            url: url.to_string(),
            message: err.to_string(),
        })?;
        debug!(%method, url, status = raw.status, "received response");
        Ok(raw)
    }

    /// Sends with credentials, re-authenticating once for investor requests rejected as unauthorized.
    pub(super) fn send<F>(
        &self,
        method: HttpMethod,
        url: &str,
        query: &[(String, String)],
        auth: &RequestAuth,
        make_body: F,
    ) -> Result<Value, ApiError>
    where
        F: Fn() -> Result<Body, ApiError>,
    {
        let bearer = self.bearer(auth)?;
        let mut raw = self.dispatch(method, url, query, bearer.as_deref(), make_body()?)?;

        if matches!(raw.status, 401 | 403) {
            if let RequestAuth::Investor(user) = auth {
                warn!(%method, url, status = raw.status, "unauthorized, re-authenticating once");
                self.tokens.on_unauthorized(self, user.as_deref())?;
                let bearer = self.bearer(auth)?;
                raw = self.dispatch(method, url, query, bearer.as_deref(), make_body()?)?;
            }
        }

        interpret(method, url, raw)
    }

    /// Portal id of the investor performing uploads, fetched once from `/users/me`.
    pub(super) fn uploader_id(&self) -> Result<String, ApiError> {
        let mut cached = self
            .uploader_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }
        let response = self.execute(ApiRequest::get("/users/me"))?;
        let id = data_of(&response)
            .get("id")
            .and_then(id_text)
            .ok_or_else(|| ApiError::Decode {
                url: self.url_for("/users/me"),
                message: "missing data.id".to_string(),
            })?;
        *cached = Some(id.clone());
        Ok(id)
    }

    fn auth_grant(&self, path: &str, body: Value) -> Result<TokenGrant, ApiError> {
        let url = self.url_for(path);
        let response = self.send(HttpMethod::Post, &url, &[], &RequestAuth::Anonymous, || {
            Ok(Body::Json(body.clone()))
        })?;
        serde_json::from_value(data_of(&response).clone()).map_err(|err| ApiError::Decode {
            url,
            message: err.to_string(),
        })
    }
}

impl RemoteApi for HttpApiClient {
    fn execute(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let url = self.url_for(&request.path);
        self.send(
            request.method,
            &url,
            &request.query,
            &request.auth,
            || match &request.body {
                Some(body) => Ok(Body::Json(body.clone())),
                None => Ok(Body::Empty),
            },
        )
    }
}

impl AuthBackend for HttpApiClient {
    fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
        self.auth_grant("/auth/refresh", json!({ "refresh_token": refresh_token }))
            .map_err(|err| AuthError::RefreshFailed(err.to_string()))
    }

    fn login(
        &self,
        phone_code: &str,
        username: &str,
        password: &str,
    ) -> Result<TokenGrant, AuthError> {
        self.auth_grant(
            "/auth/login",
            json!({ "phone_code": phone_code, "username": username, "password": password }),
        )
        .map_err(|err| AuthError::LoginFailed {
            user: username.to_string(),
            reason: err.to_string(),
        })
    }
}

impl std::fmt::Debug for HttpApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpApiClient")
            .field("base_url", &self.base_url)
            .field("upload_base_url", &self.upload_base_url)
            .finish_non_exhaustive()
    }
}

fn interpret(method: HttpMethod, url: &str, raw: RawResponse) -> Result<Value, ApiError> {
    match raw.status {
        200..=299 => {
            if raw.body.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&raw.body).map_err(|err| ApiError::Decode {
                url: url.to_string(),
                message: err.to_string(),
            })
        }
        401 | 403 => Err(ApiError::Unauthorized {
            method,
            url: url.to_string(),
            status: raw.status,
        }),
        400..=499 => match serde_json::from_str::<Value>(&raw.body) {
            Ok(body) if body.get("message").is_some() || body.get("code").is_some() => {
                Err(rejection(raw.status, &body))
            }
            _ => Err(ApiError::Status {
                method,
                url: url.to_string(),
                status: raw.status,
                body: raw.body,
            }),
        },
        status => Err(ApiError::Status {
            method,
            url: url.to_string(),
            status,
            body: raw.body,
        }),
    }
}

/// Lifts the portal's `{code, log_id, message: {en} | string, data}` error envelope.
fn rejection(status: u16, body: &Value) -> ApiError {
    let message = match body.get("message") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Object(localized)) => localized
            .get("en")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(localized.clone()).to_string()),
        Some(other) if !other.is_null() => other.to_string(),
        _ => "validation failed".to_string(),
    };
    let details = body.get("data").filter(|data| !data.is_null()).cloned();
    if let Some(details) = &details {
        warn!(status, %details, "validation details");
    }
    ApiError::Rejected {
        status,
        code: body.get("code").and_then(id_text),
        log_id: body.get("log_id").and_then(id_text),
        message,
        details,
    }
}
