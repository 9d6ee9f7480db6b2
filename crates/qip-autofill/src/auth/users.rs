use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use super::store::SessionStore;
use super::AuthError;
use crate::api::{data_of, ApiRequest, RemoteApi};

const DEFAULT_PHONE_CODE: &str = "855";

/// An approval-stage user identified by a local phone number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageUser {
    pub identity: String,
    pub phone_code: String,
    pub phone_number: String,
    pub email: Option<String>,
}

impl StageUser {
    /// Builds the login identity from a local number such as `017581166`; the trunk zero is dropped.
    pub fn from_phone(phone: &str) -> Self {
        let identity = phone.trim().to_string();
        let phone_number = identity.strip_prefix('0').unwrap_or(&identity).to_string();
        Self {
            identity,
            phone_code: DEFAULT_PHONE_CODE.to_string(),
            phone_number,
            email: None,
        }
    }

    fn login_candidates(&self) -> Vec<&str> {
        [self.email.as_deref(), Some(self.phone_number.as_str())]
            .into_iter()
            .flatten()
            .filter(|value| !value.is_empty())
            .collect()
    }
}

/// Produces a bearer token for an approval-stage user.
pub trait UserAuthenticator: Send + Sync {
    fn bearer_for(&self, user: &StageUser) -> Result<String, AuthError>;
}

/// Reuses persisted session tokens that still pass `/users/me`, else logs in with the shared password.
pub struct SessionAuthenticator {
    api: Arc<dyn RemoteApi>,
    store: Arc<dyn SessionStore>,
    password: Option<String>,
}

impl SessionAuthenticator {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        store: Arc<dyn SessionStore>,
        password: Option<String>,
    ) -> Self {
        Self {
            api,
            store,
            password,
        }
    }

    fn reuse_stored_token(&self, user: &StageUser) -> Option<String> {
        let tokens = match self.store.tokens_for_username(&user.phone_number) {
            Ok(tokens) => tokens,
            Err(err) => {
                warn!(user = %user.identity, error = %err, "stored token lookup failed");
                return None;
            }
        };

        tokens.into_iter().find(|token| {
            self.api
                .execute(ApiRequest::get("/users/me").bearer(token))
                .is_ok()
        })
    }

    fn login_with_password(&self, user: &StageUser) -> Result<String, AuthError> {
        let password = self.password.as_deref().ok_or(AuthError::MissingPassword)?;
        let mut last_error = None;

        for username in user.login_candidates() {
            let body = json!({
                "phone_code": user.phone_code,
                "username": username,
                "password": password,
            });
            match self
                .api
                .execute(ApiRequest::post("/auth/login", Some(body)).anonymous())
            {
                Ok(response) => {
                    if let Some(token) = data_of(&response)
                        .get("access_token")
                        .and_then(|token| token.as_str())
                        .filter(|token| !token.is_empty())
                    {
                        return Ok(token.to_string());
                    }
                    last_error = Some("response carried no access token".to_string());
                }
                Err(err) => last_error = Some(err.to_string()),
            }
        }

        Err(AuthError::LoginFailed {
            user: user.identity.clone(),
            reason: last_error.unwrap_or_else(|| "no login identity".to_string()),
        })
    }
}

impl UserAuthenticator for SessionAuthenticator {
    fn bearer_for(&self, user: &StageUser) -> Result<String, AuthError> {
        if let Some(token) = self.reuse_stored_token(user) {
            debug!(user = %user.identity, "reusing stored session token");
            return Ok(token);
        }
        self.login_with_password(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, HttpMethod, RequestAuth};
    use crate::auth::EmptySessionStore;
    use serde_json::Value;
    use std::sync::Mutex;

    #[derive(Default)]
    struct LoginApi {
        requests: Mutex<Vec<ApiRequest>>,
    }

    impl RemoteApi for LoginApi {
        fn execute(&self, request: ApiRequest) -> Result<Value, ApiError> {
            self.requests.lock().expect("requests").push(request.clone());
            Ok(json!({"data": {"access_token": "fresh"}}))
        }
    }

    #[test]
    fn stage_user_strips_trunk_zero() {
        let user = StageUser::from_phone("017581166");
        assert_eq!(user.identity, "017581166");
        assert_eq!(user.phone_number, "17581166");
        assert_eq!(user.phone_code, "855");
    }

    #[test]
    fn falls_back_to_password_login_without_stored_tokens() {
        let api = Arc::new(LoginApi::default());
        let authenticator = SessionAuthenticator::new(
            api.clone(),
            Arc::new(EmptySessionStore),
            Some("pw".to_string()),
        );

        let token = authenticator
            .bearer_for(&StageUser::from_phone("099902345"))
            .expect("login succeeds");
        assert_eq!(token, "fresh");

        let requests = api.requests.lock().expect("requests");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, HttpMethod::Post);
        assert_eq!(requests[0].path, "/auth/login");
        assert_eq!(requests[0].auth, RequestAuth::Anonymous);
        assert_eq!(
            requests[0].body.as_ref().and_then(|body| body.get("username")),
            Some(&json!("99902345"))
        );
    }

    #[test]
    fn missing_password_is_reported() {
        let authenticator = SessionAuthenticator::new(
            Arc::new(LoginApi::default()),
            Arc::new(EmptySessionStore),
            None,
        );
        let err = authenticator
            .bearer_for(&StageUser::from_phone("099902345"))
            .expect_err("password required");
        assert!(matches!(err, AuthError::MissingPassword));
    }
}
