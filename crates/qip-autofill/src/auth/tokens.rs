use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::store::{optional_timestamp, SessionStore, StoredSession};
use super::AuthError;

/// Token payload returned by `/auth/login` and `/auth/refresh`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub access_token_expire_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub refresh_token_expire_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub socket_key: Option<String>,
}

/// The two auth endpoints the token manager drives.
pub trait AuthBackend {
    fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError>;
    fn login(&self, phone_code: &str, username: &str, password: &str)
        -> Result<TokenGrant, AuthError>;
}

#[derive(Debug, Default)]
struct TokenState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    access_token_expire_at: Option<DateTime<Utc>>,
    refresh_token_expire_at: Option<DateTime<Utc>>,
    loaded_for: Option<String>,
}

impl TokenState {
    fn needs_refresh(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        if self.access_token.is_none() {
            return true;
        }
        match self.access_token_expire_at {
            Some(expires_at) => expires_at - now <= threshold,
            None => false,
        }
    }

    fn load(&mut self, session: StoredSession) {
        self.access_token = Some(session.access_token);
        self.refresh_token = Some(session.refresh_token);
        self.access_token_expire_at = session.access_token_expire_at;
        self.refresh_token_expire_at = session.refresh_token_expire_at;
    }

    /// Refresh responses may omit fields; keep what we already hold.
    fn merge(&mut self, grant: TokenGrant) {
        self.access_token = grant.access_token.or(self.access_token.take());
        self.refresh_token = grant.refresh_token.or(self.refresh_token.take());
        self.access_token_expire_at = grant.access_token_expire_at.or(self.access_token_expire_at);
        self.refresh_token_expire_at = grant
            .refresh_token_expire_at
            .or(self.refresh_token_expire_at);
    }

    fn replace(&mut self, grant: TokenGrant) {
        self.access_token = grant.access_token;
        self.refresh_token = grant.refresh_token;
        self.access_token_expire_at = grant.access_token_expire_at;
        self.refresh_token_expire_at = grant.refresh_token_expire_at;
    }
}

/// Process-wide investor credentials: override tokens, persisted sessions, refresh and login.
pub struct TokenManager {
    state: Mutex<TokenState>,
    store: Arc<dyn SessionStore>,
    password: Option<String>,
    override_access: Option<String>,
    override_refresh: Option<String>,
    default_user: Option<String>,
    threshold: Duration,
}

impl TokenManager {
    pub fn new(store: Arc<dyn SessionStore>, password: Option<String>) -> Self {
        Self {
            state: Mutex::new(TokenState::default()),
            store,
            password,
            override_access: None,
            override_refresh: None,
            default_user: None,
            threshold: Duration::minutes(5),
        }
    }

    pub fn with_override(mut self, access: Option<String>, refresh: Option<String>) -> Self {
        self.override_access = access;
        self.override_refresh = refresh;
        self
    }

    pub fn with_default_user(mut self, user_id: Option<String>) -> Self {
        self.default_user = user_id;
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    fn lock(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn effective_user<'a>(&'a self, user_id: Option<&'a str>) -> Option<&'a str> {
        user_id.or(self.default_user.as_deref())
    }

    /// Returns a bearer token for the investor, refreshing or logging in when needed.
    pub fn bearer(
        &self,
        backend: &dyn AuthBackend,
        user_id: Option<&str>,
    ) -> Result<String, AuthError> {
        let user_id = self.effective_user(user_id);
        let mut state = self.lock();

        if let Some(access) = &self.override_access {
            if state.access_token.is_none() {
                state.access_token = Some(access.clone());
                state.refresh_token = self.override_refresh.clone();
            }
        } else if let Some(user) = user_id {
            if state.loaded_for.as_deref() != Some(user) {
                *state = TokenState {
                    loaded_for: Some(user.to_string()),
                    ..TokenState::default()
                };
                if let Some(session) = self.store.investor_session(user)? {
                    debug!(user, "loaded persisted investor session");
                    state.load(session);
                }
            }
        }

        if state.needs_refresh(Utc::now(), self.threshold) {
            if let Err(err) = self.refresh_locked(&mut state, backend) {
                let Some(user) = user_id else {
                    return Err(err);
                };
                debug!(user, error = %err, "refresh unavailable, logging in");
                self.login_locked(&mut state, backend, user)?;
            }
        }

        state.access_token.clone().ok_or(AuthError::MissingAccessToken)
    }

    /// Forces a refresh, then a password login, after the server rejected our token.
    pub fn on_unauthorized(
        &self,
        backend: &dyn AuthBackend,
        user_id: Option<&str>,
    ) -> Result<(), AuthError> {
        let user_id = self.effective_user(user_id);
        let mut state = self.lock();
        match self.refresh_locked(&mut state, backend) {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(error = %err, "forced refresh failed");
                let user = user_id.ok_or(AuthError::NoUser)?;
                self.login_locked(&mut state, backend, user)
            }
        }
    }

    fn refresh_locked(
        &self,
        state: &mut TokenState,
        backend: &dyn AuthBackend,
    ) -> Result<(), AuthError> {
        let refresh_token = state
            .refresh_token
            .clone()
            .ok_or(AuthError::MissingRefreshToken)?;
        let grant = backend.refresh(&refresh_token)?;
        state.merge(grant);
        debug!("investor token refreshed");
        Ok(())
    }

    fn login_locked(
        &self,
        state: &mut TokenState,
        backend: &dyn AuthBackend,
        user_id: &str,
    ) -> Result<(), AuthError> {
        let password = self.password.as_deref().ok_or(AuthError::MissingPassword)?;
        let candidates =
            self.store
                .login_candidates(user_id)?
                .ok_or_else(|| AuthError::NoLoginCandidates {
                    user_id: user_id.to_string(),
                })?;

        let mut last_error = None;
        for username in &candidates.usernames {
            match backend.login(&candidates.phone_code, username, password) {
                Ok(grant) => {
                    if grant.access_token.is_none() {
                        return Err(AuthError::MissingAccessToken);
                    }
                    state.replace(grant);
                    state.loaded_for = Some(user_id.to_string());
                    info!(user_id, "investor logged in");
                    return Ok(());
                }
                Err(err) => last_error = Some(err.to_string()),
            }
        }

        Err(AuthError::LoginFailed {
            user: user_id.to_string(),
            reason: last_error.unwrap_or_else(|| "no login attempted".to_string()),
        })
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("default_user", &self.default_user)
            .field("has_override", &self.override_access.is_some())
            .finish_non_exhaustive()
    }
}
