//! Investor token lifecycle, persisted sessions, and approval-user authentication.

mod store;
mod tokens;
mod users;

pub use store::{
    parse_timestamp, EmptySessionStore, InvestorAccount, JsonSessionStore, LoginCandidates,
    SessionStore, StoreError, StoredSession,
};
pub use tokens::{AuthBackend, TokenGrant, TokenManager};
pub use users::{SessionAuthenticator, StageUser, UserAuthenticator};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("login password is not configured (DEFAULT_QIP_USER_PASSWORD)")]
    MissingPassword,
    #[error("cannot refresh: no refresh token held")]
    MissingRefreshToken,
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("no active investor with login identities for user_id={user_id}")]
    NoLoginCandidates { user_id: String },
    #[error("login failed for {user}: {reason}")]
    LoginFailed { user: String, reason: String },
    #[error("unauthorized and no user to log in with")]
    NoUser,
    #[error("login succeeded but no access token was returned")]
    MissingAccessToken,
    #[error(transparent)]
    Store(#[from] StoreError),
}
