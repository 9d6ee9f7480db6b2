use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

const USER_TYPE_INVESTOR: &str = "investor";
const API_QIP: &str = "qip_api";
const STATUS_ACTIVE: i64 = 1;
const DEFAULT_PHONE_CODE: &str = "855";

/// Tokens persisted for one portal session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub access_token: String,
    pub refresh_token: String,
    pub access_token_expire_at: Option<DateTime<Utc>>,
    pub refresh_token_expire_at: Option<DateTime<Utc>>,
}

/// Identities an investor can log in with, email first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginCandidates {
    pub phone_code: String,
    pub usernames: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvestorAccount {
    pub id: String,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub email: Option<String>,
    pub phone_code: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unable to read session store {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("session store {} is not valid JSON: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Read access to persisted users and their portal sessions.
pub trait SessionStore: Send + Sync {
    /// Latest session of an active investor whose refresh token is still valid.
    fn investor_session(&self, user_id: &str) -> Result<Option<StoredSession>, StoreError>;
    fn login_candidates(&self, user_id: &str) -> Result<Option<LoginCandidates>, StoreError>;
    /// Access tokens of active sessions for a username, newest first.
    fn tokens_for_username(&self, username: &str) -> Result<Vec<String>, StoreError>;
    fn investor_accounts(
        &self,
        search: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<InvestorAccount>, StoreError>;
}

/// Store used when no session file is configured; every lookup comes back empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptySessionStore;

impl SessionStore for EmptySessionStore {
    fn investor_session(&self, _user_id: &str) -> Result<Option<StoredSession>, StoreError> {
        Ok(None)
    }

    fn login_candidates(&self, _user_id: &str) -> Result<Option<LoginCandidates>, StoreError> {
        Ok(None)
    }

    fn tokens_for_username(&self, _username: &str) -> Result<Vec<String>, StoreError> {
        Ok(Vec::new())
    }

    fn investor_accounts(
        &self,
        _search: Option<&str>,
        _limit: usize,
        _offset: usize,
    ) -> Result<Vec<InvestorAccount>, StoreError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct UserRecord {
    #[serde(deserialize_with = "id_string")]
    id: String,
    #[serde(default)]
    firstname: Option<String>,
    #[serde(default)]
    lastname: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default, deserialize_with = "optional_text")]
    phone_code: Option<String>,
    #[serde(default, deserialize_with = "optional_text")]
    phone_number: Option<String>,
    #[serde(default)]
    user_type: Option<String>,
    #[serde(default)]
    status_id: Option<i64>,
}

impl UserRecord {
    fn is_active_investor(&self) -> bool {
        self.user_type.as_deref() == Some(USER_TYPE_INVESTOR) && self.status_id == Some(STATUS_ACTIVE)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SessionRecord {
    #[serde(deserialize_with = "id_string")]
    user_id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    api: Option<String>,
    #[serde(default)]
    status_id: Option<i64>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    access_token_expire_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    refresh_token_expire_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    latest_requested_datetime: Option<DateTime<Utc>>,
}

impl SessionRecord {
    fn is_live_qip(&self, now: DateTime<Utc>) -> bool {
        self.api.as_deref() == Some(API_QIP)
            && self.access_token.is_some()
            && self.refresh_token.is_some()
            && self.refresh_token_expire_at.is_some_and(|at| at > now)
    }
}

#[derive(Debug, Default, Deserialize)]
struct StoreFile {
    #[serde(default)]
    users: Vec<UserRecord>,
    #[serde(default)]
    sessions: Vec<SessionRecord>,
}

/// Session store backed by a JSON export of the portal's user and session tables.
///
/// ```json
/// { "users": [{ "id": 7, "email": "...", "phone_code": "855", "phone_number": "...",
///               "user_type": "investor", "status_id": 1 }],
///   "sessions": [{ "user_id": 7, "username": "...", "api": "qip_api", "status_id": 1,
///                  "access_token": "...", "refresh_token": "...",
///                  "access_token_expire_at": "2026-01-01T00:00:00Z",
///                  "refresh_token_expire_at": "2026-02-01T00:00:00Z",
///                  "latest_requested_datetime": "2025-12-31T10:00:00Z" }] }
/// ```
#[derive(Debug, Default)]
pub struct JsonSessionStore {
    users: Vec<UserRecord>,
    sessions: Vec<SessionRecord>,
}

impl JsonSessionStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let raw = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let file: StoreFile = serde_json::from_str(raw)?;
        Ok(Self {
            users: file.users,
            sessions: file.sessions,
        })
    }

    fn active_investor(&self, user_id: &str) -> Option<&UserRecord> {
        self.users
            .iter()
            .find(|user| user.id == user_id && user.is_active_investor())
    }

    fn newest_first<'a>(mut sessions: Vec<&'a SessionRecord>) -> Vec<&'a SessionRecord> {
        sessions.sort_by(|a, b| b.latest_requested_datetime.cmp(&a.latest_requested_datetime));
        sessions
    }
}

impl SessionStore for JsonSessionStore {
    fn investor_session(&self, user_id: &str) -> Result<Option<StoredSession>, StoreError> {
        if self.active_investor(user_id).is_none() {
            return Ok(None);
        }
        let now = Utc::now();
        let candidates = self
            .sessions
            .iter()
            .filter(|session| session.user_id == user_id && session.is_live_qip(now))
            .collect();

        Ok(Self::newest_first(candidates)
            .into_iter()
            .next()
            .and_then(|session| {
                Some(StoredSession {
                    access_token: session.access_token.clone()?,
                    refresh_token: session.refresh_token.clone()?,
                    access_token_expire_at: session.access_token_expire_at,
                    refresh_token_expire_at: session.refresh_token_expire_at,
                })
            }))
    }

    fn login_candidates(&self, user_id: &str) -> Result<Option<LoginCandidates>, StoreError> {
        let Some(user) = self.active_investor(user_id) else {
            return Ok(None);
        };
        let usernames: Vec<String> = [user.email.as_deref(), user.phone_number.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect();
        if usernames.is_empty() {
            return Ok(None);
        }
        let phone_code = user
            .phone_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .unwrap_or(DEFAULT_PHONE_CODE)
            .to_string();
        Ok(Some(LoginCandidates {
            phone_code,
            usernames,
        }))
    }

    fn tokens_for_username(&self, username: &str) -> Result<Vec<String>, StoreError> {
        let matching = self
            .sessions
            .iter()
            .filter(|session| {
                session.username.as_deref() == Some(username)
                    && session.status_id == Some(STATUS_ACTIVE)
            })
            .collect();
        Ok(Self::newest_first(matching)
            .into_iter()
            .filter_map(|session| session.access_token.clone())
            .filter(|token| !token.is_empty())
            .collect())
    }

    fn investor_accounts(
        &self,
        search: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<InvestorAccount>, StoreError> {
        let now = Utc::now();
        let needle = search
            .map(|term| term.trim().to_lowercase())
            .filter(|term| !term.is_empty());

        let mut users: Vec<&UserRecord> = self
            .users
            .iter()
            .filter(|user| user.is_active_investor())
            .filter(|user| {
                self.sessions.iter().any(|session| {
                    session.user_id == user.id
                        && session.is_live_qip(now)
                        && session.access_token_expire_at.is_some()
                })
            })
            .filter(|user| match &needle {
                None => true,
                Some(term) => [
                    &user.firstname,
                    &user.lastname,
                    &user.email,
                    &user.phone_number,
                ]
                .into_iter()
                .flatten()
                .any(|value| value.to_lowercase().contains(term)),
            })
            .collect();

        users.sort_by(|a, b| compare_ids(&b.id, &a.id));

        Ok(users
            .into_iter()
            .skip(offset)
            .take(limit.max(1))
            .map(|user| InvestorAccount {
                id: user.id.clone(),
                firstname: user.firstname.clone(),
                lastname: user.lastname.clone(),
                email: user.email.clone(),
                phone_code: user.phone_code.clone(),
                phone_number: user.phone_number.clone(),
            })
            .collect())
    }
}

fn compare_ids(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

/// Parses the timestamp shapes the portal emits: RFC 3339, or naive UTC with a `T` or space.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

pub(crate) fn optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}
