use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

const API_SUFFIX: &str = "/api/v1";

/// Top-level configuration for the autofill driver.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub auth: AuthConfig,
    pub media: MediaConfig,
    pub payment: PaymentConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let base_url = normalize_base(&required("BASE")?);
        let upload_base_url = required("UPLOAD_BASE")?.trim_end_matches('/').to_string();
        let step_list_url = optional("STEP_V2_ENDPOINT").unwrap_or_else(|| {
            format!("{}/api/v2/step", base_url.trim_end_matches(API_SUFFIX))
        });
        let project_type = optional("QIP_PROJECT_TYPE").unwrap_or_else(|| "qip".to_string());
        let timeout = seconds("QIP_HTTP_TIMEOUT_SECS", 460)?;

        let password =
            optional("DEFAULT_QIP_USER_PASSWORD").or_else(|| optional("User_pass"));

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            api: ApiConfig {
                base_url,
                upload_base_url,
                step_list_url,
                project_type,
                timeout,
            },
            auth: AuthConfig {
                password,
                override_access_token: optional("OVERRIDE_ACCESS_TOKEN"),
                override_refresh_token: optional("OVERRIDE_REFRESH_TOKEN"),
                investor_user_id: optional("QIP_INVESTOR_USER_ID"),
                session_store: optional("QIP_SESSION_STORE").map(PathBuf::from),
            },
            media: MediaConfig {
                media_root: optional("QIP_MEDIA_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("picture_automate")),
                sample_data_dir: optional("QIP_SAMPLE_DATA_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("data_ipm/cdcIPM-Sample-data")),
            },
            payment: PaymentConfig {
                endpoint: optional("DMB_DIRECT_PAYMENT_ENDPOINT"),
                token: optional("DMB_DIRECT_PAYMENT_TOKEN"),
                poll_interval: seconds("QIP_INVOICE_POLL_SECS", 5)?,
                timeout: seconds("QIP_INVOICE_TIMEOUT_SECS", 180)?,
            },
            telemetry: TelemetryConfig { log_level },
        })
    }
}

/// Remote endpoints and transport limits.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub upload_base_url: String,
    pub step_list_url: String,
    pub project_type: String,
    pub timeout: Duration,
}

/// Investor credentials and the location of persisted sessions.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub password: Option<String>,
    pub override_access_token: Option<String>,
    pub override_refresh_token: Option<String>,
    pub investor_user_id: Option<String>,
    pub session_store: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub media_root: PathBuf,
    pub sample_data_dir: PathBuf,
}

/// Direct-payment gateway settings and invoice polling cadence.
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

#[derive(Debug)]
pub enum ConfigError {
    Missing { key: &'static str },
    InvalidNumber { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing { key } => write!(f, "{key} must be set"),
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{key} must be a whole number of seconds, got '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    optional(key).ok_or(ConfigError::Missing { key })
}

fn seconds(key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match optional(key) {
        None => Ok(Duration::from_secs(default)),
        Some(value) => value
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
    }
}

fn normalize_base(raw: &str) -> String {
    let trimmed = raw.trim_end_matches('/');
    if trimmed.ends_with(API_SUFFIX) {
        trimmed.to_string()
    } else {
        format!("{trimmed}{API_SUFFIX}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for key in [
            "BASE",
            "UPLOAD_BASE",
            "STEP_V2_ENDPOINT",
            "QIP_PROJECT_TYPE",
            "QIP_HTTP_TIMEOUT_SECS",
            "DEFAULT_QIP_USER_PASSWORD",
            "User_pass",
            "QIP_INVOICE_POLL_SECS",
            "QIP_INVOICE_TIMEOUT_SECS",
            "APP_LOG_LEVEL",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_appends_api_suffix_and_derives_step_endpoint() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("BASE", "https://portal.example.gov/");
        env::set_var("UPLOAD_BASE", "https://files.example.gov/");

        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.api.base_url, "https://portal.example.gov/api/v1");
        assert_eq!(config.api.upload_base_url, "https://files.example.gov");
        assert_eq!(
            config.api.step_list_url,
            "https://portal.example.gov/api/v2/step"
        );
        assert_eq!(config.api.project_type, "qip");
        assert_eq!(config.api.timeout, Duration::from_secs(460));
        assert_eq!(config.payment.poll_interval, Duration::from_secs(5));
        assert_eq!(config.telemetry.log_level, "info");
    }

    #[test]
    fn password_falls_back_to_legacy_key() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("BASE", "https://portal.example.gov/api/v1");
        env::set_var("UPLOAD_BASE", "https://files.example.gov");
        env::set_var("User_pass", "secret");

        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.api.base_url, "https://portal.example.gov/api/v1");
        assert_eq!(config.auth.password.as_deref(), Some("secret"));
    }

    #[test]
    fn missing_base_is_reported() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();

        let err = AppConfig::load().expect_err("BASE is required");
        assert!(matches!(err, ConfigError::Missing { key: "BASE" }));
    }

    #[test]
    fn invalid_timeout_is_rejected() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("BASE", "https://portal.example.gov");
        env::set_var("UPLOAD_BASE", "https://files.example.gov");
        env::set_var("QIP_HTTP_TIMEOUT_SECS", "soon");

        let err = AppConfig::load().expect_err("timeout must be numeric");
        assert_eq!(
            err.to_string(),
            "QIP_HTTP_TIMEOUT_SECS must be a whole number of seconds, got 'soon'"
        );
    }
}
