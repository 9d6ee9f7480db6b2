use std::fmt;

use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use crate::workflows::RunnerError;

/// Top-level failure of the command line driver.
#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Output(std::io::Error),
    Run(RunnerError),
}

impl AppError {
    /// `true` when the portal itself rejected or failed a request, as opposed to local setup.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Run(RunnerError::Step(_) | RunnerError::Approval(_)))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "invalid configuration: {err}"),
            Self::Telemetry(err) => write!(f, "logging setup failed: {err}"),
            Self::Output(err) => write!(f, "unable to write report: {err}"),
            Self::Run(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Telemetry(err) => Some(err),
            Self::Output(err) => Some(err),
            Self::Run(err) => Some(err),
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<TelemetryError> for AppError {
    fn from(err: TelemetryError) -> Self {
        Self::Telemetry(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Output(err)
    }
}

impl From<RunnerError> for AppError {
    fn from(err: RunnerError) -> Self {
        Self::Run(err)
    }
}
