//! Error types for servicesync

use thiserror::Error;

/// Process-level error type
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

/// Failure of a single redeploy run
///
/// Recorded on the run and reported, so it is `Clone` and carries messages
/// rather than source errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RedeployError {
    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Pull error: {0}")]
    Pull(String),

    #[error("Conflict resolution error: {0}")]
    ConflictResolution(String),

    #[error("Replace error: {0}")]
    Replace(String),

    #[error("Start error: {0}")]
    Start(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Notify error: {0}")]
    Notify(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

impl RedeployError {
    /// Short name of the error kind, used in logs and reports
    pub fn kind(&self) -> &'static str {
        match self {
            RedeployError::Authentication(_) => "authentication",
            RedeployError::Pull(_) => "pull",
            RedeployError::ConflictResolution(_) => "conflict_resolution",
            RedeployError::Replace(_) => "replace",
            RedeployError::Start(_) => "start",
            RedeployError::Timeout(_) => "timeout",
            RedeployError::Notify(_) => "notify",
            RedeployError::InvalidTransition(_) => "invalid_transition",
        }
    }
}
