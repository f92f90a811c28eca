//! Errors raised by the agent and its platform collaborators.

use coderverse_net::NetError;
use thiserror::Error;

/// Errors that can occur in agent operations.
#[derive(Error, Debug)]
pub enum SwError {
    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Sync failed: {0}")]
    SyncFailed(String),

    #[error("State error: {0}")]
    State(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SwError {
    /// Whether the failure came from the network.
    pub fn is_network(&self) -> bool {
        matches!(self, SwError::Network(_))
    }

    /// Short category name for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            SwError::Network(_) => "network",
            SwError::Cache(_) => "cache",
            SwError::Config(_) => "config",
            SwError::Client(_) => "client",
            SwError::Notification(_) => "notification",
            SwError::InstallFailed(_) => "install",
            SwError::SyncFailed(_) => "sync",
            SwError::State(_) => "state",
            SwError::Json(_) => "json",
            SwError::Io(_) => "io",
        }
    }
}

/// Result type alias for agent operations.
pub type Result<T> = std::result::Result<T, SwError>;
