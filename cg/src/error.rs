//! Error types for connector calls, run setup and payload comparison

use thiserror::Error;

/// Errors returned by a tag manager connector
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Connector unavailable: {0}")]
    Unavailable(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConnectorError {
    /// Check if the remote rejected the entity as already present
    pub fn is_conflict(&self) -> bool {
        matches!(self, ConnectorError::Conflict(_))
    }

    /// Check if this is a quota/rate error from the remote
    pub fn is_quota(&self) -> bool {
        matches!(self, ConnectorError::QuotaExceeded(_))
    }

    /// Check if re-running the batch later could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ConnectorError::QuotaExceeded(_) => true,
            ConnectorError::Unavailable(_) => true,
            ConnectorError::Network(_) => true,
            ConnectorError::Api { status, .. } => *status >= 500,
            ConnectorError::NotFound(_) => false,
            ConnectorError::Conflict(_) => false,
            ConnectorError::Json(_) => false,
        }
    }
}

/// Fatal errors that abort a run before any entity is processed
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Tag manager connector unavailable: {0}")]
    ConnectorUnavailable(String),

    #[error("Workspace '{name}' could not be found or created: {source}")]
    WorkspaceResolution {
        name: String,
        #[source]
        source: ConnectorError,
    },
}

/// Raised when a remote payload cannot be brought into comparable form
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot compare '{entity}': {reason}")]
pub struct ComparisonAmbiguous {
    pub entity: String,
    pub reason: String,
}
