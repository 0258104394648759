use thiserror::Error;

use crate::model::ContentKind;

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The desktop app is not running or its debug channel could not be opened.
    #[error("Plaud Desktop not available: {0}")]
    Unavailable(String),
    #[error("debug channel transport error: {0}")]
    Transport(String),
    #[error("debug channel protocol error: {0}")]
    Protocol(String),
    /// Code evaluated inside the desktop app threw.
    #[error("remote evaluation failed: {description}")]
    Remote {
        description: String,
        status: Option<i64>,
    },
    #[error("Plaud API error ({status}): {message}")]
    Api { status: i64, message: String },
    #[error("no {kind} available for file {file_id}")]
    NotFound { kind: ContentKind, file_id: String },
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("failed to fetch content from {url}: {reason}")]
    Content { url: String, reason: String },
    /// A response arrived intact but does not have the expected shape.
    #[error("unexpected shape for {what}: {reason}")]
    Malformed { what: String, reason: String },
}

impl BridgeError {
    /// Failures that justify dropping the cached debugger address and trying once more.
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::Transport(_) | BridgeError::Protocol(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BridgeError::NotFound { .. } | BridgeError::FileNotFound(_)
        )
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, BridgeError::Malformed { .. })
    }

    /// Numeric status carried by remote-side failures, when there is one.
    pub fn status(&self) -> Option<i64> {
        match self {
            BridgeError::Api { status, .. } => Some(*status),
            BridgeError::Remote { status, .. } => *status,
            BridgeError::FileNotFound(_) => Some(404),
            _ => None,
        }
    }
}
