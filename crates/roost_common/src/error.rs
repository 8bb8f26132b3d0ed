use thiserror::Error;

use crate::types::NodeId;

/// Convenience alias for `Result<T, RoostError>`.
pub type RoostResult<T> = Result<T, RoostError>;

/// Error classification for escalation decisions.
///
/// - `Rejection`   — the caller's input was refused by policy; no retry
///   without operator intervention
/// - `Recoverable` — the operation degraded but the request succeeded
///   (diagnostics carry the detail)
/// - `Fatal`       — infrastructure failure; the handler aborts and the
///   transport surfaces a retryable error to the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Rejection,
    Recoverable,
    Fatal,
}

/// Top-level error type that all crate-specific errors convert into.
#[derive(Error, Debug)]
pub enum RoostError {
    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Node tracker errors.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("node {0} is not registered")]
    UnknownNode(NodeId),

    #[error("label update rejected: {0}")]
    LabelUpdate(String),

    #[error("attribute update rejected: {0}")]
    AttributeUpdate(String),

    #[error("secret key store unavailable: {0}")]
    KeyStore(String),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot parse config: {0}")]
    Parse(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl RoostError {
    /// Classify this error for escalation decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RoostError::Tracker(TrackerError::LabelUpdate(_)) => ErrorKind::Recoverable,
            RoostError::Tracker(TrackerError::AttributeUpdate(_)) => ErrorKind::Recoverable,
            RoostError::Tracker(TrackerError::UnknownNode(_)) => ErrorKind::Rejection,
            RoostError::Config(_) => ErrorKind::Rejection,
            RoostError::Tracker(TrackerError::KeyStore(_)) => ErrorKind::Fatal,
            RoostError::Io(_) => ErrorKind::Fatal,
            RoostError::Internal(_) => ErrorKind::Fatal,
        }
    }

    /// Returns true when the request itself succeeded but a side channel
    /// degraded; the handler keeps going and reports via diagnostics.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Recoverable)
    }

    /// Returns true when the handler must abort.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Fatal)
    }

    /// Construct an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        RoostError::Internal(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;

    #[test]
    fn test_label_update_is_recoverable() {
        let e: RoostError = TrackerError::LabelUpdate("bad label".into()).into();
        assert_eq!(e.kind(), ErrorKind::Recoverable);
        assert!(e.is_recoverable());
        assert!(!e.is_fatal());
    }

    #[test]
    fn test_unknown_node_is_rejection() {
        let e: RoostError = TrackerError::UnknownNode(NodeId::new("h1", 8041)).into();
        assert_eq!(e.kind(), ErrorKind::Rejection);
    }

    #[test]
    fn test_key_store_is_fatal() {
        let e: RoostError = TrackerError::KeyStore("store offline".into()).into();
        assert!(e.is_fatal());
    }

    #[test]
    fn test_io_is_fatal() {
        let e: RoostError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(e.is_fatal());
    }

    #[test]
    fn test_display_includes_node() {
        let e: RoostError = TrackerError::UnknownNode(NodeId::new("h1", 8041)).into();
        assert!(e.to_string().contains("h1:8041"));
    }
}
