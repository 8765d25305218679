//! Errors raised by fact source connectors.

use serde::Serialize;

/// How a connector failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorErrorKind {
    /// Connectivity blip; safe to retry.
    Transient,
    /// The call did not answer in time; safe to retry.
    Timeout,
    /// Bad or expired credentials.
    Authentication,
    /// Authenticated but not allowed.
    Permission,
    /// The request itself was rejected.
    Query,
}

/// A failure reported by a fact source.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[error("connector {kind:?} error: {message}")]
pub struct ConnectorError {
    pub kind: ConnectorErrorKind,
    pub message: String,
}

impl ConnectorError {
    pub fn new(kind: ConnectorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::Transient, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::Timeout, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::Authentication, message)
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::Query, message)
    }

    /// Only connectivity and timeout failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ConnectorErrorKind::Transient | ConnectorErrorKind::Timeout
        )
    }
}
