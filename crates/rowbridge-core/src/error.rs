//! Error taxonomy shared by the lookup and scan paths.
//!
//! Caches and the scan driver absorb [`ConnectorError::TransientStore`]
//! failures through retry. Everything else propagates to the caller
//! unchanged; deciding whether to restart, skip or abort is the host
//! engine's job.

use crate::error_codes;

/// Errors surfaced by lookup executors, caches and scan drivers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectorError {
    /// Invalid setup: bad key arity, unresolved restore column, nested key.
    #[error("[{code}] configuration error: {0}", code = error_codes::INVALID_CONFIG)]
    Configuration(String),

    /// The store could not serve a query within the retry budget.
    #[error(
        "[{code}] source unavailable after {attempts} attempt(s): {reason}",
        code = error_codes::SOURCE_UNAVAILABLE
    )]
    SourceUnavailable {
        /// Number of round trips attempted, including the first.
        attempts: u32,
        /// Last error reported by the store.
        reason: String,
    },

    /// A retryable store failure (timeout, dropped connection).
    #[error("[{code}] transient store error: {0}", code = error_codes::TRANSIENT_STORE)]
    TransientStore(String),

    /// The restore column decreased while scanning.
    #[error(
        "[{code}] restore column '{column}' decreased from {previous} to {current}",
        code = error_codes::MONOTONICITY_VIOLATION
    )]
    MonotonicityViolation {
        /// Restore column name.
        column: String,
        /// Last value emitted before the violation.
        previous: String,
        /// Offending value.
        current: String,
    },

    /// Operation is not valid in the component's current state.
    #[error("[{code}] invalid state: {0}", code = error_codes::INVALID_STATE)]
    InvalidState(String),

    /// Row or checkpoint (de)serialization failed.
    #[error("[{code}] codec error: {0}", code = error_codes::CODEC_FAILURE)]
    Codec(String),
}

impl ConnectorError {
    /// Stable `RBR-NNNN` code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => error_codes::INVALID_CONFIG,
            Self::SourceUnavailable { .. } => error_codes::SOURCE_UNAVAILABLE,
            Self::TransientStore(_) => error_codes::TRANSIENT_STORE,
            Self::MonotonicityViolation { .. } => error_codes::MONOTONICITY_VIOLATION,
            Self::InvalidState(_) => error_codes::INVALID_STATE,
            Self::Codec(_) => error_codes::CODEC_FAILURE,
        }
    }

    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStore(_))
    }

    /// Shorthand for [`ConnectorError::Configuration`].
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = ConnectorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_carries_code() {
        let err = ConnectorError::config("unknown restore column name: ts");
        assert_eq!(err.code(), "RBR-0001");
        assert_eq!(
            err.to_string(),
            "[RBR-0001] configuration error: unknown restore column name: ts"
        );
    }

    #[test]
    fn test_source_unavailable_display() {
        let err = ConnectorError::SourceUnavailable {
            attempts: 4,
            reason: "connection refused".into(),
        };
        assert!(err.to_string().contains("after 4 attempt(s)"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(ConnectorError::TransientStore("reset".into()).is_retryable());
        assert!(!ConnectorError::Codec("bad json".into()).is_retryable());
        assert!(!ConnectorError::MonotonicityViolation {
            column: "id".into(),
            previous: "3".into(),
            current: "2".into(),
        }
        .is_retryable());
    }
}
