//! Error taxonomy for the publishing pipeline.
//!
//! Every failure surfaced to the UI layer is collapsed into one of these
//! variants so the session screen can decide between "retry in place",
//! "re-capture", and "sign in again" without inspecting transport details.

use trove_api::ClientError;

/// Result alias for publishing operations.
pub type Result<T> = std::result::Result<T, PublishError>;

// ============================================================================
// Error Types
// ============================================================================

/// Failures that can end a publishing stage.
///
/// Variants are [`Clone`] + [`PartialEq`] so a terminal error can be stored on
/// the session snapshot and compared in tests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// A connection-level failure. Nothing was durably decided server-side
    /// (or the decision is replay-safe), so the same stage may be retried.
    #[error("network failure: {0}")]
    TransientNetwork(String),

    /// Credentials are gone and could not be refreshed. The user must sign
    /// in again before any further pipeline work.
    #[error("session expired, sign in required")]
    Unauthenticated,

    /// The input itself was rejected. Retrying the same stage with the same
    /// input cannot succeed.
    #[error("input rejected: {0}")]
    ValidationFailure(String),

    /// The server's verification of uploaded bytes disagreed with the local
    /// checksums. The named roles must be transferred again.
    #[error("server-side integrity check failed for {roles:?}")]
    IntegrityMismatch {
        /// Wire names of the file and image roles that failed verification.
        roles: Vec<String>,
    },

    /// A business-level rejection from the server.
    #[error("server rejected the request: {reason}")]
    ServerRejected {
        /// HTTP status of the rejection, or 0 when no status applies
        /// (for example an unreadable response body).
        status: u16,
        /// Human-readable description of the rejection.
        reason: String,
    },

    /// The user discarded the session while a cancellable stage was running.
    #[error("publishing cancelled")]
    Cancelled,

    /// The requested operation is not legal from the session's current stage.
    #[error("cannot {action} while {stage}")]
    InvalidTransition {
        /// Name of the stage the session was in.
        stage: &'static str,
        /// The operation that was attempted.
        action: &'static str,
    },
}

impl PublishError {
    /// Whether retrying the same stage without new input can plausibly
    /// succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork(_)
                | Self::IntegrityMismatch { .. }
                | Self::ServerRejected { .. }
        )
    }

    /// Whether this failure invalidates the whole authenticated session
    /// rather than just the current stage.
    #[must_use]
    pub const fn is_session_fatal(&self) -> bool {
        matches!(self, Self::Unauthenticated)
    }
}

impl From<ClientError> for PublishError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Network(source) => Self::TransientNetwork(source.to_string()),
            ClientError::Unauthenticated => Self::Unauthenticated,
            ClientError::Http { status } => Self::ServerRejected {
                status,
                reason: format!("HTTP {status}"),
            },
            ClientError::Decoding(source) => Self::ServerRejected {
                status: 0,
                reason: format!("unreadable response body: {source}"),
            },
            ClientError::InvalidUrl(url) => Self::ValidationFailure(format!("invalid URL: {url}")),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
