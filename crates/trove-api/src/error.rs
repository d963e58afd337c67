//! Error types for the Trove API client.
//!
//! Every call through the executor resolves to either a decoded response or a
//! `ClientError`. The executor deliberately does *not* retry on its own —
//! retry policy belongs to callers, which classify these errors into their own
//! taxonomies (see `trove-publish`). The single exception is the 401 path,
//! which the executor resolves locally via token refresh before surfacing
//! `Unauthenticated`.

/// A specialized `Result` type for API client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by [`crate::ApiClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The endpoint could not be joined onto the configured base URL.
    #[error("invalid request URL: {0}")]
    InvalidUrl(String),

    /// The transport layer failed before an HTTP status was obtained.
    #[error("network failure: {0}")]
    Network(#[source] reqwest::Error),

    /// The server answered with a non-2xx status other than 401.
    #[error("HTTP error {status}")]
    Http {
        /// The HTTP status code returned by the server.
        status: u16,
    },

    /// No usable credentials: either no token was held for a call that
    /// requires one, or a refresh was attempted and failed.
    #[error("session is not authenticated")]
    Unauthenticated,

    /// The response body did not match the expected shape.
    #[error("failed to decode response body: {0}")]
    Decoding(#[source] serde_json::Error),
}

impl ClientError {
    /// Returns `true` if the failure happened below the HTTP layer and the
    /// same request can be retried without risk of state corruption.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Returns the HTTP status code, if the server produced one.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status } => Some(*status),
            _ => None,
        }
    }
}
