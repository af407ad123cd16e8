//! Error types for the external food database client.
//!
//! Every call into the third-party API resolves to an [`ExternalResult`]. The
//! variants separate the failure classes that callers apply different policy
//! to: transport problems are reported as-is, business and HTTP failures move
//! the client to the next account, validation failures never reach the
//! network.

use thiserror::Error;

/// Failures surfaced by the external food database client.
#[derive(Debug, Error)]
pub enum ExternalApiError {
    /// The external API is switched off by configuration.
    #[error("external food api is disabled")]
    Disabled,

    /// The request was rejected locally before any network call.
    #[error("invalid request: {0}")]
    Validation(String),

    /// No access token could be obtained for the account.
    #[error("authentication failed for account {account}: {message}")]
    Auth { account: usize, message: String },

    /// The upstream answered 200 but flagged the call as failed (`success: 0`).
    #[error("upstream rejected request: {message}")]
    Business { message: String },

    /// The upstream answered with a non-success HTTP status.
    #[error("upstream returned HTTP {status}: {message}")]
    Http {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    /// Connection failure, timeout, or unreadable body.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The upstream body was not the JSON we expected.
    #[error("malformed upstream response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Every configured account was tried and each one looked exhausted.
    #[error("all {attempts} accounts exhausted")]
    QuotaExhausted { attempts: usize },

    /// Missing or inconsistent client configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ExternalApiError {
    /// Whether this failure should move the search loop to the next account.
    ///
    /// Transport and decode errors do not rotate: a timeout says nothing about
    /// the account's quota.
    pub fn rotates_account(&self) -> bool {
        matches!(
            self,
            ExternalApiError::Auth { .. }
                | ExternalApiError::Business { .. }
                | ExternalApiError::Http { .. }
        )
    }

    /// Whether this failure was a client-side timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExternalApiError::Transport(e) if e.is_timeout())
    }
}

/// Result type for external API operations.
pub type ExternalResult<T> = std::result::Result<T, ExternalApiError>;
