use crate::fingerprint::IdentityMismatch;
use crate::types::Role;

/// Transport, storage and configuration failures.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("identity service {operation} failed (status {status:?}): {detail}")]
    Identity {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("Session storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("unknown role: {0}")]
    UnknownRole(String),
}

/// Outcomes of login, switch and logout operations.
///
/// `IdentityMismatch` is diagnostic: by default it is only logged and the
/// switch commits with the server-confirmed profile. It is returned as an
/// error only when strict identity checking is enabled.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Token rejected by the identity service")]
    InvalidToken,

    #[error("Account role {actual:?} does not match requested role {expected}")]
    RoleMismatch {
        expected: Role,
        actual: Option<Role>,
    },

    #[error("No session stored for role {0}")]
    NoSessionForRole(Role),

    #[error("A role switch is already in progress")]
    SwitchInProgress,

    #[error("Stored session for role {0} is no longer valid")]
    StaleSession(Role),

    #[error("Identity mismatch: {0}")]
    IdentityMismatch(IdentityMismatch),

    #[error(transparent)]
    Service(#[from] Error),
}

impl AuthError {
    /// Whether the identity service rejected the credential itself, as
    /// opposed to failing to answer.
    #[must_use]
    pub fn is_token_rejection(&self) -> bool {
        matches!(self, Self::InvalidToken | Self::Service(Error::Timeout(_)))
    }
}
