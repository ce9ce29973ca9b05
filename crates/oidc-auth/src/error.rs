//! Error types for the authorization-code flow

use thiserror::Error;

/// Failures while correlating a browser redirect with its authorization
/// request. The flow is aborted and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RedirectError {
    #[error("user cancelled or browser failed: {0}")]
    UserCancelledOrBrowserError(String),

    #[error("malformed redirect: {0}")]
    MalformedRedirect(String),

    #[error("state parameter does not match the authorization request")]
    StateMismatch,

    #[error("redirect carries no authorization code")]
    MissingCode,
}

/// Claim-level rejection of an ID token. The token is discarded, never
/// persisted and never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdTokenValidationError {
    #[error("ID token has no issuer")]
    MissingIssuer,

    #[error("incorrect issuer: {0}")]
    IncorrectIssuer(String),

    #[error("missing audience: {0}")]
    MissingAudience(String),

    #[error("untrusted audiences: {0}")]
    UntrustedAudiences(String),

    #[error("authorized party missing: {0}")]
    AuthorizedPartyMissing(String),

    #[error("authorized party mismatch: {0}")]
    AuthorizedPartyMismatch(String),

    #[error("ID token has no expiration time")]
    ExpirationTimeMissing,

    #[error("expired: {0}")]
    Expired(String),

    #[error("missing issue time: {0}")]
    MissingIssueTime(String),
}

/// Errors from authorization, token endpoint and ID token handling.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Redirect(#[from] RedirectError),

    #[error("ID token rejected: {0}")]
    Validation(#[from] IdTokenValidationError),

    #[error("ID token could not be decoded: {0}")]
    IdTokenDecode(String),

    /// Non-200 response or transport failure. `status` is `None` when no
    /// response was received at all.
    #[error("unsuccessful response{}: {message}", status_suffix(.status))]
    UnsuccessfulResponse { status: Option<u16>, message: String },

    #[error("request encoding failed: {0}")]
    Encoding(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
