//! Error types for session lifecycle operations

use crate::store::StoreError;

/// Errors from the token lifecycle manager.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] oidc_auth::Error),

    #[error("credential store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(#[from] common::Error),

    #[error("token lifecycle manager has stopped")]
    Stopped,
}

impl From<oidc_auth::RedirectError> for Error {
    fn from(e: oidc_auth::RedirectError) -> Self {
        Self::Auth(e.into())
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
