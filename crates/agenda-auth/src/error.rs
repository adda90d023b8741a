use agenda_core::{DatabaseError, EngineError, NetworkError};
use thiserror::Error;

/// Errors from the OAuth credential lifecycle.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No active calendar integration for user {0}")]
    NotAuthenticated(String),

    /// The identity endpoint refused the authorization code.
    #[error("Authorization code exchange failed: {0}")]
    Exchange(String),

    /// The identity endpoint refused the refresh token.
    #[error("Token refresh rejected: {0}")]
    Refresh(String),

    /// The identity endpoint could not be reached or answered garbage.
    #[error("Token endpoint request failed: {0}")]
    Network(#[from] NetworkError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<AuthError> for EngineError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NotAuthenticated(user) => EngineError::NotAuthenticated(user),
            AuthError::Exchange(msg) => EngineError::AuthExchange(msg),
            AuthError::Refresh(msg) => EngineError::Refresh(msg),
            AuthError::Network(e) => e.into(),
            AuthError::Database(e) => EngineError::Database(e),
        }
    }
}
