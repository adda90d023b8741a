//! Error taxonomy for the agenda engine.
//!
//! Component crates keep their own error enums (`AuthError`, `CalendarError`)
//! and convert into [`EngineError`], which is what the route layer sees.
//! `user_message()` gives UI-safe text, `http_status()` a status hint.

use thiserror::Error;

/// Result alias used by the engine's public operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No active calendar integration exists for the user.
    #[error("No active calendar integration for user {0}")]
    NotAuthenticated(String),

    /// The authorization code could not be exchanged.
    #[error("Authorization code exchange failed: {0}")]
    AuthExchange(String),

    /// The refresh token was rejected. Terminal until the user re-authorizes.
    #[error("Access token refresh failed: {0}")]
    Refresh(String),

    /// The remote calendar API call failed.
    #[error("Calendar gateway error: {0}")]
    Gateway(String),

    /// A network call exceeded its time bound.
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// An export query matched nothing.
    #[error("{0}")]
    EmptyResult(String),

    /// An appointment is missing data required to render it.
    #[error("Cannot serialize appointment: {0}")]
    SerializationPrecondition(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Returns a user-friendly message suitable for display in the UI.
    pub fn user_message(&self) -> &'static str {
        match self {
            EngineError::NotAuthenticated(_) => {
                "Google Calendar is not connected. Please connect your account."
            }
            EngineError::AuthExchange(_) => "Google sign-in failed. Please try again.",
            EngineError::Refresh(_) => {
                "Your Google Calendar access has expired. Please reconnect your account."
            }
            EngineError::Gateway(_) => "Google Calendar request failed. Please try again.",
            EngineError::Timeout(_) => "Google Calendar took too long to respond. Please try again.",
            EngineError::NotFound { .. } => "The requested record was not found.",
            EngineError::EmptyResult(_) => "No appointments found for this export.",
            EngineError::SerializationPrecondition(_) => {
                "This appointment is incomplete and cannot be exported."
            }
            EngineError::Database(e) => e.user_message(),
            EngineError::Config(e) => e.user_message(),
        }
    }

    /// Whether a caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Gateway(_) | EngineError::Timeout(_))
    }

    /// HTTP status the route layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::NotFound { .. } | EngineError::EmptyResult(_) => 404,
            EngineError::NotAuthenticated(_) | EngineError::Refresh(_) => 401,
            EngineError::AuthExchange(_) | EngineError::SerializationPrecondition(_) => 400,
            EngineError::Timeout(_) => 504,
            EngineError::Gateway(_) => 502,
            EngineError::Database(_) | EngineError::Config(_) => 500,
        }
    }
}

impl From<NetworkError> for EngineError {
    fn from(err: NetworkError) -> Self {
        match err {
            NetworkError::Timeout(msg) => EngineError::Timeout(msg),
            other => EngineError::Gateway(other.to_string()),
        }
    }
}

/// Network-related errors (HTTP, connectivity).
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl NetworkError {
    pub fn user_message(&self) -> &'static str {
        match self {
            NetworkError::ConnectionFailed(_) => {
                "Unable to connect. Check your internet connection."
            }
            NetworkError::Timeout(_) => "The request timed out. Please try again.",
            NetworkError::ServerError { status, .. } if *status >= 500 => {
                "The server is experiencing issues. Please try again later."
            }
            NetworkError::ServerError { .. } => "The request failed. Please try again.",
            NetworkError::InvalidResponse(_) => {
                "Received an unexpected response. Please try again."
            }
        }
    }
}

/// Database/storage errors (SQLite, local state).
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Data corruption detected: {0}")]
    Corruption(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),
}

impl DatabaseError {
    pub fn user_message(&self) -> &'static str {
        match self {
            DatabaseError::ConnectionFailed(_) => "Unable to access clinic data. Try again later.",
            DatabaseError::QueryFailed(_) => "A data operation failed. Please try again.",
            DatabaseError::Corruption(_) => "Stored data appears to be corrupted.",
            DatabaseError::Constraint(_) => "The change conflicts with existing data.",
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required setting: {0}")]
    MissingSetting(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
            ConfigError::MissingSetting(_) => "A required setting is missing. Check your settings.",
        }
    }
}

/// Extension trait for converting reqwest errors to our error types.
pub trait ReqwestErrorExt {
    fn into_network_error(self) -> NetworkError;
}

impl ReqwestErrorExt for reqwest::Error {
    fn into_network_error(self) -> NetworkError {
        if self.is_timeout() {
            NetworkError::Timeout(self.to_string())
        } else if self.is_connect() {
            NetworkError::ConnectionFailed(self.to_string())
        } else if self.is_decode() {
            NetworkError::InvalidResponse(self.to_string())
        } else if let Some(status) = self.status() {
            NetworkError::ServerError {
                status: status.as_u16(),
                message: self.to_string(),
            }
        } else {
            NetworkError::ConnectionFailed(self.to_string())
        }
    }
}

/// Extension trait for converting rusqlite errors to our error types.
pub trait RusqliteErrorExt {
    fn into_database_error(self) -> DatabaseError;
}

impl RusqliteErrorExt for rusqlite::Error {
    fn into_database_error(self) -> DatabaseError {
        match &self {
            rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("corrupt") => {
                DatabaseError::Corruption(self.to_string())
            }
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DatabaseError::Constraint(self.to_string())
            }
            _ => DatabaseError::QueryFailed(self.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_timeout_maps_to_timeout() {
        let err: EngineError = NetworkError::Timeout("30s elapsed".into()).into();
        assert!(matches!(err, EngineError::Timeout(_)));
        assert_eq!(err.http_status(), 504);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_network_failure_maps_to_gateway() {
        let err: EngineError = NetworkError::ServerError {
            status: 503,
            message: "unavailable".into(),
        }
        .into();
        assert!(matches!(err, EngineError::Gateway(_)));
        assert_eq!(err.http_status(), 502);
    }

    #[test]
    fn test_refresh_is_not_retryable() {
        let err = EngineError::Refresh("invalid_grant".into());
        assert!(!err.is_retryable());
        assert_eq!(err.http_status(), 401);
        assert!(err.user_message().contains("reconnect"));
    }

    #[test]
    fn test_empty_result_keeps_reason() {
        let err = EngineError::EmptyResult("No appointments in range".into());
        assert_eq!(err.to_string(), "No appointments in range");
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn test_not_found_display() {
        let err = EngineError::not_found("Appointment", "apt-1");
        assert_eq!(err.to_string(), "Appointment not found: apt-1");
    }

    #[test]
    fn test_database_error_conversion() {
        let err: EngineError = DatabaseError::QueryFailed("boom".into()).into();
        assert!(matches!(err, EngineError::Database(DatabaseError::QueryFailed(_))));
        assert_eq!(err.user_message(), "A data operation failed. Please try again.");
    }
}
