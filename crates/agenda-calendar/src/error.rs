//! Calendar gateway error types.

use agenda_core::{EngineError, NetworkError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalendarError {
    /// 401: the access token was not accepted.
    #[error("Access token rejected")]
    TokenRejected,

    /// 403: the account may not write to the calendar.
    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid event data: {0}")]
    InvalidEventData(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),
}

impl CalendarError {
    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> String {
        match self {
            Self::TokenRejected => {
                "Google Calendar rejected the credentials. Please reconnect.".to_string()
            }
            Self::Forbidden(_) => "This account cannot edit the selected calendar.".to_string(),
            Self::RateLimited(secs) => format!("Too many requests. Please wait {} seconds.", secs),
            Self::NotFound(_) => "The calendar event no longer exists.".to_string(),
            Self::InvalidEventData(msg) => format!("Invalid event: {}", msg),
            Self::ApiError(msg) => format!("Calendar error: {}", msg),
            Self::Network(e) => e.user_message().to_string(),
        }
    }

    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited(_) => true,
            Self::Network(NetworkError::InvalidResponse(_)) => false,
            Self::Network(_) => true,
            Self::ApiError(_) => true,
            _ => false,
        }
    }
}

impl From<CalendarError> for EngineError {
    fn from(err: CalendarError) -> Self {
        match err {
            CalendarError::Network(e) => e.into(),
            other => EngineError::Gateway(other.to_string()),
        }
    }
}
