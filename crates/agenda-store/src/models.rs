//! Clinic records the calendar engine reads and updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when a stored enum value is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// External calendar provider. Only Google exists today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarProvider {
    Google,
}

string_enum!(CalendarProvider, "calendar provider", { Google => "google" });

/// Credential state of an integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrationStatus {
    /// Token valid or refreshable
    Active,
    /// Refresh failed; only a fresh authorization leaves this state
    Error,
    /// Disconnected by the user
    Disabled,
}

string_enum!(IntegrationStatus, "integration status", {
    Active => "ACTIVE",
    Error => "ERROR",
    Disabled => "DISABLED",
});

/// Scheduling lifecycle of an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

string_enum!(AppointmentStatus, "appointment status", {
    Scheduled => "SCHEDULED",
    Confirmed => "CONFIRMED",
    Cancelled => "CANCELLED",
    Completed => "COMPLETED",
    NoShow => "NO_SHOW",
});

impl AppointmentStatus {
    /// Statuses included in a patient's calendar export.
    pub const PATIENT_EXPORT: [AppointmentStatus; 2] =
        [AppointmentStatus::Scheduled, AppointmentStatus::Confirmed];

    /// Statuses included in a date range export.
    pub const RANGE_EXPORT: [AppointmentStatus; 3] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Completed,
    ];
}

/// Whether an appointment's remote event reflects local data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    #[default]
    Pending,
    Synced,
    Failed,
}

string_enum!(SyncStatus, "sync status", {
    Pending => "PENDING",
    Synced => "SYNCED",
    Failed => "FAILED",
});

/// Stored OAuth credential linking a user to an external calendar account.
#[derive(Clone, Serialize, Deserialize)]
pub struct CalendarIntegration {
    pub id: String,
    pub user_id: String,
    pub provider: CalendarProvider,
    pub access_token: String,
    pub refresh_token: String,
    pub token_expiry: DateTime<Utc>,
    pub is_active: bool,
    pub sync_status: IntegrationStatus,
    pub sync_error: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub calendar_id: Option<String>,
    pub calendar_name: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CalendarIntegration {
    /// A token expiring exactly now counts as expired.
    pub fn is_token_expired(&self, now: DateTime<Utc>) -> bool {
        self.token_expiry <= now
    }

    /// Remote calendar to write events into.
    pub fn target_calendar(&self) -> &str {
        self.calendar_id.as_deref().unwrap_or("primary")
    }
}

// Tokens stay out of logs.
impl fmt::Debug for CalendarIntegration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalendarIntegration")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("provider", &self.provider)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_expiry", &self.token_expiry)
            .field("is_active", &self.is_active)
            .field("sync_status", &self.sync_status)
            .field("sync_error", &self.sync_error)
            .field("last_sync_at", &self.last_sync_at)
            .field("calendar_id", &self.calendar_id)
            .finish_non_exhaustive()
    }
}

/// Fields written when a fresh authorization replaces an integration.
#[derive(Clone)]
pub struct NewIntegration {
    pub user_id: String,
    pub provider: CalendarProvider,
    pub access_token: String,
    pub refresh_token: String,
    pub token_expiry: DateTime<Utc>,
}

/// Remote account details discovered after authorization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountDetails {
    pub calendar_id: Option<String>,
    pub calendar_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,
    pub full_name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub user_id: String,
    pub patient_id: String,
    pub google_event_id: Option<String>,
    pub sync_status: SyncStatus,
    pub sync_error: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// An appointment joined with its owner and patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentDetails {
    pub appointment: Appointment,
    pub owner: User,
    pub patient: Patient,
}

/// Change to an appointment's sync fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncUpdate {
    /// Remote event created or updated.
    Synced {
        remote_event_id: String,
        at: DateTime<Utc>,
    },
    /// Remote call failed. The stored remote id is left as is.
    Failed { error: String },
    /// Remote event removed, or link dropped by disconnect.
    Cleared { at: Option<DateTime<Utc>> },
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [
            AppointmentStatus::Scheduled,
            AppointmentStatus::Confirmed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::Completed,
            AppointmentStatus::NoShow,
        ] {
            assert_eq!(status.as_str().parse::<AppointmentStatus>().unwrap(), status);
        }
        assert_eq!(AppointmentStatus::NoShow.as_str(), "NO_SHOW");
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let err = "LATE".parse::<SyncStatus>().unwrap_err();
        assert_eq!(err.kind, "sync status");
        assert_eq!(err.value, "LATE");
    }

    #[test]
    fn test_token_expired_at_boundary() {
        let now = Utc::now();
        let integration = CalendarIntegration {
            id: "int-1".into(),
            user_id: "user-1".into(),
            provider: CalendarProvider::Google,
            access_token: "secret-access".into(),
            refresh_token: "secret-refresh".into(),
            token_expiry: now,
            is_active: true,
            sync_status: IntegrationStatus::Active,
            sync_error: None,
            last_sync_at: None,
            calendar_id: None,
            calendar_name: None,
            email: None,
            created_at: now,
            updated_at: now,
        };

        assert!(integration.is_token_expired(now));
        assert!(!integration.is_token_expired(now - Duration::seconds(1)));
        assert_eq!(integration.target_calendar(), "primary");

        let debug = format!("{:?}", integration);
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
    }
}
