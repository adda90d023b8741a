//! Calendar API types and data structures.

use serde::{Deserialize, Serialize};

use agenda_core::CalendarConfig;
use agenda_store::AppointmentDetails;

/// Event body sent on create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub start: EventDateTime,
    pub end: EventDateTime,
    pub attendees: Vec<EventAttendee>,
    pub reminders: EventReminders,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    /// RFC 3339 instant
    pub date_time: String,
    pub time_zone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventAttendee {
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventReminders {
    pub use_default: bool,
    pub overrides: Vec<ReminderOverride>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderOverride {
    pub method: String,
    pub minutes: u32,
}

impl EventPayload {
    /// Build the remote event for an appointment. The patient is invited
    /// when they have an email address.
    pub fn from_appointment(details: &AppointmentDetails, config: &CalendarConfig) -> Self {
        let appointment = &details.appointment;
        let time_zone = config.time_zone.tzid.clone();

        Self {
            summary: appointment.title.clone(),
            description: appointment.description.clone().filter(|d| !d.is_empty()),
            location: appointment.location.clone().filter(|l| !l.is_empty()),
            start: EventDateTime {
                date_time: appointment.start_time.to_rfc3339(),
                time_zone: time_zone.clone(),
            },
            end: EventDateTime {
                date_time: appointment.end_time.to_rfc3339(),
                time_zone,
            },
            attendees: details
                .patient
                .email
                .iter()
                .filter(|email| !email.is_empty())
                .map(|email| EventAttendee {
                    email: email.clone(),
                })
                .collect(),
            reminders: EventReminders {
                use_default: false,
                overrides: config
                    .reminders
                    .iter()
                    .map(|r| ReminderOverride {
                        method: r.method.clone(),
                        minutes: r.minutes,
                    })
                    .collect(),
            },
        }
    }
}

/// Calendar metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Calendar {
    pub id: String,
    pub summary: String,
    pub time_zone: Option<String>,
    pub is_primary: bool,
    pub access_role: AccessRole,
}

/// Calendar access role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum AccessRole {
    Owner,
    Writer,
    #[default]
    Reader,
    FreeBusyReader,
}

impl AccessRole {
    pub fn can_write(&self) -> bool {
        matches!(self, Self::Owner | Self::Writer)
    }
}

// API Response Types

/// Google Calendar API event response. Only the id is needed.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEvent {
    pub id: String,
    pub status: Option<String>,
    pub html_link: Option<String>,
}

/// API response for calendar list.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarListResponse {
    #[serde(default)]
    pub items: Vec<ApiCalendar>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCalendar {
    pub id: String,
    pub summary: Option<String>,
    pub time_zone: Option<String>,
    #[serde(default)]
    pub primary: bool,
    pub access_role: Option<String>,
}

impl From<ApiCalendar> for Calendar {
    fn from(api: ApiCalendar) -> Self {
        let access_role = match api.access_role.as_deref() {
            Some("owner") => AccessRole::Owner,
            Some("writer") => AccessRole::Writer,
            Some("reader") => AccessRole::Reader,
            Some("freeBusyReader") => AccessRole::FreeBusyReader,
            _ => AccessRole::Reader,
        };

        Self {
            id: api.id,
            summary: api.summary.unwrap_or_default(),
            time_zone: api.time_zone,
            is_primary: api.primary,
            access_role,
        }
    }
}
