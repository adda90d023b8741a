//! Persistence interface consumed by the calendar engine.
//!
//! The engine only talks to storage through [`Store`], so tests and other
//! deployments can substitute their own implementation. [`crate::SqliteStore`]
//! is the bundled one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use agenda_core::DatabaseError;

use crate::models::{
    AccountDetails, AppointmentDetails, AppointmentStatus, CalendarIntegration, CalendarProvider,
    NewIntegration, Patient, SyncUpdate,
};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, DatabaseError>;

/// Filter for date range queries. Bounds are inclusive on `start_time`.
#[derive(Debug, Clone)]
pub struct RangeQuery<'a> {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub user_id: Option<&'a str>,
    pub statuses: &'a [AppointmentStatus],
}

#[async_trait]
pub trait Store: Send + Sync {
    // Integrations

    /// The active integration for (user, provider), if any.
    async fn find_active_integration(
        &self,
        user_id: &str,
        provider: CalendarProvider,
    ) -> StoreResult<Option<CalendarIntegration>>;

    /// The integration for (user, provider) regardless of state.
    async fn find_integration(
        &self,
        user_id: &str,
        provider: CalendarProvider,
    ) -> StoreResult<Option<CalendarIntegration>>;

    /// Insert or hard-replace the (user, provider) integration.
    ///
    /// The replacement is a single statement, so there is never a moment
    /// with zero or two rows for the pair.
    async fn upsert_integration(&self, new: &NewIntegration) -> StoreResult<CalendarIntegration>;

    async fn update_integration_tokens(
        &self,
        integration_id: &str,
        access_token: &str,
        refresh_token: &str,
        token_expiry: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Move the integration to `ERROR` with a message.
    async fn mark_integration_error(&self, integration_id: &str, message: &str)
        -> StoreResult<()>;

    /// Set `is_active = false` and `DISABLED`. Returns whether a row changed.
    async fn deactivate_integration(
        &self,
        user_id: &str,
        provider: CalendarProvider,
    ) -> StoreResult<bool>;

    async fn record_integration_sync(
        &self,
        integration_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn update_integration_account(
        &self,
        integration_id: &str,
        details: &AccountDetails,
    ) -> StoreResult<()>;

    // Appointments

    async fn find_appointment(&self, appointment_id: &str)
        -> StoreResult<Option<AppointmentDetails>>;

    async fn find_patient(&self, patient_id: &str) -> StoreResult<Option<Patient>>;

    /// A patient's appointments with a status in `statuses`, by start time.
    async fn find_appointments_by_patient(
        &self,
        patient_id: &str,
        statuses: &[AppointmentStatus],
    ) -> StoreResult<Vec<AppointmentDetails>>;

    /// Appointments starting within the range, by start time.
    async fn find_appointments_by_range(
        &self,
        query: &RangeQuery<'_>,
    ) -> StoreResult<Vec<AppointmentDetails>>;

    /// Write the sync fields of one appointment.
    async fn update_appointment_sync(
        &self,
        appointment_id: &str,
        update: &SyncUpdate,
    ) -> StoreResult<()>;

    /// Clear the remote id and reset to `PENDING` for every appointment the
    /// user owns. Returns the number of appointments touched.
    async fn reset_user_appointment_sync(&self, user_id: &str) -> StoreResult<u64>;
}
