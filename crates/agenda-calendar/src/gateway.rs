//! Remote calendar API seen by the sync engine.

use async_trait::async_trait;

use crate::error::CalendarError;
use crate::types::{Calendar, EventPayload};

/// Remote calendar operations. Every call takes an already-valid access token.
#[async_trait]
pub trait CalendarGateway: Send + Sync {
    async fn list_calendars(&self, access_token: &str) -> Result<Vec<Calendar>, CalendarError>;

    /// Create an event and return its remote id.
    async fn create_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        payload: &EventPayload,
    ) -> Result<String, CalendarError>;

    async fn update_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        remote_id: &str,
        payload: &EventPayload,
    ) -> Result<(), CalendarError>;

    /// Delete an event. An event that is already gone counts as deleted.
    async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        remote_id: &str,
    ) -> Result<(), CalendarError>;
}
