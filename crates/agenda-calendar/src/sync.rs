//! Pushes appointments to the owner's remote calendar.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use agenda_auth::TokenManager;
use agenda_core::{CalendarConfig, EngineError, EngineResult};
use agenda_store::{AppointmentDetails, Store, SyncUpdate};

use crate::gateway::CalendarGateway;
use crate::locks::SyncLocks;
use crate::types::EventPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub remote_event_id: String,
    pub action: SyncAction,
}

/// Keeps an appointment's remote event in step with the local record.
///
/// Create or update is decided by the stored remote id alone, under the
/// appointment's lock, so one appointment never gets two remote events.
/// Failed calls are not retried; the appointment is left `FAILED` with the
/// error message and the caller decides what to do next.
pub struct SyncEngine {
    store: Arc<dyn Store>,
    tokens: Arc<TokenManager>,
    gateway: Arc<dyn CalendarGateway>,
    locks: Arc<SyncLocks>,
    config: CalendarConfig,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn Store>,
        tokens: Arc<TokenManager>,
        gateway: Arc<dyn CalendarGateway>,
        locks: Arc<SyncLocks>,
        config: CalendarConfig,
    ) -> Self {
        Self {
            store,
            tokens,
            gateway,
            locks,
            config,
        }
    }

    async fn load(&self, appointment_id: &str) -> EngineResult<AppointmentDetails> {
        self.store
            .find_appointment(appointment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Appointment", appointment_id))
    }

    #[tracing::instrument(skip(self), level = "info")]
    pub async fn sync(&self, appointment_id: &str) -> EngineResult<SyncOutcome> {
        let owner = self.load(appointment_id).await?.appointment.user_id;
        let _user = self.locks.read_user(&owner).await;
        let _appointment = self.locks.lock_appointment(appointment_id).await;

        // Re-read: another sync may have stored a remote id while we waited.
        let details = self.load(appointment_id).await?;

        match self.push(&details).await {
            Ok(outcome) => {
                tracing::info!(
                    "Appointment {} synced ({:?}) as {}",
                    appointment_id,
                    outcome.action,
                    outcome.remote_event_id
                );
                Ok(outcome)
            }
            Err(err) => {
                tracing::warn!("Sync of appointment {} failed: {}", appointment_id, err);
                let update = SyncUpdate::Failed {
                    error: err.to_string(),
                };
                if let Err(record_err) = self
                    .store
                    .update_appointment_sync(appointment_id, &update)
                    .await
                {
                    tracing::error!(
                        "Could not record sync failure for appointment {}: {}",
                        appointment_id,
                        record_err
                    );
                }
                Err(err)
            }
        }
    }

    async fn push(&self, details: &AppointmentDetails) -> EngineResult<SyncOutcome> {
        let appointment = &details.appointment;
        let integration = self.tokens.valid_integration(&appointment.user_id).await?;
        let calendar_id = integration.target_calendar();
        let payload = EventPayload::from_appointment(details, &self.config);

        let outcome = match &appointment.google_event_id {
            Some(remote_id) => {
                self.gateway
                    .update_event(&integration.access_token, calendar_id, remote_id, &payload)
                    .await?;
                SyncOutcome {
                    remote_event_id: remote_id.clone(),
                    action: SyncAction::Updated,
                }
            }
            None => {
                let remote_id = self
                    .gateway
                    .create_event(&integration.access_token, calendar_id, &payload)
                    .await?;
                SyncOutcome {
                    remote_event_id: remote_id,
                    action: SyncAction::Created,
                }
            }
        };

        let now = Utc::now();
        self.store
            .update_appointment_sync(
                &appointment.id,
                &SyncUpdate::Synced {
                    remote_event_id: outcome.remote_event_id.clone(),
                    at: now,
                },
            )
            .await?;

        if let Err(e) = self.store.record_integration_sync(&integration.id, now).await {
            tracing::warn!("Could not record last sync time for {}: {}", integration.id, e);
        }

        Ok(outcome)
    }

    /// Remove the appointment's remote event. Returns false when there was
    /// nothing to remove. A failed delete leaves the local record untouched.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn unsync(&self, appointment_id: &str) -> EngineResult<bool> {
        let owner = self.load(appointment_id).await?.appointment.user_id;
        let _user = self.locks.read_user(&owner).await;
        let _appointment = self.locks.lock_appointment(appointment_id).await;

        let details = self.load(appointment_id).await?;
        let appointment = &details.appointment;
        let Some(remote_id) = appointment.google_event_id.as_deref() else {
            tracing::debug!("Appointment {} has no remote event", appointment_id);
            return Ok(false);
        };

        let integration = self.tokens.valid_integration(&appointment.user_id).await?;
        self.gateway
            .delete_event(
                &integration.access_token,
                integration.target_calendar(),
                remote_id,
            )
            .await?;

        self.store
            .update_appointment_sync(
                appointment_id,
                &SyncUpdate::Cleared {
                    at: Some(Utc::now()),
                },
            )
            .await?;

        tracing::info!("Removed remote event {} of appointment {}", remote_id, appointment_id);
        Ok(true)
    }

    /// Drop every remote link of the user's appointments. Callers hold the
    /// user's write lock.
    pub async fn reset_user(&self, user_id: &str) -> EngineResult<u64> {
        let reset = self.store.reset_user_appointment_sync(user_id).await?;
        tracing::info!("Reset sync state of {} appointments for user {}", reset, user_id);
        Ok(reset)
    }
}
