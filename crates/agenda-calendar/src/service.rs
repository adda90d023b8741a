//! Entry point for the route layer.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use agenda_auth::{GoogleOAuth2Provider, TokenEndpoint, TokenManager};
use agenda_core::{CalendarConfig, Config, EngineError, EngineResult};
use agenda_store::{AccountDetails, CalendarIntegration, IntegrationStatus, Store};

use crate::client::GoogleCalendarClient;
use crate::export::{IcsExport, IcsExporter};
use crate::gateway::CalendarGateway;
use crate::ics::IcsSerializer;
use crate::locks::SyncLocks;
use crate::sync::{SyncEngine, SyncOutcome};
use crate::types::Calendar;

/// Connection state reported to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationStatusView {
    pub connected: bool,
    pub status: Option<IntegrationStatus>,
    pub email: Option<String>,
    pub calendar_name: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl IntegrationStatusView {
    fn disconnected() -> Self {
        Self {
            connected: false,
            status: None,
            email: None,
            calendar_name: None,
            last_sync_at: None,
            error: None,
        }
    }
}

impl From<&CalendarIntegration> for IntegrationStatusView {
    fn from(integration: &CalendarIntegration) -> Self {
        Self {
            connected: integration.is_active,
            status: Some(integration.sync_status),
            email: integration.email.clone(),
            calendar_name: integration.calendar_name.clone(),
            last_sync_at: integration.last_sync_at,
            error: integration.sync_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectOutcome {
    pub was_connected: bool,
    pub appointments_reset: u64,
}

pub struct CalendarService {
    store: Arc<dyn Store>,
    tokens: Arc<TokenManager>,
    gateway: Arc<dyn CalendarGateway>,
    locks: Arc<SyncLocks>,
    sync: SyncEngine,
    exporter: IcsExporter,
}

impl CalendarService {
    pub fn new(
        store: Arc<dyn Store>,
        endpoint: Arc<dyn TokenEndpoint>,
        gateway: Arc<dyn CalendarGateway>,
        config: CalendarConfig,
    ) -> Self {
        let tokens = Arc::new(TokenManager::new(store.clone(), endpoint));
        let locks = Arc::new(SyncLocks::new());
        let sync = SyncEngine::new(
            store.clone(),
            tokens.clone(),
            gateway.clone(),
            locks.clone(),
            config.clone(),
        );
        let exporter = IcsExporter::new(store.clone(), IcsSerializer::new(config));

        Self {
            store,
            tokens,
            gateway,
            locks,
            sync,
            exporter,
        }
    }

    /// Wire the Google identity endpoint and Calendar API from configuration.
    pub fn from_config(config: &Config, store: Arc<dyn Store>) -> EngineResult<Self> {
        let timeout = Duration::from_secs(config.calendar.request_timeout_secs);
        let endpoint = GoogleOAuth2Provider::new(&config.google, timeout)?;
        let gateway = GoogleCalendarClient::new(&config.google, timeout)?;

        Ok(Self::new(
            store,
            Arc::new(endpoint),
            Arc::new(gateway),
            config.calendar.clone(),
        ))
    }

    pub fn authorization_url(&self, user_id: &str) -> String {
        self.tokens.authorization_url(user_id)
    }

    /// Finish the OAuth flow. `state` carries the user id.
    #[tracing::instrument(skip(self, code), level = "info")]
    pub async fn handle_callback(
        &self,
        code: &str,
        state: &str,
    ) -> EngineResult<CalendarIntegration> {
        let user_id = state.trim();
        if user_id.is_empty() {
            return Err(EngineError::AuthExchange(
                "callback is missing the state parameter".to_string(),
            ));
        }

        let grant = self.tokens.exchange_code(code).await?;
        let refresh_token = grant.refresh_token.clone().unwrap_or_default();
        let mut integration = self
            .tokens
            .save_credential(user_id, &grant.access_token, &refresh_token, grant.expires_at)
            .await?;

        // Account details are cosmetic; a failure here does not undo the link.
        match self.gateway.list_calendars(&grant.access_token).await {
            Ok(calendars) => {
                if let Some(primary) = calendars.into_iter().find(|c| c.is_primary) {
                    let details = AccountDetails {
                        calendar_id: Some(primary.id.clone()),
                        calendar_name: Some(primary.summary),
                        email: Some(primary.id),
                    };
                    match self
                        .store
                        .update_integration_account(&integration.id, &details)
                        .await
                    {
                        Ok(()) => {
                            integration.calendar_id = details.calendar_id;
                            integration.calendar_name = details.calendar_name;
                            integration.email = details.email;
                        }
                        Err(e) => tracing::warn!(
                            "Could not store calendar details for user {}: {}",
                            user_id,
                            e
                        ),
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Could not read calendars for user {}: {}", user_id, e);
            }
        }

        tracing::info!("Google Calendar connected for user {}", user_id);
        Ok(integration)
    }

    pub async fn integration_status(&self, user_id: &str) -> EngineResult<IntegrationStatusView> {
        Ok(match self.tokens.integration(user_id).await? {
            Some(integration) => IntegrationStatusView::from(&integration),
            None => IntegrationStatusView::disconnected(),
        })
    }

    pub async fn list_calendars(&self, user_id: &str) -> EngineResult<Vec<Calendar>> {
        let token = self.tokens.valid_access_token(user_id).await?;
        Ok(self.gateway.list_calendars(&token).await?)
    }

    /// Deactivate the integration and unlink every appointment of the user.
    /// Remote events are left in place.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn disconnect(&self, user_id: &str) -> EngineResult<DisconnectOutcome> {
        let _user = self.locks.write_user(user_id).await;

        let was_connected = self.tokens.disconnect(user_id).await?;
        let appointments_reset = self.sync.reset_user(user_id).await?;

        Ok(DisconnectOutcome {
            was_connected,
            appointments_reset,
        })
    }

    pub async fn sync(&self, appointment_id: &str) -> EngineResult<SyncOutcome> {
        self.sync.sync(appointment_id).await
    }

    pub async fn unsync(&self, appointment_id: &str) -> EngineResult<bool> {
        self.sync.unsync(appointment_id).await
    }

    pub async fn export_appointment_ics(&self, appointment_id: &str) -> EngineResult<IcsExport> {
        self.exporter.export_appointment(appointment_id).await
    }

    pub async fn export_patient_ics(&self, patient_id: &str) -> EngineResult<IcsExport> {
        self.exporter.export_patient(patient_id).await
    }

    pub async fn export_range_ics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        user_id: Option<&str>,
    ) -> EngineResult<IcsExport> {
        self.exporter.export_range(start, end, user_id).await
    }

    /// Range export over whole clinic-local days.
    pub async fn export_days_ics(
        &self,
        first: NaiveDate,
        last: NaiveDate,
        user_id: Option<&str>,
    ) -> EngineResult<IcsExport> {
        self.exporter.export_days(first, last, user_id).await
    }
}
