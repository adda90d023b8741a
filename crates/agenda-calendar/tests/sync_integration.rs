//! Integration tests for the sync engine behind CalendarService.
//!
//! The identity endpoint and calendar gateway are in-memory fakes; the store
//! is a real in-memory SQLite database.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use agenda_auth::{AuthError, TokenEndpoint, TokenGrant};
use agenda_calendar::{
    AccessRole, Calendar, CalendarError, CalendarGateway, CalendarService, EventPayload,
    SyncAction,
};
use agenda_core::{CalendarConfig, EngineError, NetworkError};
use agenda_store::{
    Appointment, AppointmentStatus, CalendarProvider, IntegrationStatus, NewIntegration, Patient,
    SqliteStore, Store, SyncStatus, User,
};

#[derive(Default)]
struct FakeEndpoint {
    refreshes: AtomicUsize,
    reject_refresh: bool,
}

#[async_trait]
impl TokenEndpoint for FakeEndpoint {
    fn authorization_url(&self, state: &str) -> String {
        format!("https://accounts.example/auth?state={}", state)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, AuthError> {
        Ok(TokenGrant {
            access_token: format!("access-{}", code),
            refresh_token: Some("refresh-0".into()),
            expires_at: Utc::now() + Duration::hours(1),
        })
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, AuthError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.reject_refresh {
            return Err(AuthError::Refresh("invalid_grant: Token has been revoked.".into()));
        }
        Ok(TokenGrant {
            access_token: format!("refreshed-{}", n),
            refresh_token: None,
            expires_at: Utc::now() + Duration::hours(1),
        })
    }
}

/// Gateway double that records every call and the token it was given.
struct FakeGateway {
    store: Arc<SqliteStore>,
    creates: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
    tokens_seen: Mutex<Vec<String>>,
    stored_token_at_call: Mutex<Vec<String>>,
    failure: Mutex<Option<fn() -> CalendarError>>,
    /// Replace the integration row while calendars are being listed.
    reauthorize_while_listing: AtomicBool,
}

impl FakeGateway {
    fn new(store: Arc<SqliteStore>) -> Self {
        Self {
            store,
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            tokens_seen: Mutex::new(Vec::new()),
            stored_token_at_call: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            reauthorize_while_listing: AtomicBool::new(false),
        }
    }

    fn fail_with(&self, make: fn() -> CalendarError) {
        *self.failure.lock() = Some(make);
    }

    fn succeed(&self) {
        *self.failure.lock() = None;
    }

    async fn observe(&self, token: &str) -> Result<(), CalendarError> {
        self.tokens_seen.lock().push(token.to_string());
        if let Some(integration) = self
            .store
            .find_active_integration("dr-1", CalendarProvider::Google)
            .await
            .unwrap()
        {
            self.stored_token_at_call.lock().push(integration.access_token);
        }
        // Widen the race window for concurrent callers.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        match *self.failure.lock() {
            Some(make) => Err(make()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CalendarGateway for FakeGateway {
    async fn list_calendars(&self, _access_token: &str) -> Result<Vec<Calendar>, CalendarError> {
        if self.reauthorize_while_listing.load(Ordering::SeqCst) {
            self.store
                .upsert_integration(&NewIntegration {
                    user_id: "dr-1".into(),
                    provider: CalendarProvider::Google,
                    access_token: "access-other".into(),
                    refresh_token: "refresh-other".into(),
                    token_expiry: Utc::now() + Duration::hours(1),
                })
                .await
                .unwrap();
        }
        Ok(vec![Calendar {
            id: "ana@clinic.example".into(),
            summary: "Agenda Ana".into(),
            time_zone: Some("America/Sao_Paulo".into()),
            is_primary: true,
            access_role: AccessRole::Owner,
        }])
    }

    async fn create_event(
        &self,
        access_token: &str,
        _calendar_id: &str,
        _payload: &EventPayload,
    ) -> Result<String, CalendarError> {
        self.observe(access_token).await?;
        let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("evt-{}", n))
    }

    async fn update_event(
        &self,
        access_token: &str,
        _calendar_id: &str,
        _remote_id: &str,
        _payload: &EventPayload,
    ) -> Result<(), CalendarError> {
        self.observe(access_token).await?;
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_event(
        &self,
        access_token: &str,
        _calendar_id: &str,
        _remote_id: &str,
    ) -> Result<(), CalendarError> {
        self.observe(access_token).await?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    store: Arc<SqliteStore>,
    endpoint: Arc<FakeEndpoint>,
    gateway: Arc<FakeGateway>,
    service: CalendarService,
}

fn harness(endpoint: FakeEndpoint) -> Harness {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    store
        .insert_user(&User {
            id: "dr-1".into(),
            name: "Dra. Ana".into(),
            email: "ana@clinic.example".into(),
        })
        .unwrap();
    store
        .insert_patient(&Patient {
            id: "pat-1".into(),
            full_name: "Carla Souza".into(),
            email: Some("carla@example.com".into()),
        })
        .unwrap();
    for id in ["a1", "a2"] {
        let start = Utc.with_ymd_and_hms(2025, 3, 14, 17, 0, 0).unwrap();
        store
            .insert_appointment(&Appointment {
                id: id.into(),
                title: "Consulta".into(),
                description: Some("Primeira consulta".into()),
                location: None,
                start_time: start,
                end_time: start + Duration::hours(1),
                status: AppointmentStatus::Scheduled,
                user_id: "dr-1".into(),
                patient_id: "pat-1".into(),
                google_event_id: None,
                sync_status: SyncStatus::Pending,
                sync_error: None,
                last_sync_at: None,
            })
            .unwrap();
    }

    let endpoint = Arc::new(endpoint);
    let gateway = Arc::new(FakeGateway::new(store.clone()));
    let service = CalendarService::new(
        store.clone(),
        endpoint.clone(),
        gateway.clone(),
        CalendarConfig::default(),
    );

    Harness {
        store,
        endpoint,
        gateway,
        service,
    }
}

async fn connect(h: &Harness) {
    h.service.handle_callback("code", "dr-1").await.unwrap();
}

async fn appointment(h: &Harness, id: &str) -> Appointment {
    h.store.find_appointment(id).await.unwrap().unwrap().appointment
}

#[tokio::test]
async fn test_first_sync_creates_second_updates() {
    let h = harness(FakeEndpoint::default());
    connect(&h).await;

    let first = h.service.sync("a1").await.unwrap();
    assert_eq!(first.action, SyncAction::Created);
    assert_eq!(first.remote_event_id, "evt-1");

    let second = h.service.sync("a1").await.unwrap();
    assert_eq!(second.action, SyncAction::Updated);
    assert_eq!(second.remote_event_id, "evt-1");

    assert_eq!(h.gateway.creates.load(Ordering::SeqCst), 1);
    assert_eq!(h.gateway.updates.load(Ordering::SeqCst), 1);

    let stored = appointment(&h, "a1").await;
    assert_eq!(stored.google_event_id.as_deref(), Some("evt-1"));
    assert_eq!(stored.sync_status, SyncStatus::Synced);
    assert!(stored.last_sync_at.is_some());
    assert!(stored.sync_error.is_none());

    let status = h.service.integration_status("dr-1").await.unwrap();
    assert!(status.connected);
    assert!(status.last_sync_at.is_some());
}

#[tokio::test]
async fn test_concurrent_syncs_create_one_event() {
    let h = harness(FakeEndpoint::default());
    connect(&h).await;

    let (a, b) = tokio::join!(h.service.sync("a1"), h.service.sync("a1"));
    let mut actions = vec![a.unwrap().action, b.unwrap().action];
    actions.sort_by_key(|action| *action == SyncAction::Updated);

    assert_eq!(actions, vec![SyncAction::Created, SyncAction::Updated]);
    assert_eq!(h.gateway.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_expired_token_refreshes_once_before_gateway_call() {
    let h = harness(FakeEndpoint::default());
    connect(&h).await;

    let integration = h
        .store
        .find_active_integration("dr-1", CalendarProvider::Google)
        .await
        .unwrap()
        .unwrap();
    let old_expiry = Utc::now() - Duration::minutes(1);
    h.store
        .update_integration_tokens(&integration.id, "stale", "refresh-0", old_expiry)
        .await
        .unwrap();

    h.service.sync("a1").await.unwrap();

    assert_eq!(h.endpoint.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(*h.gateway.tokens_seen.lock(), vec!["refreshed-1".to_string()]);
    assert_eq!(
        *h.gateway.stored_token_at_call.lock(),
        vec!["refreshed-1".to_string()]
    );

    let refreshed = h
        .store
        .find_active_integration("dr-1", CalendarProvider::Google)
        .await
        .unwrap()
        .unwrap();
    assert!(refreshed.token_expiry > old_expiry);
    assert_eq!(refreshed.refresh_token, "refresh-0");
}

#[tokio::test]
async fn test_gateway_failure_marks_failed() {
    let h = harness(FakeEndpoint::default());
    connect(&h).await;
    h.gateway
        .fail_with(|| CalendarError::ApiError("503 Service Unavailable: backend".into()));

    let err = h.service.sync("a1").await.unwrap_err();
    assert!(matches!(err, EngineError::Gateway(_)));
    assert!(err.is_retryable());

    let stored = appointment(&h, "a1").await;
    assert_eq!(stored.sync_status, SyncStatus::Failed);
    assert!(stored.sync_error.unwrap().contains("503"));
    assert!(stored.google_event_id.is_none());

    h.gateway.succeed();
    let outcome = h.service.sync("a1").await.unwrap();
    assert_eq!(outcome.action, SyncAction::Created);
    assert_eq!(h.gateway.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_update_keeps_remote_link() {
    let h = harness(FakeEndpoint::default());
    connect(&h).await;
    h.service.sync("a1").await.unwrap();

    h.gateway.fail_with(|| CalendarError::RateLimited(30));
    h.service.sync("a1").await.unwrap_err();

    let stored = appointment(&h, "a1").await;
    assert_eq!(stored.sync_status, SyncStatus::Failed);
    assert_eq!(stored.google_event_id.as_deref(), Some("evt-1"));

    h.gateway.succeed();
    let outcome = h.service.sync("a1").await.unwrap();
    assert_eq!(outcome.action, SyncAction::Updated);
    assert_eq!(h.gateway.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_gateway_timeout_surfaces_as_timeout() {
    let h = harness(FakeEndpoint::default());
    connect(&h).await;
    h.gateway
        .fail_with(|| CalendarError::Network(NetworkError::Timeout("30s elapsed".into())));

    let err = h.service.sync("a1").await.unwrap_err();
    assert!(matches!(err, EngineError::Timeout(_)));
    assert_eq!(appointment(&h, "a1").await.sync_status, SyncStatus::Failed);
}

#[tokio::test]
async fn test_refresh_rejection_moves_integration_to_error() {
    let h = harness(FakeEndpoint {
        reject_refresh: true,
        ..FakeEndpoint::default()
    });
    connect(&h).await;
    let integration = h
        .store
        .find_active_integration("dr-1", CalendarProvider::Google)
        .await
        .unwrap()
        .unwrap();
    h.store
        .update_integration_tokens(&integration.id, "stale", "refresh-0", Utc::now())
        .await
        .unwrap();

    let err = h.service.sync("a1").await.unwrap_err();
    assert!(matches!(err, EngineError::Refresh(_)));
    assert_eq!(appointment(&h, "a1").await.sync_status, SyncStatus::Failed);

    let status = h.service.integration_status("dr-1").await.unwrap();
    assert_eq!(status.status, Some(IntegrationStatus::Error));
    assert_eq!(
        status.error.as_deref(),
        Some("invalid_grant: Token has been revoked.")
    );

    // Fails fast: no second refresh, no gateway call.
    let err = h.service.sync("a2").await.unwrap_err();
    assert!(matches!(err, EngineError::Refresh(_)));
    assert_eq!(h.endpoint.refreshes.load(Ordering::SeqCst), 1);
    assert!(h.gateway.tokens_seen.lock().is_empty());
}

#[tokio::test]
async fn test_disconnect_unlinks_every_appointment() {
    let h = harness(FakeEndpoint::default());
    connect(&h).await;
    h.service.sync("a1").await.unwrap();
    h.service.sync("a2").await.unwrap();

    let outcome = h.service.disconnect("dr-1").await.unwrap();
    assert!(outcome.was_connected);
    assert_eq!(outcome.appointments_reset, 2);

    for id in ["a1", "a2"] {
        let stored = appointment(&h, id).await;
        assert!(stored.google_event_id.is_none());
        assert_eq!(stored.sync_status, SyncStatus::Pending);
    }
    // Local only: nothing was deleted remotely.
    assert_eq!(h.gateway.deletes.load(Ordering::SeqCst), 0);

    let status = h.service.integration_status("dr-1").await.unwrap();
    assert!(!status.connected);
    assert_eq!(status.status, Some(IntegrationStatus::Disabled));

    let err = h.service.sync("a1").await.unwrap_err();
    assert!(matches!(err, EngineError::NotAuthenticated(_)));
}

#[tokio::test]
async fn test_unsync_removes_remote_event() {
    let h = harness(FakeEndpoint::default());
    connect(&h).await;

    assert!(!h.service.unsync("a1").await.unwrap());
    assert_eq!(h.gateway.deletes.load(Ordering::SeqCst), 0);

    h.service.sync("a1").await.unwrap();
    assert!(h.service.unsync("a1").await.unwrap());
    assert_eq!(h.gateway.deletes.load(Ordering::SeqCst), 1);

    let stored = appointment(&h, "a1").await;
    assert!(stored.google_event_id.is_none());
    assert_eq!(stored.sync_status, SyncStatus::Pending);
    assert!(stored.last_sync_at.is_some());
}

#[tokio::test]
async fn test_failed_unsync_leaves_record_untouched() {
    let h = harness(FakeEndpoint::default());
    connect(&h).await;
    h.service.sync("a1").await.unwrap();

    h.gateway.fail_with(|| CalendarError::Forbidden("read-only calendar".into()));
    let err = h.service.unsync("a1").await.unwrap_err();
    assert!(matches!(err, EngineError::Gateway(_)));

    let stored = appointment(&h, "a1").await;
    assert_eq!(stored.google_event_id.as_deref(), Some("evt-1"));
    assert_eq!(stored.sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_missing_appointment_is_not_found() {
    let h = harness(FakeEndpoint::default());
    connect(&h).await;

    let err = h.service.sync("nope").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "Appointment", .. }));
    assert_eq!(err.http_status(), 404);
}

#[tokio::test]
async fn test_sync_without_integration_is_not_authenticated() {
    let h = harness(FakeEndpoint::default());

    let err = h.service.sync("a1").await.unwrap_err();
    assert!(matches!(err, EngineError::NotAuthenticated(_)));
    assert_eq!(appointment(&h, "a1").await.sync_status, SyncStatus::Failed);
}

#[tokio::test]
async fn test_callback_records_account_details() {
    let h = harness(FakeEndpoint::default());

    let integration = h.service.handle_callback("code", "dr-1").await.unwrap();
    assert_eq!(integration.access_token, "access-code");
    assert_eq!(integration.target_calendar(), "ana@clinic.example");

    let status = h.service.integration_status("dr-1").await.unwrap();
    assert!(status.connected);
    assert_eq!(status.email.as_deref(), Some("ana@clinic.example"));
    assert_eq!(status.calendar_name.as_deref(), Some("Agenda Ana"));

    let err = h.service.handle_callback("code", "  ").await.unwrap_err();
    assert!(matches!(err, EngineError::AuthExchange(_)));
}

#[tokio::test]
async fn test_callback_survives_failed_account_details_write() {
    let h = harness(FakeEndpoint::default());
    h.gateway.reauthorize_while_listing.store(true, Ordering::SeqCst);

    let integration = h.service.handle_callback("code", "dr-1").await.unwrap();
    assert!(integration.calendar_id.is_none());
    assert_eq!(integration.target_calendar(), "primary");

    let status = h.service.integration_status("dr-1").await.unwrap();
    assert!(status.connected);
    assert!(status.email.is_none());
}

#[tokio::test]
async fn test_status_without_integration() {
    let h = harness(FakeEndpoint::default());
    let status = h.service.integration_status("dr-1").await.unwrap();
    assert!(!status.connected);
    assert!(status.status.is_none());
}
