//! Google Calendar API client.

use async_trait::async_trait;
use std::time::Duration;
use tracing::instrument;

use agenda_core::{GoogleConfig, ReqwestErrorExt};

use crate::error::CalendarError;
use crate::gateway::CalendarGateway;
use crate::types::*;

pub struct GoogleCalendarClient {
    client: reqwest::Client,
    base_url: String,
}

impl GoogleCalendarClient {
    pub fn new(config: &GoogleConfig, timeout: Duration) -> Result<Self, CalendarError> {
        Self::with_base_url(&config.api_base_url, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, CalendarError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CalendarError::Network(e.into_network_error()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(calendar_id),
        )
    }

    fn event_url(&self, calendar_id: &str, remote_id: &str) -> String {
        format!(
            "{}/{}",
            self.events_url(calendar_id),
            urlencoding::encode(remote_id),
        )
    }

    /// Helper to handle API responses and errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, CalendarError> {
        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| CalendarError::ApiError(format!("JSON parse error: {}", e)))
        } else {
            Err(self.error_from(response).await)
        }
    }

    async fn error_from(&self, response: reqwest::Response) -> CalendarError {
        let status = response.status();

        match status.as_u16() {
            401 => CalendarError::TokenRejected,
            403 => CalendarError::Forbidden(response.text().await.unwrap_or_default()),
            404 | 410 => CalendarError::NotFound(response.text().await.unwrap_or_default()),
            400 => CalendarError::InvalidEventData(response.text().await.unwrap_or_default()),
            429 => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60);
                CalendarError::RateLimited(retry_after)
            }
            _ => {
                let text = response.text().await.unwrap_or_default();
                CalendarError::ApiError(format!("{}: {}", status, text))
            }
        }
    }
}

#[async_trait]
impl CalendarGateway for GoogleCalendarClient {
    /// List all calendars, following pagination.
    #[instrument(skip(self, access_token), level = "info")]
    async fn list_calendars(&self, access_token: &str) -> Result<Vec<Calendar>, CalendarError> {
        let url = format!("{}/users/me/calendarList", self.base_url);
        let mut calendars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.client.get(&url).bearer_auth(access_token);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| CalendarError::Network(e.into_network_error()))?;
            let page: CalendarListResponse = self.handle_response(response).await?;

            calendars.extend(page.items.into_iter().map(Calendar::from));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(calendars)
    }

    /// Create a new event and invite attendees.
    #[instrument(skip(self, access_token, payload), level = "info")]
    async fn create_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        payload: &EventPayload,
    ) -> Result<String, CalendarError> {
        let response = self
            .client
            .post(self.events_url(calendar_id))
            .bearer_auth(access_token)
            .query(&[("sendUpdates", "all")])
            .json(payload)
            .send()
            .await
            .map_err(|e| CalendarError::Network(e.into_network_error()))?;

        let event: ApiEvent = self.handle_response(response).await?;
        tracing::debug!("Created remote event {}", event.id);
        Ok(event.id)
    }

    /// Patch an existing event.
    #[instrument(skip(self, access_token, payload), level = "info")]
    async fn update_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        remote_id: &str,
        payload: &EventPayload,
    ) -> Result<(), CalendarError> {
        let response = self
            .client
            .patch(self.event_url(calendar_id, remote_id))
            .bearer_auth(access_token)
            .query(&[("sendUpdates", "all")])
            .json(payload)
            .send()
            .await
            .map_err(|e| CalendarError::Network(e.into_network_error()))?;

        let _: ApiEvent = self.handle_response(response).await?;
        Ok(())
    }

    /// Delete an event.
    #[instrument(skip(self, access_token), level = "info")]
    async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        remote_id: &str,
    ) -> Result<(), CalendarError> {
        let response = self
            .client
            .delete(self.event_url(calendar_id, remote_id))
            .bearer_auth(access_token)
            .query(&[("sendUpdates", "all")])
            .send()
            .await
            .map_err(|e| CalendarError::Network(e.into_network_error()))?;

        // Delete returns 204 No Content on success
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status.as_u16() == 404 || status.as_u16() == 410 {
            tracing::debug!("Remote event {} already gone ({})", remote_id, status);
            return Ok(());
        }
        Err(self.error_from(response).await)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use agenda_core::NetworkError;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GoogleCalendarClient {
        GoogleCalendarClient::with_base_url(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    fn payload() -> EventPayload {
        EventPayload {
            summary: "Consulta".into(),
            description: None,
            location: None,
            start: EventDateTime {
                date_time: "2025-03-14T17:00:00+00:00".into(),
                time_zone: "America/Sao_Paulo".into(),
            },
            end: EventDateTime {
                date_time: "2025-03-14T18:00:00+00:00".into(),
                time_zone: "America/Sao_Paulo".into(),
            },
            attendees: vec![EventAttendee {
                email: "carla@example.com".into(),
            }],
            reminders: EventReminders {
                use_default: false,
                overrides: vec![ReminderOverride {
                    method: "popup".into(),
                    minutes: 60,
                }],
            },
        }
    }

    #[tokio::test]
    async fn test_list_calendars_follows_pages() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/users/me/calendarList"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"id": "cal2", "summary": "Work", "accessRole": "writer"}]
            })))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/me/calendarList"))
            .and(header("Authorization", "Bearer test_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"id": "primary", "summary": "My Calendar", "primary": true, "accessRole": "owner"}
                ],
                "nextPageToken": "p2"
            })))
            .mount(&mock_server)
            .await;

        let calendars = client(&mock_server).list_calendars("test_token").await.unwrap();

        assert_eq!(calendars.len(), 2);
        assert!(calendars[0].is_primary);
        assert_eq!(calendars[1].id, "cal2");
    }

    #[tokio::test]
    async fn test_create_event_sends_updates_and_returns_id() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .and(query_param("sendUpdates", "all"))
            .and(header("Authorization", "Bearer test_token"))
            .and(body_partial_json(serde_json::json!({
                "summary": "Consulta",
                "start": {"timeZone": "America/Sao_Paulo"},
                "reminders": {"useDefault": false}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "evt-123",
                "status": "confirmed"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let id = client(&mock_server)
            .create_event("test_token", "primary", &payload())
            .await
            .unwrap();
        assert_eq!(id, "evt-123");
    }

    #[tokio::test]
    async fn test_update_event_uses_patch() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/calendars/ana%40clinic.example/events/evt-123"))
            .and(query_param("sendUpdates", "all"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "evt-123"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        client(&mock_server)
            .update_event("test_token", "ana@clinic.example", "evt-123", &payload())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_event() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/calendars/primary/events/event123"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock_server)
            .await;

        let result = client(&mock_server)
            .delete_event("test_token", "primary", "event123")
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_delete_of_missing_event_succeeds() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/calendars/primary/events/gone"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&mock_server)
            .await;

        let result = client(&mock_server)
            .delete_event("test_token", "primary", "gone")
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_token_rejected() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/users/me/calendarList"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let result = client(&mock_server).list_calendars("expired_token").await;
        assert!(matches!(result, Err(CalendarError::TokenRejected)));
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "12"))
            .mount(&mock_server)
            .await;

        let result = client(&mock_server)
            .create_event("token", "primary", &payload())
            .await;
        assert!(matches!(result, Err(CalendarError::RateLimited(12))));
    }

    #[tokio::test]
    async fn test_server_error_is_api_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/calendars/primary/events/evt-1"))
            .respond_with(ResponseTemplate::new(503).set_body_string("backend unavailable"))
            .mount(&mock_server)
            .await;

        let result = client(&mock_server)
            .update_event("token", "primary", "evt-1", &payload())
            .await;
        match result {
            Err(CalendarError::ApiError(msg)) => assert!(msg.contains("backend unavailable")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_network_timeout() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(2))
                    .set_body_json(serde_json::json!({"id": "late"})),
            )
            .mount(&mock_server)
            .await;

        let client =
            GoogleCalendarClient::with_base_url(&mock_server.uri(), Duration::from_millis(200))
                .unwrap();
        let result = client.create_event("token", "primary", &payload()).await;

        assert!(matches!(
            result,
            Err(CalendarError::Network(NetworkError::Timeout(_)))
        ));
    }
}
