//! Credential lifecycle: authorize, store, refresh, disconnect.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use agenda_store::{
    CalendarIntegration, CalendarProvider, IntegrationStatus, NewIntegration, Store,
};

use crate::error::AuthError;
use crate::google::{TokenEndpoint, TokenGrant};

/// Owns the stored OAuth credential of each user.
///
/// A refresh token the provider rejects moves the integration to `ERROR`;
/// from then on every call fails without touching the network until a
/// fresh authorization replaces the row. Concurrent refreshes for one user
/// are not serialized and the last write wins.
pub struct TokenManager {
    store: Arc<dyn Store>,
    endpoint: Arc<dyn TokenEndpoint>,
    provider: CalendarProvider,
}

impl TokenManager {
    pub fn new(store: Arc<dyn Store>, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        Self {
            store,
            endpoint,
            provider: CalendarProvider::Google,
        }
    }

    pub fn provider(&self) -> CalendarProvider {
        self.provider
    }

    /// Consent URL for `user_id`. The user id travels as the OAuth state.
    pub fn authorization_url(&self, user_id: &str) -> String {
        self.endpoint.authorization_url(user_id)
    }

    /// Exchange an authorization code. A grant without a refresh token is
    /// useless for offline access and is rejected.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenGrant, AuthError> {
        let grant = self.endpoint.exchange_code(code).await?;
        if grant.refresh_token.is_none() {
            return Err(AuthError::Exchange(
                "no refresh token returned; consent must be granted again".to_string(),
            ));
        }
        Ok(grant)
    }

    /// Store a credential, replacing any previous one for the user.
    #[tracing::instrument(skip(self, access_token, refresh_token), level = "info")]
    pub async fn save_credential(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: &str,
        expiry: DateTime<Utc>,
    ) -> Result<CalendarIntegration, AuthError> {
        let integration = self
            .store
            .upsert_integration(&NewIntegration {
                user_id: user_id.to_string(),
                provider: self.provider,
                access_token: access_token.to_string(),
                refresh_token: refresh_token.to_string(),
                token_expiry: expiry,
            })
            .await?;

        tracing::info!("Saved {} credential for user {}", self.provider, user_id);
        Ok(integration)
    }

    /// The user's integration in any state, for status reporting.
    pub async fn integration(
        &self,
        user_id: &str,
    ) -> Result<Option<CalendarIntegration>, AuthError> {
        Ok(self.store.find_integration(user_id, self.provider).await?)
    }

    pub async fn active_integration(
        &self,
        user_id: &str,
    ) -> Result<CalendarIntegration, AuthError> {
        self.store
            .find_active_integration(user_id, self.provider)
            .await?
            .ok_or_else(|| AuthError::NotAuthenticated(user_id.to_string()))
    }

    /// The active integration with an access token valid right now.
    ///
    /// Refreshes when the stored token's expiry is at or before now, and
    /// persists the new token before returning it.
    pub async fn valid_integration(
        &self,
        user_id: &str,
    ) -> Result<CalendarIntegration, AuthError> {
        let mut integration = self.active_integration(user_id).await?;

        if integration.sync_status == IntegrationStatus::Error {
            let reason = integration
                .sync_error
                .clone()
                .unwrap_or_else(|| "integration requires re-authorization".to_string());
            tracing::debug!("Integration for user {} is in ERROR, not refreshing", user_id);
            return Err(AuthError::Refresh(reason));
        }

        if !integration.is_token_expired(Utc::now()) {
            return Ok(integration);
        }

        tracing::info!("Access token for user {} expired, refreshing", user_id);
        let grant = match self.endpoint.refresh(&integration.refresh_token).await {
            Ok(grant) => grant,
            Err(AuthError::Refresh(reason)) => {
                tracing::warn!("Refresh rejected for user {}: {}", user_id, reason);
                self.store
                    .mark_integration_error(&integration.id, &reason)
                    .await?;
                return Err(AuthError::Refresh(reason));
            }
            Err(e) => return Err(e),
        };

        let refresh_token = grant
            .refresh_token
            .unwrap_or_else(|| integration.refresh_token.clone());
        self.store
            .update_integration_tokens(
                &integration.id,
                &grant.access_token,
                &refresh_token,
                grant.expires_at,
            )
            .await?;

        integration.access_token = grant.access_token;
        integration.refresh_token = refresh_token;
        integration.token_expiry = grant.expires_at;
        Ok(integration)
    }

    pub async fn valid_access_token(&self, user_id: &str) -> Result<String, AuthError> {
        Ok(self.valid_integration(user_id).await?.access_token)
    }

    /// Deactivate the user's integration. Returns whether one existed.
    ///
    /// Appointment sync state is not touched here.
    pub async fn disconnect(&self, user_id: &str) -> Result<bool, AuthError> {
        let changed = self
            .store
            .deactivate_integration(user_id, self.provider)
            .await?;
        if changed {
            tracing::info!("Disconnected {} for user {}", self.provider, user_id);
        }
        Ok(changed)
    }
}
