//! Google OAuth2 identity endpoint for Calendar access.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use agenda_core::{GoogleConfig, NetworkError, ReqwestErrorExt};

use crate::error::AuthError;

/// Lifetime assumed when the token response omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleTokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Tokens issued by the identity endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Absent on most refresh responses.
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl TokenGrant {
    fn from_response(
        response: GoogleTokenResponse,
        now: DateTime<Utc>,
    ) -> Result<Self, NetworkError> {
        let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let expires_at = Some(expires_in)
            .filter(|secs| *secs >= 0)
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                NetworkError::InvalidResponse(format!("expires_in out of range: {}", expires_in))
            })?;

        Ok(Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at,
        })
    }
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// OAuth identity endpoint used by [`crate::TokenManager`].
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Consent URL. `state` comes back untouched on the callback.
    fn authorization_url(&self, state: &str) -> String;

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, AuthError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError>;
}

enum TokenReply {
    Granted(GoogleTokenResponse),
    Rejected(String),
}

pub struct GoogleOAuth2Provider {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    auth_url: String,
    token_url: String,
    scopes: Vec<String>,
}

impl GoogleOAuth2Provider {
    pub fn new(config: &GoogleConfig, timeout: std::time::Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Network(e.into_network_error()))?;

        Ok(Self {
            client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            auth_url: config.auth_url.clone(),
            token_url: config.token_url.clone(),
            scopes: config.scopes.clone(),
        })
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenReply, NetworkError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(ReqwestErrorExt::into_network_error)?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(NetworkError::ServerError {
                status: status.as_u16(),
                message: describe_rejection(status.as_u16(), &body),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(TokenReply::Rejected(describe_rejection(status.as_u16(), &body)));
        }

        let token = response
            .json::<GoogleTokenResponse>()
            .await
            .map_err(|e| NetworkError::InvalidResponse(e.to_string()))?;
        Ok(TokenReply::Granted(token))
    }
}

#[async_trait]
impl TokenEndpoint for GoogleOAuth2Provider {
    fn authorization_url(&self, state: &str) -> String {
        let scopes = self.scopes.join(" ");

        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&access_type=offline&prompt=consent",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state),
        )
    }

    #[tracing::instrument(skip(self, code), level = "info")]
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, AuthError> {
        let reply = self
            .request_token(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .await?;

        match reply {
            TokenReply::Granted(token) => Ok(TokenGrant::from_response(token, Utc::now())?),
            TokenReply::Rejected(reason) => {
                tracing::warn!("Authorization code rejected: {}", reason);
                Err(AuthError::Exchange(reason))
            }
        }
    }

    #[tracing::instrument(skip(self, refresh_token), level = "info")]
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
        let reply = self
            .request_token(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .await?;

        match reply {
            TokenReply::Granted(token) => Ok(TokenGrant::from_response(token, Utc::now())?),
            TokenReply::Rejected(reason) => Err(AuthError::Refresh(reason)),
        }
    }
}

fn describe_rejection(status: u16, body: &str) -> String {
    match serde_json::from_str::<GoogleErrorResponse>(body) {
        Ok(err) => match err.error_description {
            Some(description) => format!("{}: {}", err.error, description),
            None => err.error,
        },
        Err(_) if body.trim().is_empty() => format!("HTTP {}", status),
        Err(_) => format!("HTTP {}: {}", status, body.trim()),
    }
}
