//! Salesforce token endpoint client.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

use crate::config::SalesforceConfig;
use crate::models::{IntegrationMetadata, SalesforceMetadata, TokenPair};

#[derive(Debug, Error)]
pub enum SalesforceError {
    #[error("Salesforce client credentials are not configured")]
    MissingClientCredentials,

    #[error("Salesforce rejected the request with status {status}: {}", .error.as_deref().unwrap_or("unknown_error"))]
    Rejected {
        status: u16,
        error: Option<String>,
        description: Option<String>,
    },

    #[error("Malformed token response: {0}")]
    MalformedResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl SalesforceError {
    /// Whether Salesforce itself refused the grant, as opposed to a transport failure.
    pub fn is_rejection(&self) -> bool {
        matches!(self, SalesforceError::Rejected { .. })
    }
}

#[derive(Debug, Default, Deserialize)]
struct SalesforceErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

/// Token endpoint response. Salesforce omits `expires_in`.
#[derive(Deserialize)]
pub struct SalesforceTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub instance_url: Option<String>,
    /// Identity URL
    #[serde(default)]
    pub id: Option<String>,
    /// Milliseconds since the epoch, as a string
    #[serde(default)]
    pub issued_at: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl std::fmt::Debug for SalesforceTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesforceTokenResponse")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("instance_url", &self.instance_url)
            .field("id", &self.id)
            .field("issued_at", &self.issued_at)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}

impl SalesforceTokenResponse {
    /// Parses `issued_at` (epoch milliseconds).
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
            .as_deref()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
    }

    /// Expiry estimated from the issue time and the configured session lifetime.
    ///
    /// An `issued_at` that cannot carry the lifetime falls back to `now`, and a
    /// lifetime chrono cannot represent saturates at the latest instant.
    pub fn expires_at(&self, session_ttl_seconds: u64, now: DateTime<Utc>) -> DateTime<Utc> {
        let Some(ttl) = i64::try_from(session_ttl_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
        else {
            return DateTime::<Utc>::MAX_UTC;
        };

        self.issued_at()
            .and_then(|issued| issued.checked_add_signed(ttl))
            .or_else(|| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Token pair to persist. `previous_refresh_token` is kept when Salesforce
    /// does not rotate the refresh token.
    pub fn token_pair(
        &self,
        session_ttl_seconds: u64,
        previous_refresh_token: Option<&str>,
    ) -> TokenPair {
        let mut pair = TokenPair::new(self.access_token.clone())
            .with_token_type(self.token_type.clone().unwrap_or_else(|| "Bearer".to_string()))
            .with_expires_at(Some(self.expires_at(session_ttl_seconds, Utc::now())));

        if let Some(refresh_token) = self.refresh_token.as_deref().or(previous_refresh_token) {
            pair = pair.with_refresh_token(refresh_token);
        }

        pair
    }

    pub fn metadata(&self) -> IntegrationMetadata {
        let metadata = match self.id.as_deref() {
            Some(identity_url) => {
                SalesforceMetadata::from_identity_url(identity_url, self.issued_at.clone())
            }
            None => SalesforceMetadata {
                issued_at: self.issued_at.clone(),
                ..Default::default()
            },
        };
        IntegrationMetadata::Salesforce(metadata)
    }
}

/// Client for the Salesforce token endpoint.
#[derive(Debug, Clone)]
pub struct SalesforceClient {
    http: Client,
    config: SalesforceConfig,
}

impl SalesforceClient {
    pub fn new(http: Client, config: SalesforceConfig) -> Self {
        Self { http, config }
    }

    pub fn session_ttl_seconds(&self) -> u64 {
        self.config.session_ttl_seconds
    }

    /// Exchanges an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
    ) -> Result<SalesforceTokenResponse, SalesforceError> {
        let (client_id, client_secret) = self.client_credentials()?;
        let redirect_uri = self
            .config
            .redirect_uri
            .as_deref()
            .ok_or(SalesforceError::MissingClientCredentials)?;

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("redirect_uri", redirect_uri),
        ];

        self.post_token(&params).await
    }

    /// Trades a refresh token for a new access token.
    pub async fn refresh(
        &self,
        refresh_token: &str,
    ) -> Result<SalesforceTokenResponse, SalesforceError> {
        let (client_id, client_secret) = self.client_credentials()?;

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];

        self.post_token(&params).await
    }

    fn client_credentials(&self) -> Result<(&str, &str), SalesforceError> {
        match (
            self.config.client_id.as_deref(),
            self.config.client_secret.as_deref(),
        ) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => Ok((id, secret)),
            _ => Err(SalesforceError::MissingClientCredentials),
        }
    }

    async fn post_token(
        &self,
        params: &[(&str, &str)],
    ) -> Result<SalesforceTokenResponse, SalesforceError> {
        let response = self
            .http
            .post(self.config.token_endpoint())
            .header("Accept", "application/json")
            .form(params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let parsed: SalesforceErrorBody = serde_json::from_str(&body).unwrap_or_default();
            tracing::warn!(
                status = status.as_u16(),
                error = parsed.error.as_deref().unwrap_or("unknown_error"),
                "Salesforce token endpoint returned an error"
            );
            return Err(SalesforceError::Rejected {
                status: status.as_u16(),
                error: parsed.error,
                description: parsed.error_description,
            });
        }

        let token: SalesforceTokenResponse = serde_json::from_str(&body)
            .map_err(|e| SalesforceError::MalformedResponse(e.to_string()))?;

        if token.access_token.trim().is_empty() {
            return Err(SalesforceError::MalformedResponse(
                "empty access_token".to_string(),
            ));
        }

        Ok(token)
    }
}
