//! Salesforce access token refresh.
//!
//! A refresh replaces the token record in place. A grant rejected by
//! Salesforce moves the integration to `error`; transport failures leave it
//! untouched for the next run. Nothing here retries.

use chrono::{Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::ServiceAccess;
use crate::credential_store::{CredentialStore, StoreError};
use crate::models::SystemType;
use crate::oauth::salesforce::{SalesforceClient, SalesforceError};

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("integration {0} not found")]
    NotFound(Uuid),
    #[error("integration {integration_id} is {status}, not active")]
    Inactive { integration_id: Uuid, status: String },
    #[error("{0} integrations do not support token refresh")]
    Unsupported(SystemType),
    #[error("integration {0} has no stored tokens")]
    NoTokens(Uuid),
    #[error("integration {0} has no refresh token")]
    NoRefreshToken(Uuid),
    #[error(transparent)]
    Provider(#[from] SalesforceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a batch refresh.
#[derive(Debug, Default)]
pub struct RefreshSummary {
    pub attempted: usize,
    pub refreshed: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
}

/// Refreshes Salesforce access tokens held by the credential store.
pub struct TokenRefresher {
    store: CredentialStore,
    salesforce: SalesforceClient,
    access: ServiceAccess,
}

impl TokenRefresher {
    pub fn new(store: CredentialStore, salesforce: SalesforceClient) -> Self {
        Self {
            store,
            salesforce,
            access: ServiceAccess::trusted(),
        }
    }

    /// Refreshes one integration's access token.
    pub async fn refresh(&self, integration_id: Uuid) -> Result<(), RefreshError> {
        let integration = self
            .store
            .find_integration(&self.access, integration_id)
            .await?
            .ok_or(RefreshError::NotFound(integration_id))?;

        if !integration.is_active() {
            return Err(RefreshError::Inactive {
                integration_id,
                status: integration.status,
            });
        }

        let system_type = integration.system_type().map_err(StoreError::from)?;
        if !system_type.supports_refresh() {
            return Err(RefreshError::Unsupported(system_type));
        }

        let tokens = self
            .store
            .get_tokens(&self.access, integration_id)
            .await?
            .ok_or(RefreshError::NoTokens(integration_id))?;

        let Some(refresh_token) = tokens.refresh_token() else {
            self.store
                .mark_error(integration_id, "no refresh token stored")
                .await?;
            return Err(RefreshError::NoRefreshToken(integration_id));
        };

        let response = match self.salesforce.refresh(refresh_token).await {
            Ok(response) => response,
            Err(error) if error.is_rejection() => {
                self.store
                    .mark_error(integration_id, &error.to_string())
                    .await?;
                return Err(error.into());
            }
            Err(error) => return Err(error.into()),
        };

        let refreshed =
            response.token_pair(self.salesforce.session_ttl_seconds(), Some(refresh_token));
        // A disconnect may have landed while Salesforce was answering.
        match self
            .store
            .replace_tokens_after_refresh(&self.access, integration_id, &refreshed)
            .await
        {
            Ok(_) => {}
            Err(StoreError::Inactive { status, .. }) => {
                return Err(RefreshError::Inactive {
                    integration_id,
                    status,
                });
            }
            Err(StoreError::MissingTokens { .. }) => {
                return Err(RefreshError::NoTokens(integration_id));
            }
            Err(error) => return Err(error.into()),
        }

        tracing::info!(
            integration_id = %integration_id,
            user_id = %integration.user_id,
            system_type = %system_type,
            "Refreshed access token"
        );

        Ok(())
    }

    /// Refreshes every active Salesforce integration expiring within `lead_time`.
    pub async fn refresh_expiring(&self, lead_time: Duration) -> Result<RefreshSummary, RefreshError> {
        let cutoff = Utc::now() + lead_time;
        let due = self
            .store
            .list_expiring(&self.access, SystemType::Salesforce, cutoff)
            .await?;

        let mut summary = RefreshSummary {
            attempted: due.len(),
            ..Default::default()
        };

        for integration_id in due {
            match self.refresh(integration_id).await {
                Ok(()) => summary.refreshed.push(integration_id),
                Err(error) => {
                    tracing::warn!(
                        integration_id = %integration_id,
                        error = %error,
                        "Token refresh failed"
                    );
                    summary.failed.push((integration_id, error.to_string()));
                }
            }
        }

        Ok(summary)
    }
}
