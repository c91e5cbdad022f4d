//! Credential store for integrations and their tokens.
//!
//! Every user-facing read and write is scoped by an explicit [`Principal`].
//! Decrypted tokens leave the store only for holders of [`ServiceAccess`].
//! Multi-row writes run inside one database transaction, so readers never
//! observe an active integration without its token record.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, TransactionTrait};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{Principal, ServiceAccess};
use crate::crypto::{CryptoError, CryptoKey, decrypt_token, encrypt_token};
use crate::error::{self, ApiError};
use crate::models::{
    IntegrationMetadata, IntegrationStatus, ParseEnumError, SystemType, TokenPair, integration,
    token_record,
};
use crate::repositories::{
    EncryptedTokens, IntegrationFilter, IntegrationRepository, TokenRecordRepository,
};

/// Tokens shorter than this get no prefix in previews.
pub const PREVIEW_MIN_LENGTH: usize = 12;
/// Characters of the access token shown in previews.
pub const PREVIEW_PREFIX_CHARS: usize = 4;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("token encryption error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("integration {integration_id} not found")]
    NotFound { integration_id: Uuid },
    #[error("integration {integration_id} is {status}, not active")]
    Inactive { integration_id: Uuid, status: String },
    #[error("integration {integration_id} has no token record")]
    MissingTokens { integration_id: Uuid },
    #[error("{found} metadata cannot be attached to a {expected} integration")]
    MetadataMismatch {
        expected: SystemType,
        found: SystemType,
    },
    #[error("metadata serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("stored integration is unreadable: {0}")]
    InvalidRecord(#[from] ParseEnumError),
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { .. } => error::not_found("Integration not found"),
            StoreError::Inactive { .. } => error::not_found("Integration is not active"),
            StoreError::MetadataMismatch { expected, found } => error::validation_error(
                "Metadata does not match the integration system",
                serde_json::json!({ "metadata": format!("expected {expected}, got {found}") }),
            ),
            StoreError::Database(db_err) => db_err.into(),
            other => {
                tracing::error!(error = %other, "Credential store failure");
                error::internal_error()
            }
        }
    }
}

/// Whether an integration has the token record it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Present,
    /// Active integration without a token record
    Missing,
    /// Inactive integration whose tokens were removed
    NotRequired,
}

/// Redacted description of an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TokenPreview {
    pub present: bool,
    /// Length in characters, when the token could be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    /// First characters of tokens long enough to keep the rest hidden
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl TokenPreview {
    pub fn absent() -> Self {
        Self {
            present: false,
            length: None,
            prefix: None,
        }
    }
}

/// Builds a preview that never contains the whole token.
pub fn preview_token(token: &str) -> TokenPreview {
    let length = token.chars().count();
    let prefix = (length >= PREVIEW_MIN_LENGTH)
        .then(|| token.chars().take(PREVIEW_PREFIX_CHARS).collect());

    TokenPreview {
        present: true,
        length: Some(length),
        prefix,
    }
}

/// One row of the diagnostic listing.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IntegrationDiagnostic {
    pub id: Uuid,
    pub user_id: Uuid,
    pub system_type: String,
    pub status: String,
    pub instance_url: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub connected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub has_token_record: bool,
    pub token_state: TokenState,
    pub access_token_preview: TokenPreview,
    pub has_refresh_token: bool,
    pub token_type: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Store for integrations and encrypted tokens.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    db: Arc<DatabaseConnection>,
    crypto_key: CryptoKey,
}

impl CredentialStore {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    /// The caller's most recently connected integration for `system_type`.
    pub async fn get_integration(
        &self,
        principal: &Principal,
        system_type: SystemType,
    ) -> Result<Option<integration::Model>, StoreError> {
        Ok(IntegrationRepository::new(&*self.db)
            .find_latest_for_user(principal.user_id, system_type)
            .await?)
    }

    /// Supersedes any active integration for the pair and inserts a new active one.
    pub async fn upsert_integration(
        &self,
        principal: &Principal,
        system_type: SystemType,
        instance_url: Option<String>,
        metadata: Option<IntegrationMetadata>,
    ) -> Result<integration::Model, StoreError> {
        let metadata = metadata_json(system_type, metadata)?;

        let txn = self.db.begin().await?;
        let integration =
            upsert_in(&txn, principal.user_id, system_type, instance_url, metadata).await?;
        txn.commit().await?;

        Ok(integration)
    }

    /// Replaces the token record of an active integration.
    pub async fn store_tokens(
        &self,
        _access: &ServiceAccess,
        integration_id: Uuid,
        tokens: &TokenPair,
    ) -> Result<token_record::Model, StoreError> {
        let txn = self.db.begin().await?;

        let integration = find_active_in(&txn, integration_id).await?;
        let record = self.store_tokens_in(&txn, &integration, tokens).await?;

        txn.commit().await?;
        Ok(record)
    }

    /// Decrypted tokens for an integration, if it has a token record.
    pub async fn get_tokens(
        &self,
        _access: &ServiceAccess,
        integration_id: Uuid,
    ) -> Result<Option<TokenPair>, StoreError> {
        let Some(integration) = IntegrationRepository::new(&*self.db)
            .find_by_id(integration_id)
            .await?
        else {
            return Ok(None);
        };
        let Some(record) = TokenRecordRepository::new(&*self.db)
            .find_by_integration(integration_id)
            .await?
        else {
            return Ok(None);
        };

        self.decrypt_record(integration.system_type()?, &record)
            .map(Some)
    }

    /// Whether the integration currently has a token record.
    pub async fn has_tokens(&self, integration_id: Uuid) -> Result<bool, StoreError> {
        Ok(TokenRecordRepository::new(&*self.db)
            .find_by_integration(integration_id)
            .await?
            .is_some())
    }

    /// Upserts the integration and stores its tokens in one transaction.
    pub async fn complete_connection(
        &self,
        principal: &Principal,
        _access: &ServiceAccess,
        system_type: SystemType,
        instance_url: Option<String>,
        metadata: Option<IntegrationMetadata>,
        tokens: &TokenPair,
    ) -> Result<integration::Model, StoreError> {
        let metadata = metadata_json(system_type, metadata)?;

        let txn = self.db.begin().await?;
        let integration =
            upsert_in(&txn, principal.user_id, system_type, instance_url, metadata).await?;
        self.store_tokens_in(&txn, &integration, tokens).await?;
        txn.commit().await?;

        tracing::info!(
            user_id = %principal.user_id,
            integration_id = %integration.id,
            system_type = %system_type,
            "Integration connected"
        );

        Ok(integration)
    }

    /// Disconnects the caller's active integration and deletes its tokens.
    pub async fn disconnect(
        &self,
        principal: &Principal,
        system_type: SystemType,
    ) -> Result<Option<integration::Model>, StoreError> {
        let txn = self.db.begin().await?;
        let integrations = IntegrationRepository::new(&txn);

        let Some(active) = integrations
            .find_active_for_user(principal.user_id, system_type)
            .await?
        else {
            return Ok(None);
        };

        let disconnected = integrations
            .transition_from_active(active.id, IntegrationStatus::Disconnected)
            .await?
            .ok_or(StoreError::NotFound {
                integration_id: active.id,
            })?;
        TokenRecordRepository::new(&txn)
            .delete_for_integration(active.id)
            .await?;

        txn.commit().await?;

        tracing::info!(
            user_id = %principal.user_id,
            integration_id = %disconnected.id,
            system_type = %system_type,
            "Integration disconnected"
        );

        Ok(Some(disconnected))
    }

    /// Overwrites the tokens of an integration after a refresh, keeping the record id.
    ///
    /// The integration must still be active and still hold its token record;
    /// a disconnect that landed while the refresh was in flight wins.
    pub async fn replace_tokens_after_refresh(
        &self,
        _access: &ServiceAccess,
        integration_id: Uuid,
        tokens: &TokenPair,
    ) -> Result<token_record::Model, StoreError> {
        let txn = self.db.begin().await?;

        let integration = find_active_in(&txn, integration_id).await?;
        let records = TokenRecordRepository::new(&txn);
        let existing = records
            .find_by_integration(integration_id)
            .await?
            .ok_or(StoreError::MissingTokens { integration_id })?;

        let encrypted = self.encrypt_pair(integration.id, integration.system_type()?, tokens)?;
        let now: DateTimeWithTimeZone = Utc::now().into();
        let record = records.update_in_place(existing, encrypted, now).await?;

        txn.commit().await?;
        Ok(record)
    }

    /// Moves an active integration to `error`. Returns `None` when the
    /// integration is missing or no longer active.
    pub async fn mark_error(
        &self,
        integration_id: Uuid,
        reason: &str,
    ) -> Result<Option<integration::Model>, StoreError> {
        let updated = IntegrationRepository::new(&*self.db)
            .transition_from_active(integration_id, IntegrationStatus::Error)
            .await?;

        if let Some(ref integration) = updated {
            tracing::warn!(
                integration_id = %integration.id,
                user_id = %integration.user_id,
                system_type = %integration.system_type,
                reason,
                "Integration marked as error"
            );
        }

        Ok(updated)
    }

    /// Loads an integration by id, for trusted background work.
    pub async fn find_integration(
        &self,
        _access: &ServiceAccess,
        integration_id: Uuid,
    ) -> Result<Option<integration::Model>, StoreError> {
        Ok(IntegrationRepository::new(&*self.db)
            .find_by_id(integration_id)
            .await?)
    }

    /// Active integrations of `system_type` whose access token expires by `cutoff`.
    pub async fn list_expiring(
        &self,
        _access: &ServiceAccess,
        system_type: SystemType,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let filter = IntegrationFilter {
            system_type: Some(system_type),
            status: Some(IntegrationStatus::Active),
            user_id: None,
        };
        let integrations = IntegrationRepository::new(&*self.db).list(&filter).await?;
        let ids = integrations.iter().map(|i| i.id).collect();

        let records = TokenRecordRepository::new(&*self.db)
            .find_by_integrations(ids)
            .await?;

        Ok(records
            .into_iter()
            .filter(|record| {
                record
                    .expires_at
                    .is_some_and(|expires_at| expires_at.with_timezone(&Utc) <= cutoff)
            })
            .map(|record| record.integration_id)
            .collect())
    }

    /// Redacted listing for the diagnostic surface.
    pub async fn list_for_diagnostics(
        &self,
        filter: &IntegrationFilter,
    ) -> Result<Vec<IntegrationDiagnostic>, StoreError> {
        let integrations = IntegrationRepository::new(&*self.db).list(filter).await?;
        let ids = integrations.iter().map(|i| i.id).collect();

        let mut records: HashMap<Uuid, token_record::Model> = TokenRecordRepository::new(&*self.db)
            .find_by_integrations(ids)
            .await?
            .into_iter()
            .map(|record| (record.integration_id, record))
            .collect();

        Ok(integrations
            .into_iter()
            .map(|integration| {
                let record = records.remove(&integration.id);
                self.diagnose(integration, record)
            })
            .collect())
    }

    fn diagnose(
        &self,
        integration: integration::Model,
        record: Option<token_record::Model>,
    ) -> IntegrationDiagnostic {
        let token_state = match (&record, integration.is_active()) {
            (Some(_), _) => TokenState::Present,
            (None, true) => TokenState::Missing,
            (None, false) => TokenState::NotRequired,
        };

        let access_token_preview = match &record {
            Some(record) => self.preview_access_token(&integration, record),
            None => TokenPreview::absent(),
        };

        IntegrationDiagnostic {
            id: integration.id,
            user_id: integration.user_id,
            system_type: integration.system_type,
            status: integration.status,
            instance_url: integration.instance_url,
            metadata: integration.metadata,
            connected_at: integration.connected_at.with_timezone(&Utc),
            updated_at: integration.updated_at.with_timezone(&Utc),
            has_token_record: record.is_some(),
            token_state,
            access_token_preview,
            has_refresh_token: record
                .as_ref()
                .is_some_and(|r| r.refresh_token_ciphertext.is_some()),
            token_type: record.as_ref().map(|r| r.token_type.clone()),
            expires_at: record
                .as_ref()
                .and_then(|r| r.expires_at)
                .map(|expires_at| expires_at.with_timezone(&Utc)),
        }
    }

    fn preview_access_token(
        &self,
        integration: &integration::Model,
        record: &token_record::Model,
    ) -> TokenPreview {
        let decrypted = integration
            .system_type()
            .map_err(StoreError::from)
            .and_then(|system_type| {
                decrypt_token(
                    &self.crypto_key,
                    integration.id,
                    system_type,
                    &record.access_token_ciphertext,
                )
                .map_err(StoreError::from)
            });

        match decrypted {
            Ok(token) => preview_token(&token),
            Err(error) => {
                tracing::warn!(
                    integration_id = %integration.id,
                    error = %error,
                    "Access token unreadable while building diagnostics"
                );
                TokenPreview {
                    present: true,
                    length: None,
                    prefix: None,
                }
            }
        }
    }

    async fn store_tokens_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        integration: &integration::Model,
        tokens: &TokenPair,
    ) -> Result<token_record::Model, StoreError> {
        let encrypted = self.encrypt_pair(integration.id, integration.system_type()?, tokens)?;
        Ok(TokenRecordRepository::new(conn)
            .replace(integration.id, encrypted, Utc::now().into())
            .await?)
    }

    fn encrypt_pair(
        &self,
        integration_id: Uuid,
        system_type: SystemType,
        tokens: &TokenPair,
    ) -> Result<EncryptedTokens, CryptoError> {
        let access_token_ciphertext = encrypt_token(
            &self.crypto_key,
            integration_id,
            system_type,
            tokens.access_token(),
        )?;
        let refresh_token_ciphertext = tokens
            .refresh_token()
            .map(|token| encrypt_token(&self.crypto_key, integration_id, system_type, token))
            .transpose()?;

        Ok(EncryptedTokens {
            access_token_ciphertext,
            refresh_token_ciphertext,
            token_type: tokens.token_type.clone(),
            expires_at: tokens.expires_at.map(Into::into),
        })
    }

    fn decrypt_record(
        &self,
        system_type: SystemType,
        record: &token_record::Model,
    ) -> Result<TokenPair, StoreError> {
        let access_token = decrypt_token(
            &self.crypto_key,
            record.integration_id,
            system_type,
            &record.access_token_ciphertext,
        )?;
        let refresh_token = record
            .refresh_token_ciphertext
            .as_deref()
            .map(|ciphertext| {
                decrypt_token(
                    &self.crypto_key,
                    record.integration_id,
                    system_type,
                    ciphertext,
                )
            })
            .transpose()?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: record.token_type.clone(),
            expires_at: record.expires_at.map(|e| e.with_timezone(&Utc)),
        })
    }
}

fn metadata_json(
    system_type: SystemType,
    metadata: Option<IntegrationMetadata>,
) -> Result<Option<serde_json::Value>, StoreError> {
    match metadata {
        Some(metadata) if metadata.system_type() != system_type => {
            Err(StoreError::MetadataMismatch {
                expected: system_type,
                found: metadata.system_type(),
            })
        }
        Some(metadata) => Ok(Some(serde_json::to_value(metadata)?)),
        None => Ok(None),
    }
}

async fn find_active_in<C: ConnectionTrait>(
    conn: &C,
    integration_id: Uuid,
) -> Result<integration::Model, StoreError> {
    let integration = IntegrationRepository::new(conn)
        .find_by_id(integration_id)
        .await?
        .ok_or(StoreError::NotFound { integration_id })?;
    if !integration.is_active() {
        return Err(StoreError::Inactive {
            integration_id,
            status: integration.status,
        });
    }
    Ok(integration)
}

async fn upsert_in<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    system_type: SystemType,
    instance_url: Option<String>,
    metadata: Option<serde_json::Value>,
) -> Result<integration::Model, StoreError> {
    let integrations = IntegrationRepository::new(conn);
    let now: DateTimeWithTimeZone = Utc::now().into();

    // Superseded rows keep no credentials.
    if let Some(previous) = integrations
        .find_active_for_user(user_id, system_type)
        .await?
    {
        TokenRecordRepository::new(conn)
            .delete_for_integration(previous.id)
            .await?;
    }

    let superseded = integrations
        .supersede_active(user_id, system_type, now)
        .await?;
    if superseded > 0 {
        tracing::info!(
            user_id = %user_id,
            system_type = %system_type,
            superseded,
            "Superseded previous active integration"
        );
    }

    Ok(integrations
        .insert_active(user_id, system_type, instance_url, metadata, now)
        .await?)
}
