//! Token record repository for database operations
//!
//! Works on ciphertext only; encryption happens in the credential store.

use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::models::token_record::{self, Entity as TokenRecord};

/// Encrypted token fields ready to persist.
pub struct EncryptedTokens {
    pub access_token_ciphertext: Vec<u8>,
    pub refresh_token_ciphertext: Option<Vec<u8>>,
    pub token_type: String,
    pub expires_at: Option<DateTimeWithTimeZone>,
}

/// Repository for token record rows
pub struct TokenRecordRepository<'a, C> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> TokenRecordRepository<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn find_by_integration(
        &self,
        integration_id: Uuid,
    ) -> Result<Option<token_record::Model>, DbErr> {
        TokenRecord::find()
            .filter(token_record::Column::IntegrationId.eq(integration_id))
            .one(self.conn)
            .await
    }

    /// Loads the token rows belonging to any of the given integrations
    pub async fn find_by_integrations(
        &self,
        integration_ids: Vec<Uuid>,
    ) -> Result<Vec<token_record::Model>, DbErr> {
        if integration_ids.is_empty() {
            return Ok(Vec::new());
        }

        TokenRecord::find()
            .filter(token_record::Column::IntegrationId.is_in(integration_ids))
            .all(self.conn)
            .await
    }

    /// Deletes the token row for an integration, returning how many were removed
    pub async fn delete_for_integration(&self, integration_id: Uuid) -> Result<u64, DbErr> {
        let result = TokenRecord::delete_many()
            .filter(token_record::Column::IntegrationId.eq(integration_id))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Replaces whatever token row exists for the integration with a new one
    pub async fn replace(
        &self,
        integration_id: Uuid,
        tokens: EncryptedTokens,
        now: DateTimeWithTimeZone,
    ) -> Result<token_record::Model, DbErr> {
        self.delete_for_integration(integration_id).await?;

        token_record::ActiveModel {
            id: Set(Uuid::new_v4()),
            integration_id: Set(integration_id),
            access_token_ciphertext: Set(tokens.access_token_ciphertext),
            refresh_token_ciphertext: Set(tokens.refresh_token_ciphertext),
            token_type: Set(tokens.token_type),
            expires_at: Set(tokens.expires_at),
            updated_at: Set(now),
        }
        .insert(self.conn)
        .await
    }

    /// Overwrites the ciphertexts of an existing row, keeping its id
    pub async fn update_in_place(
        &self,
        existing: token_record::Model,
        tokens: EncryptedTokens,
        now: DateTimeWithTimeZone,
    ) -> Result<token_record::Model, DbErr> {
        let mut active: token_record::ActiveModel = existing.into();
        active.access_token_ciphertext = Set(tokens.access_token_ciphertext);
        active.refresh_token_ciphertext = Set(tokens.refresh_token_ciphertext);
        active.token_type = Set(tokens.token_type);
        active.expires_at = Set(tokens.expires_at);
        active.updated_at = Set(now);
        active.update(self.conn).await
    }
}
