//! Token record entity model
//!
//! Encrypted credentials for an integration. Ciphertexts are produced by
//! [`crate::crypto::encrypt_token`] and bound to the owning integration.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "token_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning integration (unique)
    #[sea_orm(unique)]
    pub integration_id: Uuid,

    pub access_token_ciphertext: Vec<u8>,

    /// Absent for systems without refresh tokens (Jira API tokens)
    pub refresh_token_ciphertext: Option<Vec<u8>>,

    pub token_type: String,

    pub expires_at: Option<DateTimeWithTimeZone>,

    pub updated_at: DateTimeWithTimeZone,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("id", &self.id)
            .field("integration_id", &self.integration_id)
            .field("has_refresh_token", &self.refresh_token_ciphertext.is_some())
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("updated_at", &self.updated_at)
            .finish_non_exhaustive()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::integration::Entity",
        from = "Column::IntegrationId",
        to = "super::integration::Column::Id",
        on_delete = "Cascade"
    )]
    Integration,
}

impl Related<super::integration::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Integration.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
