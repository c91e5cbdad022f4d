//! Integration entity model
//!
//! One row per connection between an application user and an external system.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{IntegrationMetadata, IntegrationStatus, ParseEnumError, SystemType};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "integrations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Application user that owns the integration
    pub user_id: Uuid,

    /// `salesforce` | `jira`
    pub system_type: String,

    /// `active` | `disconnected` | `error`
    pub status: String,

    /// Salesforce instance URL or Jira site URL
    pub instance_url: Option<String>,

    /// Serialized [`IntegrationMetadata`]
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub metadata: Option<JsonValue>,

    pub connected_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::token_record::Entity")]
    TokenRecord,
}

impl Related<super::token_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TokenRecord.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn system_type(&self) -> Result<SystemType, ParseEnumError> {
        self.system_type.parse()
    }

    pub fn status(&self) -> Result<IntegrationStatus, ParseEnumError> {
        self.status.parse()
    }

    pub fn is_active(&self) -> bool {
        self.status == IntegrationStatus::Active.as_str()
    }

    /// Decodes the stored metadata column.
    pub fn typed_metadata(&self) -> Result<Option<IntegrationMetadata>, serde_json::Error> {
        self.metadata
            .clone()
            .map(serde_json::from_value)
            .transpose()
    }
}
