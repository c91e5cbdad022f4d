//! Integration repository for database operations
//!
//! Thin SeaORM wrapper over the `integrations` table. Generic over the
//! connection so the credential store can run several calls inside one
//! transaction.

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::integration::{self, Entity as Integration};
use crate::models::{IntegrationStatus, SystemType};

/// Optional filters for listing integrations across users.
#[derive(Debug, Clone, Default)]
pub struct IntegrationFilter {
    pub system_type: Option<SystemType>,
    pub status: Option<IntegrationStatus>,
    pub user_id: Option<Uuid>,
}

/// Repository for integration rows
pub struct IntegrationRepository<'a, C> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> IntegrationRepository<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Finds an integration by id without user scoping
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<integration::Model>, DbErr> {
        Integration::find_by_id(id).one(self.conn).await
    }

    /// Most recently connected integration for the user and system, any status
    pub async fn find_latest_for_user(
        &self,
        user_id: Uuid,
        system_type: SystemType,
    ) -> Result<Option<integration::Model>, DbErr> {
        Integration::find()
            .filter(integration::Column::UserId.eq(user_id))
            .filter(integration::Column::SystemType.eq(system_type.as_str()))
            .order_by_desc(integration::Column::ConnectedAt)
            .order_by_desc(integration::Column::Id)
            .one(self.conn)
            .await
    }

    /// The active integration for the user and system, if any
    pub async fn find_active_for_user(
        &self,
        user_id: Uuid,
        system_type: SystemType,
    ) -> Result<Option<integration::Model>, DbErr> {
        Integration::find()
            .filter(integration::Column::UserId.eq(user_id))
            .filter(integration::Column::SystemType.eq(system_type.as_str()))
            .filter(integration::Column::Status.eq(IntegrationStatus::Active.as_str()))
            .order_by_desc(integration::Column::ConnectedAt)
            .one(self.conn)
            .await
    }

    /// Marks every active row for the pair as disconnected and returns the count
    pub async fn supersede_active(
        &self,
        user_id: Uuid,
        system_type: SystemType,
        now: DateTimeWithTimeZone,
    ) -> Result<u64, DbErr> {
        let result = Integration::update_many()
            .col_expr(
                integration::Column::Status,
                Expr::value(IntegrationStatus::Disconnected.as_str()),
            )
            .col_expr(integration::Column::UpdatedAt, Expr::value(now))
            .filter(integration::Column::UserId.eq(user_id))
            .filter(integration::Column::SystemType.eq(system_type.as_str()))
            .filter(integration::Column::Status.eq(IntegrationStatus::Active.as_str()))
            .exec(self.conn)
            .await?;

        Ok(result.rows_affected)
    }

    /// Inserts a new active integration
    pub async fn insert_active(
        &self,
        user_id: Uuid,
        system_type: SystemType,
        instance_url: Option<String>,
        metadata: Option<JsonValue>,
        now: DateTimeWithTimeZone,
    ) -> Result<integration::Model, DbErr> {
        integration::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            system_type: Set(system_type.as_str().to_string()),
            status: Set(IntegrationStatus::Active.as_str().to_string()),
            instance_url: Set(instance_url),
            metadata: Set(metadata),
            connected_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.conn)
        .await
    }

    /// Sets the status only while the row is still active, returning the
    /// updated row or `None` when nothing changed
    pub async fn transition_from_active(
        &self,
        id: Uuid,
        status: IntegrationStatus,
    ) -> Result<Option<integration::Model>, DbErr> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let result = Integration::update_many()
            .col_expr(integration::Column::Status, Expr::value(status.as_str()))
            .col_expr(integration::Column::UpdatedAt, Expr::value(now))
            .filter(integration::Column::Id.eq(id))
            .filter(integration::Column::Status.eq(IntegrationStatus::Active.as_str()))
            .exec(self.conn)
            .await?;

        if result.rows_affected == 0 {
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    /// Lists integrations newest first, optionally filtered
    pub async fn list(&self, filter: &IntegrationFilter) -> Result<Vec<integration::Model>, DbErr> {
        let mut query = Integration::find();

        if let Some(system_type) = filter.system_type {
            query = query.filter(integration::Column::SystemType.eq(system_type.as_str()));
        }
        if let Some(status) = filter.status {
            query = query.filter(integration::Column::Status.eq(status.as_str()));
        }
        if let Some(user_id) = filter.user_id {
            query = query.filter(integration::Column::UserId.eq(user_id));
        }

        query
            .order_by_desc(integration::Column::ConnectedAt)
            .order_by_desc(integration::Column::Id)
            .all(self.conn)
            .await
    }
}
