//! # Diagnostic Handlers
//!
//! Read-only, operator-only view across all users' integrations. Token
//! material is reduced to presence, length and a short prefix.

use axum::{
    extract::{Query, State, rejection::QueryRejection},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::credential_store::IntegrationDiagnostic;
use crate::error::{ApiError, validation_error};
use crate::models::{IntegrationStatus, SystemType};
use crate::repositories::IntegrationFilter;
use crate::server::AppState;

/// Query parameters for the diagnostic listing
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DiagnosticsQuery {
    /// `salesforce` or `jira`
    pub system_type: Option<String>,
    /// `active`, `disconnected` or `error`
    pub status: Option<String>,
    /// Owning user id (UUID)
    pub user_id: Option<String>,
}

impl DiagnosticsQuery {
    fn into_filter(self) -> Result<IntegrationFilter, ApiError> {
        let mut field_errors = serde_json::Map::new();

        let system_type = parse_optional::<SystemType>(self.system_type, "system_type", &mut field_errors);
        let status =
            parse_optional::<IntegrationStatus>(self.status, "status", &mut field_errors);
        let user_id = parse_optional::<Uuid>(self.user_id, "user_id", &mut field_errors);

        if !field_errors.is_empty() {
            return Err(validation_error(
                "Invalid query parameters",
                serde_json::Value::Object(field_errors),
            ));
        }

        Ok(IntegrationFilter {
            system_type,
            status,
            user_id,
        })
    }
}

fn parse_optional<T: std::str::FromStr>(
    raw: Option<String>,
    field: &str,
    field_errors: &mut serde_json::Map<String, serde_json::Value>,
) -> Option<T> {
    let raw = raw.filter(|value| !value.trim().is_empty())?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            field_errors.insert(field.to_string(), json!(format!("invalid value '{}'", raw)));
            None
        }
    }
}

/// Diagnostic listing response
#[derive(Debug, Serialize, ToSchema)]
pub struct DiagnosticsResponse {
    pub integrations: Vec<IntegrationDiagnostic>,
    pub count: usize,
}

/// List integrations with redacted token state
#[utoipa::path(
    get,
    path = "/diagnostics/integrations",
    security(("bearer_auth" = [])),
    params(DiagnosticsQuery),
    responses(
        (status = 200, description = "Integrations, newest first", body = DiagnosticsResponse),
        (status = 400, description = "Invalid filter value", body = ApiError),
        (status = 401, description = "Missing or invalid operator token", body = ApiError)
    ),
    tag = "diagnostics"
)]
pub async fn list_integrations(
    State(state): State<AppState>,
    _operator: OperatorAuth,
    query: Result<Query<DiagnosticsQuery>, QueryRejection>,
) -> Result<Json<DiagnosticsResponse>, ApiError> {
    let Query(query) = query.map_err(|rejection| {
        validation_error(
            "Invalid query string",
            json!({ "query": rejection.body_text() }),
        )
    })?;
    let filter = query.into_filter()?;

    let integrations = state.store.list_for_diagnostics(&filter).await?;

    tracing::info!(
        count = integrations.len(),
        system_type = ?filter.system_type,
        status = ?filter.status,
        user_id = ?filter.user_id,
        "Served integration diagnostics"
    );

    Ok(Json(DiagnosticsResponse {
        count: integrations.len(),
        integrations,
    }))
}
