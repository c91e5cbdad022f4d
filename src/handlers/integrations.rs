//! # Integration Handlers
//!
//! Session-authenticated routes for the caller's own integrations. No secret
//! material is ever returned.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{Principal, ServiceAccess};
use crate::error::{ApiError, not_found, provider_error, provider_unreachable, validation_error};
use crate::jira::{self, JiraError};
use crate::models::{IntegrationMetadata, SystemType, TokenPair, integration};
use crate::server::AppState;

/// Integration as seen by its owner
#[derive(Debug, Serialize, ToSchema)]
pub struct IntegrationView {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub system_type: String,
    /// `active` | `disconnected` | `error`
    pub status: String,
    pub instance_url: Option<String>,
    pub metadata: Option<IntegrationMetadata>,
    pub connected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Whether a token record is stored
    pub has_tokens: bool,
}

impl IntegrationView {
    fn from_model(model: integration::Model, has_tokens: bool) -> Self {
        let metadata = model.typed_metadata().unwrap_or_else(|error| {
            tracing::warn!(
                integration_id = %model.id,
                error = %error,
                "Stored integration metadata does not decode"
            );
            None
        });

        Self {
            id: model.id,
            system_type: model.system_type,
            status: model.status,
            instance_url: model.instance_url,
            metadata,
            connected_at: model.connected_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
            has_tokens,
        }
    }
}

/// Jira site credential
#[derive(Deserialize, ToSchema)]
pub struct ConnectJiraRequest {
    /// Jira Cloud site, e.g. `https://acme.atlassian.net`
    pub base_url: String,
    /// Atlassian account email
    pub email: String,
    /// Atlassian API token
    pub api_token: String,
}

fn parse_system_type(raw: &str) -> Result<SystemType, ApiError> {
    raw.parse()
        .map_err(|_| not_found(&format!("Unknown system type '{}'", raw)))
}

/// Get the caller's integration
#[utoipa::path(
    get,
    path = "/integrations/{system_type}",
    params(("system_type" = String, Path, description = "`salesforce` or `jira`")),
    responses(
        (status = 200, description = "Most recent integration for the system", body = IntegrationView),
        (status = 401, description = "Missing or invalid session", body = ApiError),
        (status = 404, description = "No integration for this system", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn get_integration(
    State(state): State<AppState>,
    principal: Principal,
    Path(system_type): Path<String>,
) -> Result<Json<IntegrationView>, ApiError> {
    let system_type = parse_system_type(&system_type)?;

    let integration = state
        .store
        .get_integration(&principal, system_type)
        .await?
        .ok_or_else(|| not_found(&format!("No {} integration", system_type)))?;
    let has_tokens = state.store.has_tokens(integration.id).await?;

    Ok(Json(IntegrationView::from_model(integration, has_tokens)))
}

/// Disconnect the caller's integration
#[utoipa::path(
    delete,
    path = "/integrations/{system_type}",
    params(("system_type" = String, Path, description = "`salesforce` or `jira`")),
    responses(
        (status = 200, description = "Integration disconnected and tokens removed", body = IntegrationView),
        (status = 401, description = "Missing or invalid session", body = ApiError),
        (status = 404, description = "No active integration", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn delete_integration(
    State(state): State<AppState>,
    principal: Principal,
    Path(system_type): Path<String>,
) -> Result<Json<IntegrationView>, ApiError> {
    let system_type = parse_system_type(&system_type)?;

    let integration = state
        .store
        .disconnect(&principal, system_type)
        .await?
        .ok_or_else(|| not_found(&format!("No active {} integration", system_type)))?;

    Ok(Json(IntegrationView::from_model(integration, false)))
}

/// Connect Jira with an API token
///
/// Only `jira` accepts this route; Salesforce connects through OAuth.
#[utoipa::path(
    post,
    path = "/integrations/{system_type}",
    params(("system_type" = String, Path, description = "Must be `jira`")),
    request_body = ConnectJiraRequest,
    responses(
        (status = 201, description = "Jira connected", body = IntegrationView),
        (status = 400, description = "Invalid request or unsupported system", body = ApiError),
        (status = 401, description = "Missing or invalid session", body = ApiError),
        (status = 502, description = "Jira rejected the credential", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn connect_integration(
    State(state): State<AppState>,
    principal: Principal,
    Path(system_type): Path<String>,
    payload: Result<Json<ConnectJiraRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<IntegrationView>), ApiError> {
    match parse_system_type(&system_type)? {
        SystemType::Jira => {}
        SystemType::Salesforce => {
            return Err(validation_error(
                "Salesforce connects through /oauth/salesforce/authorize",
                json!({ "system_type": "must be jira" }),
            ));
        }
    }

    let Json(request) = payload?;

    let mut field_errors = serde_json::Map::new();
    if request.email.trim().is_empty() {
        field_errors.insert("email".into(), json!("must not be blank"));
    }
    if request.api_token.trim().is_empty() {
        field_errors.insert("api_token".into(), json!("must not be blank"));
    }
    let base_url = jira::normalize_base_url(&request.base_url, state.config.is_local_profile())
        .and_then(|base_url| {
            jira::ensure_host_allowed(&base_url, &state.config.jira_allowed_hosts).map(|()| base_url)
        });
    let base_url = match base_url {
        Ok(base_url) => Some(base_url),
        Err(error) => {
            field_errors.insert("base_url".into(), json!(error.to_string()));
            None
        }
    };
    let Some(base_url) = base_url.filter(|_| field_errors.is_empty()) else {
        return Err(validation_error(
            "Validation failed",
            serde_json::Value::Object(field_errors),
        ));
    };

    let email = request.email.trim();
    let account = jira::verify_credentials(
        &state.http,
        &base_url,
        &state.config.jira_api_path,
        email,
        request.api_token.trim(),
    )
    .await
    .map_err(|error| match error {
        JiraError::Rejected { status } => provider_error("jira", status, None),
        other => {
            tracing::warn!(error = %other, "Jira verification did not complete");
            provider_unreachable("jira")
        }
    })?;

    // Basic auth needs the login email, which `/myself` may hide.
    let mut metadata = account.metadata();
    metadata.email = Some(email.to_string());
    let tokens = TokenPair::new(request.api_token.trim()).with_token_type("Basic");

    let integration = state
        .store
        .complete_connection(
            &principal,
            &ServiceAccess::trusted(),
            SystemType::Jira,
            Some(base_url),
            Some(IntegrationMetadata::Jira(metadata)),
            &tokens,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(IntegrationView::from_model(integration, true)),
    ))
}
