//! # Error Handling
//!
//! JSON error envelope for the integrations API. Every error response carries
//! a short machine code, a human message and the request trace id, served as
//! `application/problem+json`. Internal details are logged, never returned.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::telemetry;

/// Machine-readable codes used in [`ApiError::code`].
pub mod codes {
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const CONFLICT: &str = "CONFLICT";
    pub const PROVIDER_ERROR: &str = "PROVIDER_ERROR";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
}

/// Upstream bodies are cut to this many characters in error details.
const PROVIDER_SNIPPET_CHARS: usize = 200;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// One of the [`codes`]
    pub code: Box<str>,
    pub message: Box<str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Correlation id, also returned as `x-trace-id`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            trace_id: Self::current_trace_id(),
        }
    }

    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    // Outside a request scope (background jobs, unit tests) a short local id is used.
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        (self.status, headers, axum::Json(self)).into_response()
    }
}

/// Detail payload for upstream failures
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProviderError {
    /// `salesforce` or `jira`
    pub provider: String,
    /// Upstream HTTP status
    pub status: u16,
    pub body_snippet: Option<String>,
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!(error = ?error, "Unhandled internal error");
        internal_error()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(
            StatusCode::BAD_REQUEST,
            codes::VALIDATION_FAILED.to_string(),
            message,
        )
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        // Two connects racing for the same (user, system) trip the one-active index.
        if is_unique_violation(&error) {
            tracing::warn!(error = %error, "Concurrent integration write rejected");
            return Self::new(
                StatusCode::CONFLICT,
                codes::CONFLICT,
                "Integration changed concurrently; retry",
            );
        }

        match error {
            sea_orm::DbErr::RecordNotFound(record) => {
                tracing::debug!(record = %record, "Record not found");
                not_found("Integration not found")
            }
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!(error = ?connection_err, "Database connection error");
                service_unavailable("Database unreachable")
            }
            other => {
                tracing::error!(error = ?other, "Database error");
                internal_error()
            }
        }
    }
}

fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    db_error.is_unique_violation()
        || db_error.code().is_some_and(|code| {
            let code = code.as_ref();
            code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code)
        })
}

/// 502 for an upstream provider failure, with a truncated body snippet.
pub fn provider_error(provider: &str, status: u16, body: Option<String>) -> ApiError {
    let details = ProviderError {
        provider: provider.to_string(),
        status,
        body_snippet: body.map(|b| {
            if b.chars().count() > PROVIDER_SNIPPET_CHARS {
                let truncated: String = b.chars().take(PROVIDER_SNIPPET_CHARS).collect();
                format!("{}...", truncated)
            } else {
                b
            }
        }),
    };

    ApiError::new(
        StatusCode::BAD_GATEWAY,
        codes::PROVIDER_ERROR.to_string(),
        format!("{} returned status {}", provider, status),
    )
    .with_details(json!(details))
}

/// 502 when a provider could not be reached or answered garbage.
pub fn provider_unreachable(provider: &str) -> ApiError {
    ApiError::new(
        StatusCode::BAD_GATEWAY,
        codes::PROVIDER_ERROR.to_string(),
        format!("{} could not be reached", provider),
    )
    .with_details(json!({ "provider": provider }))
}

pub fn unauthorized(message: Option<&str>) -> ApiError {
    ApiError::new(
        StatusCode::UNAUTHORIZED,
        codes::UNAUTHORIZED,
        message.unwrap_or("Authentication required"),
    )
}

pub fn not_found(message: &str) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message)
}

pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, codes::VALIDATION_FAILED, message)
        .with_details(field_errors)
}

pub fn service_unavailable(message: &str) -> ApiError {
    ApiError::new(
        StatusCode::SERVICE_UNAVAILABLE,
        codes::SERVICE_UNAVAILABLE,
        message,
    )
}

/// Generic 500; the cause belongs in the logs.
pub fn internal_error() -> ApiError {
    ApiError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        codes::INTERNAL_SERVER_ERROR,
        "An internal error occurred",
    )
}
