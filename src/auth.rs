//! # Authentication and Authorization
//!
//! Three kinds of caller reach this service:
//!
//! - end users, identified by the `fi_session` cookie minted by the
//!   application's session issuer ([`Principal`]);
//! - operators, presenting a bearer token on the diagnostic surface
//!   ([`OperatorAuth`]);
//! - trusted backend code that may read decrypted tokens ([`ServiceAccess`]).

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, header::COOKIE, request::Parts},
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac, digest::InvalidLength};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized};

type HmacSha256 = Hmac<Sha256>;

/// Name of the session cookie shared with the session issuer.
pub const SESSION_COOKIE: &str = "fi_session";

/// The authenticated application user a request acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
}

impl Principal {
    pub fn new(user_id: Uuid) -> Self {
        Self { user_id }
    }
}

/// Marker type for authenticated operator requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorAuth;

/// Capability required to read decrypted tokens.
///
/// Obtainable only by presenting the configured service token or from inside
/// the crate (OAuth callback, refresh job).
#[derive(Debug)]
pub struct ServiceAccess {
    _private: (),
}

impl ServiceAccess {
    /// Grants access when `presented` matches the configured service token.
    pub fn from_service_token(config: &AppConfig, presented: &str) -> Option<Self> {
        let configured = config.service_token.as_deref()?;
        if configured.is_empty() {
            return None;
        }

        bool::from(presented.as_bytes().ct_eq(configured.as_bytes()))
            .then_some(Self { _private: () })
    }

    pub(crate) fn trusted() -> Self {
        Self { _private: () }
    }
}

/// Signs a session value for `user_id`: `<uuid>.<hex hmac-sha256>`.
pub fn sign_session(secret: &str, user_id: Uuid) -> Result<String, InvalidLength> {
    let user = user_id.to_string();
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(user.as_bytes());
    Ok(format!(
        "{}.{}",
        user,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Verifies a session value and returns the principal it names.
pub fn verify_session(secret: &str, value: &str) -> Option<Principal> {
    let (user, signature) = value.split_once('.')?;
    let user_id = Uuid::parse_str(user).ok()?;
    let signature = hex::decode(signature).ok()?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(user.as_bytes());
    mac.verify_slice(&signature).ok()?;

    Some(Principal::new(user_id))
}

fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim_matches('"'))
}

impl<S> FromRequestParts<S> for Principal
where
    Arc<AppConfig>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = Arc::<AppConfig>::from_ref(state);

        let Some(secret) = config.session_secret.as_deref() else {
            tracing::error!("Session secret not configured; rejecting session");
            return Err(unauthorized(Some("Session required")));
        };

        let value = session_cookie(&parts.headers)
            .ok_or_else(|| unauthorized(Some("Session required")))?;

        verify_session(secret, value).ok_or_else(|| {
            tracing::debug!("Session cookie failed verification");
            unauthorized(Some("Invalid session"))
        })
    }
}

/// Middleware guarding operator routes with `Authorization: Bearer <token>`.
pub async fn operator_auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())?;
    validate_operator_token(&config, token)?;

    tracing::info!("Authenticated operator request");
    request.extensions_mut().insert(OperatorAuth);

    Ok(next.run(request).await)
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized(Some("Missing Authorization header")))?
        .to_str()
        .map_err(|_| unauthorized(Some("Invalid Authorization header")))?;

    header
        .strip_prefix("Bearer ")
        .ok_or_else(|| unauthorized(Some("Authorization header must use Bearer scheme")))
}

fn validate_operator_token(config: &AppConfig, token: &str) -> Result<(), ApiError> {
    let is_valid = config
        .operator_tokens
        .iter()
        .any(|configured| ConstantTimeEq::ct_eq(token.as_bytes(), configured.as_bytes()).into());

    if is_valid {
        Ok(())
    } else {
        Err(unauthorized(Some("Invalid bearer token")))
    }
}

impl<S> FromRequestParts<S> for OperatorAuth
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<OperatorAuth>()
            .copied()
            .ok_or_else(|| unauthorized(Some("Operator authentication required")))
    }
}
