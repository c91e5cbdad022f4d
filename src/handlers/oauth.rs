//! # OAuth Handlers
//!
//! Browser-facing Salesforce OAuth routes. Both always answer with a
//! `307 Temporary Redirect`; failures land on the fallback page with an
//! `error=` reason.

use axum::{
    extract::{Query, State, rejection::QueryRejection},
    response::Redirect,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::auth::{Principal, ServiceAccess};
use crate::error::ApiError;
use crate::models::SystemType;
use crate::oauth::salesforce::{SalesforceClient, SalesforceError};
use crate::oauth::{self, OAuthFailure, build_authorize_url};
use crate::server::AppState;

/// Query parameters Salesforce appends to the callback URL
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackQuery {
    /// Authorization code
    pub code: Option<String>,
    /// Echoed by the provider but not checked: the authorize URL carries no
    /// state, so the callback is bound to the signed session cookie and its
    /// `SameSite` attribute alone.
    pub state: Option<String>,
    /// Provider error code, e.g. `access_denied`
    pub error: Option<String>,
    pub error_description: Option<String>,
}

fn fail(state: &AppState, failure: OAuthFailure) -> Redirect {
    Redirect::temporary(&oauth::fallback_redirect_url(&state.config, failure))
}

/// Start the Salesforce OAuth flow
///
/// Redirects the browser to the Salesforce authorize page.
#[utoipa::path(
    get,
    path = "/oauth/salesforce/authorize",
    responses(
        (status = 307, description = "Redirect to Salesforce, or to the fallback page with `error=oauth_config_missing|oauth_config_invalid|unauthenticated`")
    ),
    tag = "oauth"
)]
pub async fn authorize(
    State(state): State<AppState>,
    principal: Result<Principal, ApiError>,
) -> Redirect {
    let url = match build_authorize_url(&state.config) {
        Ok(url) => url,
        Err(error) => {
            let failure = error.failure();
            tracing::error!(
                error = %error,
                reason = failure.as_str(),
                "Cannot build Salesforce authorize URL"
            );
            return fail(&state, failure);
        }
    };

    let principal = match principal {
        Ok(principal) => principal,
        Err(_) => {
            tracing::info!("OAuth authorize without a valid session");
            return fail(&state, OAuthFailure::Unauthenticated);
        }
    };

    tracing::info!(
        user_id = %principal.user_id,
        system_type = %SystemType::Salesforce,
        "Redirecting to Salesforce authorize"
    );
    Redirect::temporary(url.as_str())
}

/// Complete the Salesforce OAuth flow
///
/// Exchanges the authorization code and stores the integration with its tokens.
#[utoipa::path(
    get,
    path = "/oauth/salesforce/callback",
    params(CallbackQuery),
    responses(
        (status = 307, description = "Redirect to the success page with `connected=salesforce`, or to the fallback page with `error=unauthenticated|provider_denied|missing_code|token_exchange_failed|store_failed`")
    ),
    tag = "oauth"
)]
pub async fn callback(
    State(state): State<AppState>,
    principal: Result<Principal, ApiError>,
    query: Result<Query<CallbackQuery>, QueryRejection>,
) -> Redirect {
    let Ok(principal) = principal else {
        tracing::info!("OAuth callback without a valid session");
        return fail(&state, OAuthFailure::Unauthenticated);
    };
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "Unparseable OAuth callback query");
            CallbackQuery::default()
        }
    };

    if let Some(error) = query.error.as_deref() {
        tracing::warn!(
            user_id = %principal.user_id,
            provider_error = error,
            description = query.error_description.as_deref().unwrap_or_default(),
            "Salesforce returned an authorization error"
        );
        return fail(&state, OAuthFailure::ProviderDenied);
    }

    let Some(code) = query.code.as_deref().filter(|code| !code.trim().is_empty()) else {
        return fail(&state, OAuthFailure::MissingCode);
    };

    let client = SalesforceClient::new(state.http.clone(), state.config.salesforce.clone());
    let response = match client.exchange_code(code).await {
        Ok(response) => response,
        Err(SalesforceError::MissingClientCredentials) => {
            tracing::error!("Salesforce client credentials missing at callback");
            return fail(&state, OAuthFailure::ConfigMissing);
        }
        Err(error) => {
            tracing::warn!(
                user_id = %principal.user_id,
                error = %error,
                "Salesforce token exchange failed"
            );
            return fail(&state, OAuthFailure::TokenExchangeFailed);
        }
    };

    let tokens = response.token_pair(client.session_ttl_seconds(), None);
    let result = state
        .store
        .complete_connection(
            &principal,
            &ServiceAccess::trusted(),
            SystemType::Salesforce,
            response.instance_url.clone(),
            Some(response.metadata()),
            &tokens,
        )
        .await;

    match result {
        Ok(_) => Redirect::temporary(&oauth::success_redirect_url(
            &state.config,
            SystemType::Salesforce,
        )),
        Err(error) => {
            tracing::error!(
                user_id = %principal.user_id,
                error = %error,
                "Failed to store Salesforce integration"
            );
            fail(&state, OAuthFailure::StoreFailed)
        }
    }
}
