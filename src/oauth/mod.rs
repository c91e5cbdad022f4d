//! Salesforce OAuth web-server flow.
//!
//! The authorize URL is built from configuration alone. Every failure on the
//! browser-facing routes ends in a redirect to the configured fallback page
//! with a short `error=` reason instead of an error status.

use thiserror::Error;
use url::{Host, Url, form_urlencoded};

use crate::config::AppConfig;
use crate::models::SystemType;

pub mod refresh;
pub mod salesforce;

/// Upper bound on the generated authorize URL.
pub const MAX_AUTHORIZE_URL_LEN: usize = 2048;

/// Reason appended to the fallback redirect as `?error=<reason>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthFailure {
    ConfigMissing,
    ConfigInvalid,
    Unauthenticated,
    ProviderDenied,
    MissingCode,
    TokenExchangeFailed,
    StoreFailed,
}

impl OAuthFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthFailure::ConfigMissing => "oauth_config_missing",
            OAuthFailure::ConfigInvalid => "oauth_config_invalid",
            OAuthFailure::Unauthenticated => "unauthenticated",
            OAuthFailure::ProviderDenied => "provider_denied",
            OAuthFailure::MissingCode => "missing_code",
            OAuthFailure::TokenExchangeFailed => "token_exchange_failed",
            OAuthFailure::StoreFailed => "store_failed",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthorizeUrlError {
    #[error("Salesforce client id is not configured")]
    MissingClientId,
    #[error("Salesforce redirect URI is not configured")]
    MissingRedirectUri,
    #[error("authorize endpoint is not a valid URL: {0}")]
    InvalidEndpoint(String),
    #[error("authorize endpoint must use https")]
    InsecureEndpoint,
    #[error("authorize endpoint must not carry a query or fragment")]
    EndpointHasQueryOrFragment,
    #[error("redirect URI must be an absolute http(s) URL: {0}")]
    InvalidRedirectUri(String),
    #[error("no OAuth scopes configured")]
    MissingScopes,
    #[error("authorize URL is {0} characters, above the limit")]
    TooLong(usize),
}

impl AuthorizeUrlError {
    /// Fallback reason reported to the browser.
    pub fn failure(&self) -> OAuthFailure {
        match self {
            AuthorizeUrlError::MissingClientId | AuthorizeUrlError::MissingRedirectUri => {
                OAuthFailure::ConfigMissing
            }
            _ => OAuthFailure::ConfigInvalid,
        }
    }
}

/// Builds the Salesforce authorize URL:
/// `response_type`, `client_id`, `redirect_uri`, `scope`, `prompt`, in that order.
pub fn build_authorize_url(config: &AppConfig) -> Result<Url, AuthorizeUrlError> {
    let salesforce = &config.salesforce;

    let client_id = salesforce
        .client_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or(AuthorizeUrlError::MissingClientId)?;
    let redirect_uri = salesforce
        .redirect_uri
        .as_deref()
        .map(str::trim)
        .filter(|uri| !uri.is_empty())
        .ok_or(AuthorizeUrlError::MissingRedirectUri)?;

    validate_redirect_uri(redirect_uri)?;

    let scope = salesforce.scopes.join(" ");
    if scope.trim().is_empty() {
        return Err(AuthorizeUrlError::MissingScopes);
    }

    let mut url = Url::parse(&salesforce.authorize_endpoint())
        .map_err(|e| AuthorizeUrlError::InvalidEndpoint(e.to_string()))?;
    validate_endpoint(&url, config.is_local_profile())?;

    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", &scope)
        .append_pair("prompt", "login");

    let length = url.as_str().len();
    if length > MAX_AUTHORIZE_URL_LEN {
        return Err(AuthorizeUrlError::TooLong(length));
    }

    Ok(url)
}

fn validate_endpoint(url: &Url, allow_loopback_http: bool) -> Result<(), AuthorizeUrlError> {
    match url.scheme() {
        "https" => {}
        "http" if allow_loopback_http && is_loopback(url) => {}
        _ => return Err(AuthorizeUrlError::InsecureEndpoint),
    }

    if url.query().is_some() || url.fragment().is_some() {
        return Err(AuthorizeUrlError::EndpointHasQueryOrFragment);
    }

    Ok(())
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain == "localhost",
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

fn validate_redirect_uri(redirect_uri: &str) -> Result<(), AuthorizeUrlError> {
    let parsed = Url::parse(redirect_uri)
        .map_err(|e| AuthorizeUrlError::InvalidRedirectUri(e.to_string()))?;

    if !matches!(parsed.scheme(), "http" | "https") || parsed.host().is_none() {
        return Err(AuthorizeUrlError::InvalidRedirectUri(
            redirect_uri.to_string(),
        ));
    }

    Ok(())
}

/// `{oauth_fallback_url}?error=<reason>`, appending to any existing query.
pub fn fallback_redirect_url(config: &AppConfig, failure: OAuthFailure) -> String {
    append_query(&config.oauth_fallback_url, "error", failure.as_str())
}

/// `{oauth_success_url}?connected=<system>`.
pub fn success_redirect_url(config: &AppConfig, system_type: SystemType) -> String {
    append_query(&config.oauth_success_url, "connected", system_type.as_str())
}

// The target may be a relative path, so it is not parsed as a `Url`.
fn append_query(target: &str, key: &str, value: &str) -> String {
    let (base, fragment) = match target.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (target, None),
    };

    let pair = form_urlencoded::Serializer::new(String::new())
        .append_pair(key, value)
        .finish();

    let separator = match base.contains('?') {
        true if base.ends_with('?') || base.ends_with('&') => "",
        true => "&",
        false => "?",
    };

    match fragment {
        Some(fragment) => format!("{base}{separator}{pair}#{fragment}"),
        None => format!("{base}{separator}{pair}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SalesforceConfig;

    fn config_with(client_id: Option<&str>, redirect_uri: Option<&str>) -> AppConfig {
        AppConfig {
            salesforce: SalesforceConfig {
                client_id: client_id.map(str::to_string),
                redirect_uri: redirect_uri.map(str::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn authorize_url_matches_expected_shape() {
        let config = config_with(Some("abc123"), Some("https://app.example/callback"));
        let url = build_authorize_url(&config).unwrap();

        assert_eq!(
            url.as_str(),
            "https://login.salesforce.com/services/oauth2/authorize?response_type=code&client_id=abc123&redirect_uri=https%3A%2F%2Fapp.example%2Fcallback&scope=api+refresh_token&prompt=login"
        );
    }

    #[test]
    fn authorize_url_has_exactly_five_params_in_order() {
        let config = config_with(Some("client"), Some("https://app.example/callback?x=1"));
        let url = build_authorize_url(&config).unwrap();

        let keys: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        assert_eq!(
            keys,
            ["response_type", "client_id", "redirect_uri", "scope", "prompt"]
        );
        assert!(url.query_pairs().any(|(k, v)| k == "prompt" && v == "login"));
    }

    #[test]
    fn missing_settings_map_to_config_missing() {
        let missing_id = build_authorize_url(&config_with(None, Some("https://a.example/cb")));
        assert_eq!(missing_id, Err(AuthorizeUrlError::MissingClientId));
        assert_eq!(
            missing_id.unwrap_err().failure(),
            OAuthFailure::ConfigMissing
        );

        let blank_redirect = build_authorize_url(&config_with(Some("abc"), Some("  ")));
        assert_eq!(blank_redirect, Err(AuthorizeUrlError::MissingRedirectUri));
    }

    #[test]
    fn insecure_endpoint_is_invalid() {
        let mut config = config_with(Some("abc"), Some("https://a.example/cb"));
        config.profile = "production".to_string();
        config.salesforce.login_base = "http://login.example.com".to_string();

        let error = build_authorize_url(&config).unwrap_err();
        assert_eq!(error, AuthorizeUrlError::InsecureEndpoint);
        assert_eq!(error.failure(), OAuthFailure::ConfigInvalid);
    }

    #[test]
    fn loopback_http_allowed_for_local_profile() {
        let mut config = config_with(Some("abc"), Some("http://localhost:3000/cb"));
        config.salesforce.login_base = "http://127.0.0.1:9999".to_string();
        assert!(build_authorize_url(&config).is_ok());

        config.profile = "production".to_string();
        assert_eq!(
            build_authorize_url(&config),
            Err(AuthorizeUrlError::InsecureEndpoint)
        );
    }

    #[test]
    fn relative_redirect_uri_is_invalid() {
        let config = config_with(Some("abc"), Some("/callback"));
        assert!(matches!(
            build_authorize_url(&config),
            Err(AuthorizeUrlError::InvalidRedirectUri(_))
        ));
    }

    #[test]
    fn overlong_url_is_rejected() {
        let long_id = "a".repeat(MAX_AUTHORIZE_URL_LEN);
        let config = config_with(Some(&long_id), Some("https://a.example/cb"));
        assert!(matches!(
            build_authorize_url(&config),
            Err(AuthorizeUrlError::TooLong(_))
        ));
    }

    #[test]
    fn fallback_and_success_urls() {
        let config = AppConfig {
            oauth_fallback_url: "https://app.example/settings?tab=integrations#top".to_string(),
            oauth_success_url: "/settings/integrations".to_string(),
            ..Default::default()
        };

        assert_eq!(
            fallback_redirect_url(&config, OAuthFailure::ConfigMissing),
            "https://app.example/settings?tab=integrations&error=oauth_config_missing#top"
        );
        assert_eq!(
            success_redirect_url(&config, SystemType::Salesforce),
            "/settings/integrations?connected=salesforce"
        );
    }
}
