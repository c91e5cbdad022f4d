//! Jira Cloud credential verification.
//!
//! Jira is connected with a site URL, account email and API token. The
//! credential is checked against `/myself` before anything is stored.

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::models::JiraMetadata;

#[derive(Debug, Error)]
pub enum JiraError {
    #[error("invalid Jira site URL: {0}")]
    InvalidBaseUrl(String),
    #[error("Jira host '{0}' is not allowed")]
    HostNotAllowed(String),
    #[error("Jira rejected the credential with status {status}")]
    Rejected { status: u16 },
    #[error("malformed Jira response: {0}")]
    MalformedResponse(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// The account returned by `GET /rest/api/3/myself`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JiraAccount {
    pub account_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
}

impl JiraAccount {
    pub fn metadata(&self) -> JiraMetadata {
        JiraMetadata {
            account_id: Some(self.account_id.clone()),
            display_name: self.display_name.clone(),
            email: self.email_address.clone(),
        }
    }
}

/// Normalizes a Jira site URL: absolute http(s), no query or fragment, no trailing slash.
/// Plain http is accepted only when `allow_http` is set.
pub fn normalize_base_url(raw: &str, allow_http: bool) -> Result<String, JiraError> {
    let url = Url::parse(raw.trim()).map_err(|e| JiraError::InvalidBaseUrl(e.to_string()))?;

    match url.scheme() {
        "https" => {}
        "http" if allow_http => {}
        other => {
            return Err(JiraError::InvalidBaseUrl(format!(
                "unsupported scheme '{}'",
                other
            )));
        }
    }
    if url.host().is_none() {
        return Err(JiraError::InvalidBaseUrl("missing host".to_string()));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(JiraError::InvalidBaseUrl(
            "query and fragment are not allowed".to_string(),
        ));
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Checks the host of a normalized site URL against the configured allowlist.
/// `*.example.com` matches any subdomain of `example.com`; other entries match exactly.
pub fn ensure_host_allowed(base_url: &str, allowed_hosts: &[String]) -> Result<(), JiraError> {
    let url = Url::parse(base_url).map_err(|e| JiraError::InvalidBaseUrl(e.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| JiraError::InvalidBaseUrl("missing host".to_string()))?
        .to_ascii_lowercase();

    let allowed = allowed_hosts.iter().any(|pattern| {
        let pattern = pattern.trim().to_ascii_lowercase();
        match pattern.strip_prefix("*.") {
            Some(domain) => host
                .strip_suffix(domain)
                .is_some_and(|sub| sub.len() > 1 && sub.ends_with('.')),
            None => host == pattern,
        }
    });

    if allowed {
        Ok(())
    } else {
        Err(JiraError::HostNotAllowed(host))
    }
}

/// Calls `{base_url}{api_path}/myself` with basic auth.
pub async fn verify_credentials(
    http: &Client,
    base_url: &str,
    api_path: &str,
    email: &str,
    api_token: &str,
) -> Result<JiraAccount, JiraError> {
    let endpoint = format!(
        "{}/{}/myself",
        base_url.trim_end_matches('/'),
        api_path.trim_matches('/')
    );

    let response = http
        .get(&endpoint)
        .basic_auth(email, Some(api_token))
        .header("Accept", "application/json")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        tracing::warn!(status = status.as_u16(), "Jira credential verification failed");
        return Err(JiraError::Rejected {
            status: status.as_u16(),
        });
    }

    response
        .json::<JiraAccount>()
        .await
        .map_err(|e| JiraError::MalformedResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn base_url_normalization() {
        assert_eq!(
            normalize_base_url("https://acme.atlassian.net/", false).unwrap(),
            "https://acme.atlassian.net"
        );
        assert!(normalize_base_url("http://acme.atlassian.net", false).is_err());
        assert!(normalize_base_url("http://127.0.0.1:8080", true).is_ok());
        assert!(normalize_base_url("https://acme.atlassian.net?x=1", false).is_err());
        assert!(normalize_base_url("acme.atlassian.net", false).is_err());
    }

    #[tokio::test]
    async fn verifies_with_basic_auth() {
        let server = MockServer::start().await;
        // base64("me@acme.test:api-token")
        Mock::given(method("GET"))
            .and(path("/rest/api/3/myself"))
            .and(header(
                "authorization",
                "Basic bWVAYWNtZS50ZXN0OmFwaS10b2tlbg==",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accountId": "5b10ac8d82e05b22cc7d4ef5",
                "displayName": "Mia Krystof",
                "emailAddress": "me@acme.test",
                "active": true
            })))
            .mount(&server)
            .await;

        let account = verify_credentials(
            &Client::new(),
            &server.uri(),
            "/rest/api/3",
            "me@acme.test",
            "api-token",
        )
        .await
        .unwrap();

        assert_eq!(account.account_id, "5b10ac8d82e05b22cc7d4ef5");
        assert_eq!(account.display_name.as_deref(), Some("Mia Krystof"));
    }

    #[tokio::test]
    async fn rejected_credential_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/myself"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&server)
            .await;

        let error = verify_credentials(&Client::new(), &server.uri(), "rest/api/3", "a", "b")
            .await
            .unwrap_err();
        assert!(matches!(error, JiraError::Rejected { status: 401 }));
    }

    #[test]
    fn host_allowlist() {
        let allowed = vec!["*.atlassian.net".to_string(), "jira.acme.test".to_string()];

        assert!(ensure_host_allowed("https://acme.atlassian.net", &allowed).is_ok());
        assert!(ensure_host_allowed("https://ACME.Atlassian.net", &allowed).is_ok());
        assert!(ensure_host_allowed("https://jira.acme.test:8443", &allowed).is_ok());

        for rejected in [
            "https://atlassian.net",
            "https://evilatlassian.net",
            "https://acme.atlassian.net.evil.test",
            "https://169.254.169.254",
            "https://localhost",
        ] {
            assert!(
                matches!(
                    ensure_host_allowed(rejected, &allowed),
                    Err(JiraError::HostNotAllowed(_))
                ),
                "{rejected} should be rejected"
            );
        }
    }
}
