//! Configuration loading for the integrations service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `FRICTION_`, producing a typed [`AppConfig`] that is built once at start-up
//! and injected into handlers and services.

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "FRICTION_";
const REDACTED: &str = "[REDACTED]";
/// Salesforce session timeouts range from 15 minutes to 24 hours.
const MIN_SESSION_TTL_SECONDS: u64 = 60;
const MAX_SESSION_TTL_SECONDS: u64 = 86_400;

/// Application configuration derived from `FRICTION_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    /// Bearer tokens accepted on the diagnostic surface.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operator_tokens: Vec<String>,
    /// Service-level credential that unlocks raw token reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    /// HMAC secret shared with the session issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_secret: Option<String>,
    #[serde(default)]
    pub salesforce: SalesforceConfig,
    #[serde(default = "default_jira_api_path")]
    pub jira_api_path: String,
    /// Hosts a Jira site URL may point at. `*.example.com` matches subdomains only.
    #[serde(default = "default_jira_allowed_hosts")]
    pub jira_allowed_hosts: Vec<String>,
    /// Page the browser lands on when an OAuth flow fails; `error=<reason>` is appended.
    #[serde(default = "default_oauth_fallback_url")]
    pub oauth_fallback_url: String,
    /// Page the browser lands on after a successful callback.
    #[serde(default = "default_oauth_success_url")]
    pub oauth_success_url: String,
}

/// Salesforce connected-app settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SalesforceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Must match the callback URL registered on the connected app exactly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    #[serde(default = "default_salesforce_login_base")]
    pub login_base: String,
    #[serde(default = "default_salesforce_scopes")]
    pub scopes: Vec<String>,
    /// Salesforce does not report token lifetimes; this approximates the org session timeout.
    #[serde(default = "default_salesforce_session_ttl_seconds")]
    pub session_ttl_seconds: u64,
}

impl Default for SalesforceConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_uri: None,
            login_base: default_salesforce_login_base(),
            scopes: default_salesforce_scopes(),
            session_ttl_seconds: default_salesforce_session_ttl_seconds(),
        }
    }
}

impl SalesforceConfig {
    /// Authorization endpoint on the configured login host.
    pub fn authorize_endpoint(&self) -> String {
        format!(
            "{}/services/oauth2/authorize",
            self.login_base.trim_end_matches('/')
        )
    }

    /// Token endpoint on the configured login host.
    pub fn token_endpoint(&self) -> String {
        format!(
            "{}/services/oauth2/token",
            self.login_base.trim_end_matches('/')
        )
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            operator_tokens: Vec::new(),
            service_token: None,
            crypto_key: None,
            session_secret: None,
            salesforce: SalesforceConfig::default(),
            jira_api_path: default_jira_api_path(),
            jira_allowed_hosts: default_jira_allowed_hosts(),
            oauth_fallback_url: default_oauth_fallback_url(),
            oauth_success_url: default_oauth_success_url(),
        }
    }
}

impl AppConfig {
    /// Parses the configured bind address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Whether the profile is a developer or test profile with relaxed requirements.
    pub fn is_local_profile(&self) -> bool {
        matches!(self.profile.as_str(), "local" | "test")
    }

    /// Serializes the configuration with every secret replaced by a marker.
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.operator_tokens.is_empty() {
            config.operator_tokens = vec![REDACTED.to_string()];
        }
        if config.service_token.is_some() {
            config.service_token = Some(REDACTED.to_string());
        }
        if config.crypto_key.is_some() {
            config.crypto_key = Some(REDACTED.as_bytes().to_vec());
        }
        if config.session_secret.is_some() {
            config.session_secret = Some(REDACTED.to_string());
        }
        if config.salesforce.client_secret.is_some() {
            config.salesforce.client_secret = Some(REDACTED.to_string());
        }
        if let Some(url) = url::Url::parse(&config.database_url)
            .ok()
            .filter(|url| url.password().is_some())
        {
            let mut url = url;
            let _ = url.set_password(Some(REDACTED));
            config.database_url = url.to_string();
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        match self.crypto_key {
            Some(ref key) if key.len() != 32 => {
                return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
            }
            Some(_) => {}
            None => return Err(ConfigError::MissingCryptoKey),
        }

        if self
            .session_secret
            .as_deref()
            .is_none_or(|secret| secret.trim().is_empty())
        {
            return Err(ConfigError::MissingSessionSecret);
        }

        if self.operator_tokens.is_empty() {
            return Err(ConfigError::MissingOperatorTokens);
        }

        // Local and test profiles may boot without a connected app; the
        // initiator still degrades to the fallback page in that case.
        if !self.is_local_profile() {
            if self.salesforce.client_id.is_none() {
                return Err(ConfigError::MissingSalesforceClientId);
            }
            if self.salesforce.client_secret.is_none() {
                return Err(ConfigError::MissingSalesforceClientSecret);
            }
            if self.salesforce.redirect_uri.is_none() {
                return Err(ConfigError::MissingSalesforceRedirectUri);
            }
        }

        if !(MIN_SESSION_TTL_SECONDS..=MAX_SESSION_TTL_SECONDS)
            .contains(&self.salesforce.session_ttl_seconds)
        {
            return Err(ConfigError::InvalidSalesforceSessionTtl {
                value: self.salesforce.session_ttl_seconds,
            });
        }

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/friction".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_salesforce_login_base() -> String {
    "https://login.salesforce.com".to_string()
}

fn default_salesforce_scopes() -> Vec<String> {
    vec!["api".to_string(), "refresh_token".to_string()]
}

fn default_salesforce_session_ttl_seconds() -> u64 {
    7200 // 2 hours, the Salesforce default session timeout
}

fn default_jira_api_path() -> String {
    "/rest/api/3".to_string()
}

fn default_jira_allowed_hosts() -> Vec<String> {
    vec!["*.atlassian.net".to_string()]
}

fn default_oauth_fallback_url() -> String {
    "/settings/integrations".to_string()
}

fn default_oauth_success_url() -> String {
    "/settings/integrations".to_string()
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("database URL is missing; set FRICTION_DATABASE_URL")]
    MissingDatabaseUrl,
    #[error("no operator tokens configured; set FRICTION_OPERATOR_TOKEN or FRICTION_OPERATOR_TOKENS")]
    MissingOperatorTokens,
    #[error("crypto key is missing; set FRICTION_CRYPTO_KEY environment variable")]
    MissingCryptoKey,
    #[error("crypto key is invalid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidCryptoKeyLength { length: usize },
    #[error("session secret is missing; set FRICTION_SESSION_SECRET")]
    MissingSessionSecret,
    #[error("Salesforce client ID is missing; set FRICTION_SALESFORCE_CLIENT_ID")]
    MissingSalesforceClientId,
    #[error("Salesforce client secret is missing; set FRICTION_SALESFORCE_CLIENT_SECRET")]
    MissingSalesforceClientSecret,
    #[error("Salesforce redirect URI is missing; set FRICTION_SALESFORCE_REDIRECT_URI")]
    MissingSalesforceRedirectUri,
    #[error("Salesforce session TTL must be between 60 and 86400 seconds, got {value}")]
    InvalidSalesforceSessionTtl { value: u64 },
}

/// Loads configuration using layered `.env` files and `FRICTION_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates configuration.
    ///
    /// Precedence, lowest first: `.env`, `.env.local`, `.env.{profile}`,
    /// `.env.{profile}.local`, then the process environment.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_non_empty(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let api_bind_addr =
            take_non_empty(&mut layered, "API_BIND_ADDR").unwrap_or_else(default_api_bind_addr);
        let log_level = take_non_empty(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format =
            take_non_empty(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url =
            take_non_empty(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = layered
            .remove("DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = layered
            .remove("DB_ACQUIRE_TIMEOUT_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_acquire_timeout_ms);

        // Support both a single token and a comma-separated list
        let operator_tokens = if let Some(tokens) = layered.remove("OPERATOR_TOKENS") {
            split_list(&tokens)
        } else if let Some(token) = take_non_empty(&mut layered, "OPERATOR_TOKEN") {
            vec![token]
        } else {
            Vec::new()
        };
        let service_token = take_non_empty(&mut layered, "SERVICE_TOKEN");

        let crypto_key = match take_non_empty(&mut layered, "CRYPTO_KEY") {
            Some(key_str) => {
                use base64::{Engine as _, engine::general_purpose};
                Some(general_purpose::STANDARD.decode(key_str.trim()).map_err(|e| {
                    ConfigError::InvalidCryptoKeyBase64 {
                        error: e.to_string(),
                    }
                })?)
            }
            None => None,
        };
        let session_secret = take_non_empty(&mut layered, "SESSION_SECRET");

        let salesforce = SalesforceConfig {
            client_id: take_non_empty(&mut layered, "SALESFORCE_CLIENT_ID"),
            client_secret: take_non_empty(&mut layered, "SALESFORCE_CLIENT_SECRET"),
            redirect_uri: take_non_empty(&mut layered, "SALESFORCE_REDIRECT_URI"),
            login_base: take_non_empty(&mut layered, "SALESFORCE_LOGIN_BASE")
                .unwrap_or_else(default_salesforce_login_base),
            scopes: layered
                .remove("SALESFORCE_SCOPES")
                .map(|scopes| {
                    scopes
                        .split([',', ' '])
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|scopes| !scopes.is_empty())
                .unwrap_or_else(default_salesforce_scopes),
            session_ttl_seconds: layered
                .remove("SALESFORCE_SESSION_TTL_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_salesforce_session_ttl_seconds),
        };

        let jira_api_path =
            take_non_empty(&mut layered, "JIRA_API_PATH").unwrap_or_else(default_jira_api_path);
        let jira_allowed_hosts = layered
            .remove("JIRA_ALLOWED_HOSTS")
            .map(|hosts| split_list(&hosts))
            .filter(|hosts| !hosts.is_empty())
            .unwrap_or_else(default_jira_allowed_hosts);
        let oauth_fallback_url = take_non_empty(&mut layered, "OAUTH_FALLBACK_URL")
            .unwrap_or_else(default_oauth_fallback_url);
        let oauth_success_url = take_non_empty(&mut layered, "OAUTH_SUCCESS_URL")
            .unwrap_or_else(default_oauth_success_url);

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            operator_tokens,
            service_token,
            crypto_key,
            session_secret,
            salesforce,
            jira_api_path,
            jira_allowed_hosts,
            oauth_fallback_url,
            oauth_success_url,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        if !path.exists() {
            return Ok(());
        }

        let iter = dotenvy::from_path_iter(&path).map_err(|source| ConfigError::EnvFile {
            path: path.clone(),
            source,
        })?;

        for item in iter {
            let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                path: path.clone(),
                source,
            })?;
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                values.insert(stripped.to_string(), value);
            }
        }

        Ok(())
    }
}

fn take_non_empty(values: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    values
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
