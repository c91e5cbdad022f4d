//! Test utilities shared by the integration test binaries.
//!
//! In-memory SQLite with migrations applied, a fully populated test
//! configuration and helpers for building the router and session cookies.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use friction_integrations::{
    auth::{SESSION_COOKIE, ServiceAccess, sign_session},
    config::{AppConfig, SalesforceConfig},
    credential_store::CredentialStore,
    crypto::CryptoKey,
    server::AppState,
};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use uuid::Uuid;

pub const SESSION_SECRET: &str = "test-session-secret";
pub const OPERATOR_TOKEN: &str = "test-operator-token";
pub const SERVICE_TOKEN: &str = "test-service-token";
pub const CLIENT_ID: &str = "abc123";
pub const CLIENT_SECRET: &str = "test-client-secret";
pub const REDIRECT_URI: &str = "https://app.example.com/oauth/salesforce/callback";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![42u8; 32]).expect("32-byte key")
}

/// Configuration for the `test` profile with every secret populated.
pub fn test_config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        database_url: "sqlite::memory:".to_string(),
        operator_tokens: vec![OPERATOR_TOKEN.to_string()],
        service_token: Some(SERVICE_TOKEN.to_string()),
        crypto_key: Some(vec![42u8; 32]),
        session_secret: Some(SESSION_SECRET.to_string()),
        salesforce: SalesforceConfig {
            client_id: Some(CLIENT_ID.to_string()),
            client_secret: Some(CLIENT_SECRET.to_string()),
            redirect_uri: Some(REDIRECT_URI.to_string()),
            ..Default::default()
        },
        // wiremock listens on loopback
        jira_allowed_hosts: vec!["*.atlassian.net".to_string(), "127.0.0.1".to_string()],
        oauth_fallback_url: "/settings/integrations".to_string(),
        oauth_success_url: "/settings/integrations".to_string(),
        ..Default::default()
    }
}

/// Test configuration pointing the Salesforce login host at a mock server.
pub fn test_config_with_login_base(login_base: &str) -> AppConfig {
    let mut config = test_config();
    config.salesforce.login_base = login_base.to_string();
    config
}

pub fn test_state(config: AppConfig, db: DatabaseConnection) -> AppState {
    AppState::new(Arc::new(config), db).expect("test state builds")
}

pub fn test_store(db: &DatabaseConnection) -> CredentialStore {
    CredentialStore::new(Arc::new(db.clone()), test_crypto_key())
}

pub fn service_access(config: &AppConfig) -> ServiceAccess {
    ServiceAccess::from_service_token(config, SERVICE_TOKEN).expect("service token matches")
}

/// `Cookie` header value carrying a signed session for `user_id`.
pub fn session_cookie(user_id: Uuid) -> String {
    let value = sign_session(SESSION_SECRET, user_id).expect("hmac accepts any key length");
    format!("{}={}", SESSION_COOKIE, value)
}
