//! # Server Configuration
//!
//! Router assembly, shared state and the HTTP listener.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{Router, extract::FromRef, middleware, routing::get};
use sea_orm::DatabaseConnection;
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::operator_auth_middleware;
use crate::config::AppConfig;
use crate::credential_store::CredentialStore;
use crate::crypto::CryptoKey;
use crate::handlers;
use crate::telemetry::trace_id_middleware;

const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(15);

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub store: CredentialStore,
    /// Client for Salesforce and Jira calls
    pub http: reqwest::Client,
}

impl AppState {
    /// Builds state from validated configuration and an open pool.
    pub fn new(config: Arc<AppConfig>, db: DatabaseConnection) -> Result<Self> {
        let key_bytes = config
            .crypto_key
            .clone()
            .context("crypto key is not configured")?;
        let crypto_key = CryptoKey::new(key_bytes).context("invalid crypto key")?;

        let http = reqwest::Client::builder()
            .timeout(OUTBOUND_TIMEOUT)
            .user_agent(concat!("friction-integrations/", env!("CARGO_PKG_VERSION")))
            // Outbound calls stay on the host that was checked.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("failed to build HTTP client")?;

        let store = CredentialStore::new(Arc::new(db.clone()), crypto_key);

        Ok(Self {
            config,
            db,
            store,
            http,
        })
    }
}

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let diagnostics = Router::new()
        .route(
            "/diagnostics/integrations",
            get(handlers::diagnostics::list_integrations),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            operator_auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route(
            "/oauth/salesforce/authorize",
            get(handlers::oauth::authorize),
        )
        .route("/oauth/salesforce/callback", get(handlers::oauth::callback))
        .route(
            "/integrations/{system_type}",
            get(handlers::integrations::get_integration)
                .delete(handlers::integrations::delete_integration)
                .post(handlers::integrations::connect_integration),
        )
        .merge(diagnostics)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id_middleware))
}

/// Starts the server and serves until Ctrl-C
pub async fn run_server(config: Arc<AppConfig>, db: DatabaseConnection) -> Result<()> {
    let addr = config
        .bind_addr()
        .with_context(|| format!("invalid bind address '{}'", config.api_bind_addr))?;

    let state = AppState::new(Arc::clone(&config), db)?;
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::oauth::authorize,
        crate::handlers::oauth::callback,
        crate::handlers::integrations::get_integration,
        crate::handlers::integrations::delete_integration,
        crate::handlers::integrations::connect_integration,
        crate::handlers::diagnostics::list_integrations,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::SystemType,
            crate::models::IntegrationStatus,
            crate::models::IntegrationMetadata,
            crate::handlers::HealthStatus,
            crate::handlers::integrations::IntegrationView,
            crate::handlers::integrations::ConnectJiraRequest,
            crate::handlers::diagnostics::DiagnosticsResponse,
            crate::credential_store::IntegrationDiagnostic,
            crate::credential_store::TokenPreview,
            crate::credential_store::TokenState,
            crate::error::ApiError,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Friction Intelligence Integrations API",
        description = "Salesforce OAuth, Jira connection and credential storage",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
