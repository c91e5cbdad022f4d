//! Refreshes Salesforce access tokens that are about to expire.
//!
//! Intended for a cron schedule. Exits non-zero when any refresh failed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use friction_integrations::{
    config::ConfigLoader,
    credential_store::CredentialStore,
    crypto::CryptoKey,
    db,
    oauth::{refresh::TokenRefresher, salesforce::SalesforceClient},
    telemetry::init_tracing,
};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "refresh_tokens")]
#[command(about = "Refresh Salesforce access tokens nearing expiry")]
struct Cli {
    /// Refresh tokens expiring within this many minutes.
    #[arg(long, default_value_t = 15)]
    lead_time_minutes: i64,

    /// Refresh a single integration regardless of expiry.
    #[arg(long)]
    integration_id: Option<Uuid>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    init_tracing(&config)?;

    let key_bytes = config
        .crypto_key
        .clone()
        .context("crypto key not present in configuration")?;
    let crypto_key = CryptoKey::new(key_bytes).context("initializing crypto key")?;

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .context("building HTTP client")?;

    let store = CredentialStore::new(Arc::new(db), crypto_key);
    let refresher = TokenRefresher::new(store, SalesforceClient::new(http, config.salesforce));

    if let Some(integration_id) = cli.integration_id {
        refresher
            .refresh(integration_id)
            .await
            .with_context(|| format!("refreshing integration {}", integration_id))?;
        println!("Refreshed integration {}", integration_id);
        return Ok(());
    }

    let summary = refresher
        .refresh_expiring(chrono::Duration::minutes(cli.lead_time_minutes))
        .await
        .context("listing integrations due for refresh")?;

    println!(
        "Attempted {} refreshes: {} succeeded, {} failed",
        summary.attempted,
        summary.refreshed.len(),
        summary.failed.len()
    );
    for (integration_id, reason) in &summary.failed {
        println!("  {}: {}", integration_id, reason);
    }

    if !summary.failed.is_empty() {
        bail!("{} refreshes failed", summary.failed.len());
    }

    Ok(())
}
