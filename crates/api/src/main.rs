//! Opsuite API Server
//!
//! Serves payment sessions, Xendit callbacks, invoice PDFs, trial status and
//! subscription analytics.

use std::net::SocketAddr;

use opsuite_api::{create_router, AppState, Config};
use opsuite_billing::BillingService;
use opsuite_shared::{create_pool, run_migrations};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,opsuite_api=debug,opsuite_billing=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        bind_address = %config.bind_address,
        xendit_base_url = %config.billing.xendit_base_url,
        tax_rate_percent = config.billing.tax_rate_percent,
        trial_sweep_enabled = !config.billing.trial_sweep_url.is_empty(),
        "Configuration loaded"
    );

    let pool = create_pool(&config.database_url).await?;
    tracing::info!("Database connection established");

    if config.run_migrations {
        run_migrations(&pool).await?;
        tracing::info!("Migrations applied");
    }

    let billing = BillingService::new(config.billing.clone(), pool)?;
    let app = create_router(AppState::new(billing));

    // Parse bind address
    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Starting server on {}", addr);

    // Start the server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
