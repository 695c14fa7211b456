//! Server configuration

use opsuite_billing::BillingConfig;

/// Process-level settings loaded once at startup
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Apply embedded migrations before serving
    pub run_migrations: bool,
    pub billing: BillingConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let run_migrations = std::env::var("RUN_MIGRATIONS")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);

        Ok(Self {
            database_url,
            bind_address,
            run_migrations,
            billing: BillingConfig::from_env()?,
        })
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
