//! Opsuite Background Worker
//!
//! Handles scheduled jobs including:
//! - Lapsed trial expiry (hourly)
//! - Expiry of unpaid payment transactions (every 15 minutes)
//! - Billing invariant report (daily at 06:00 UTC)
//! - Heartbeat (every 5 minutes)

use std::sync::Arc;

use opsuite_billing::{BillingService, InvariantCheckSummary, InvariantChecker, ViolationSeverity};
use opsuite_shared::create_pool;
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Log an invariant summary at a level matching its worst violation
fn log_invariant_summary(summary: &InvariantCheckSummary) {
    if summary.healthy {
        info!(
            checks_run = summary.checks_run,
            "Billing invariants hold"
        );
        return;
    }

    for violation in &summary.violations {
        let org_count = violation.org_ids.len();
        match violation.severity {
            ViolationSeverity::Critical | ViolationSeverity::High => error!(
                invariant = %violation.invariant,
                severity = %violation.severity,
                org_count = org_count,
                context = %violation.context,
                "{}",
                violation.description
            ),
            ViolationSeverity::Medium | ViolationSeverity::Low => warn!(
                invariant = %violation.invariant,
                severity = %violation.severity,
                org_count = org_count,
                context = %violation.context,
                "{}",
                violation.description
            ),
        }
    }

    warn!(
        checks_run = summary.checks_run,
        checks_failed = summary.checks_failed,
        worst = ?summary.worst_severity(),
        "Billing invariant violations found"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Opsuite Worker");

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = create_pool(&database_url).await?;
    info!("Database pool created");

    let mut scheduler = JobScheduler::new().await?;
    let mut job_count = 0;

    // Invariants only read the database, so they run even without provider config
    let checker = InvariantChecker::new(pool.clone());
    scheduler
        .add(Job::new_async("0 0 6 * * *", move |_uuid, _l| {
            let checker = checker.clone();
            Box::pin(async move {
                info!("Running billing invariant checks");
                match checker.run_all_checks().await {
                    Ok(summary) => log_invariant_summary(&summary),
                    Err(e) => error!(error = %e, "Invariant check run failed"),
                }
            })
        })?)
        .await?;
    job_count += 1;
    info!("Scheduled: Billing invariant report (06:00 UTC)");

    match BillingService::from_env(pool.clone()) {
        Ok(billing) => {
            let billing = Arc::new(billing);

            // Lapsed trials are normally caught on read; this covers orgs nobody visits
            let trial_billing = billing.clone();
            scheduler
                .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
                    let billing = trial_billing.clone();
                    Box::pin(async move {
                        match billing
                            .trial
                            .expire_lapsed_trials(OffsetDateTime::now_utc())
                            .await
                        {
                            Ok(0) => {}
                            Ok(expired) => info!(expired = expired, "Expired lapsed trials"),
                            Err(e) => error!(error = %e, "Lapsed trial sweep failed"),
                        }
                    })
                })?)
                .await?;
            job_count += 1;
            info!("Scheduled: Lapsed trial expiry (hourly)");

            let sweep_billing = billing.clone();
            scheduler
                .add(Job::new_async("0 */15 * * * *", move |_uuid, _l| {
                    let billing = sweep_billing.clone();
                    Box::pin(async move {
                        match billing
                            .webhooks
                            .expire_stale_transactions(OffsetDateTime::now_utc())
                            .await
                        {
                            Ok(0) => {}
                            Ok(expired) => {
                                info!(expired = expired, "Expired unpaid payment transactions")
                            }
                            Err(e) => error!(error = %e, "Stale transaction sweep failed"),
                        }
                    })
                })?)
                .await?;
            job_count += 1;
            info!("Scheduled: Stale transaction expiry (every 15 minutes)");
        }
        Err(e) => {
            warn!(error = %e, "Failed to create billing service - running in minimal mode");
            info!("Worker running without trial and payment sweeps");
        }
    }

    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    job_count += 1;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    // Start the scheduler
    info!("Starting job scheduler");
    scheduler.start().await?;

    info!(
        "Opsuite Worker started successfully with {} scheduled jobs",
        job_count
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping scheduler");
    scheduler.shutdown().await?;

    Ok(())
}
