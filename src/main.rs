//! SquadBot binary - wires the engine together and runs the loop

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use squadbot::config::AutomationConfig;
use squadbot::coordinator::MatchCoordinator;
use squadbot::ledger::{LedgerApi, LedgerClient};
use squadbot::oracle::{HttpPriceFeed, PriceOracleClient};
use squadbot::registry::BidRegistry;
use squadbot::scheduler::{AutomationScheduler, SchedulerSettings, SchedulerState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("squadbot=info")),
        )
        .init();

    let config = AutomationConfig::load()?;
    config.validate_env()?;
    info!(config = %config.digest(), "Starting SquadBot");

    let signer_address =
        std::env::var("AUTOMATION_ADDRESS").context("AUTOMATION_ADDRESS not set")?;
    let signer_secret = std::env::var("AUTOMATION_SECRET").context("AUTOMATION_SECRET not set")?;

    let ledger: Arc<dyn LedgerApi> = Arc::new(LedgerClient::new(
        &config.ledger.rpc_url,
        signer_address.clone(),
        signer_secret,
    ));
    let oracle = Arc::new(PriceOracleClient::new(
        Box::new(HttpPriceFeed::new(&config.oracle.price_url)),
        config.oracle.cache_ttl_secs,
        config.oracle.price_scale,
    ));
    let registry = Arc::new(BidRegistry::new(
        ledger.clone(),
        config.ledger.bid_registry_id.clone(),
        config.ledger.module.clone(),
        config.ledger.event_page_size,
        config.ledger.fallback_min_open,
    ));
    let coordinator = Arc::new(MatchCoordinator::new(
        ledger.clone(),
        oracle.clone(),
        registry.clone(),
        config.ledger.match_registry_id.clone(),
        config.ledger.fee_config_id.clone(),
        config.ledger.module.clone(),
        signer_address.clone(),
        config.ledger.abort_already_matched,
        config.ledger.event_page_size,
        config.bot.dry_run,
    ));

    let settings = SchedulerSettings {
        iteration_delay: Duration::from_secs(config.scheduler.iteration_delay_secs),
        inter_match_delay: Duration::from_millis(config.scheduler.inter_match_delay_ms),
        inter_completion_delay: Duration::from_millis(config.scheduler.inter_completion_delay_ms),
        max_consecutive_errors: config.scheduler.max_consecutive_errors,
        backoff_base: Duration::from_secs(config.scheduler.backoff_base_secs),
        backoff_cap: Duration::from_secs(config.scheduler.backoff_cap_secs),
        backoff_jitter: config.scheduler.backoff_jitter,
        status_interval: Duration::from_secs(config.scheduler.status_interval_secs),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Termination signal received");
        let _ = shutdown_tx.send(true);
    });

    let mut scheduler = AutomationScheduler::new(
        ledger,
        oracle,
        registry,
        coordinator,
        settings,
        signer_address,
        config.ledger.capability_id.clone(),
        config.oracle.probe_token.clone(),
        shutdown_rx,
    );

    match scheduler.run().await {
        Ok(SchedulerState::Stopped) => {
            info!("SquadBot stopped cleanly");
            Ok(())
        }
        Ok(state) => {
            error!(state = ?state, "SquadBot stopped abnormally");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "SquadBot failed during setup");
            Err(e.into())
        }
    }
}
