//! Configuration management for SquadBot
//!
//! Loads from optional config files + environment variables via .env

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application configuration, immutable for the lifetime of a run
#[derive(Debug, Clone, Deserialize)]
pub struct AutomationConfig {
    pub bot: BotConfig,
    pub ledger: LedgerConfig,
    pub oracle: OracleConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Version tag for logging
    pub tag: String,
    /// Network selector (e.g. "mainnet", "testnet", "localnet")
    pub network: String,
    /// Dry run mode (no transactions submitted)
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Ledger gateway RPC endpoint
    pub rpc_url: String,
    /// Module name used in event filters
    pub module: String,
    /// Bid registry object id
    pub bid_registry_id: String,
    /// Match registry object id
    pub match_registry_id: String,
    /// Fee configuration object id, must exist before settlement
    pub fee_config_id: String,
    /// Automation capability object id the signer must own
    pub capability_id: String,
    /// Abort code the wager package raises for already-matched/settled
    pub abort_already_matched: u64,
    /// Page size for event-log queries
    pub event_page_size: usize,
    /// Minimum open bids before the fallback scan pages further back
    pub fallback_min_open: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// Price oracle HTTP endpoint
    pub price_url: String,
    /// Cache TTL in seconds for matching-time lookups
    pub cache_ttl_secs: u64,
    /// Integer normalization scale for external quotations
    pub price_scale: u64,
    /// Token used for the end-to-end setup probe
    pub probe_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Delay between iterations in seconds
    pub iteration_delay_secs: u64,
    /// Delay between match submissions in milliseconds
    pub inter_match_delay_ms: u64,
    /// Delay between settlement submissions in milliseconds
    pub inter_completion_delay_ms: u64,
    /// Circuit breaker threshold
    pub max_consecutive_errors: u32,
    /// Backoff base delay in seconds
    pub backoff_base_secs: u64,
    /// Backoff cap in seconds
    pub backoff_cap_secs: u64,
    /// Apply small random jitter to backoff waits
    pub backoff_jitter: bool,
    /// Interval between operator status emissions in seconds
    pub status_interval_secs: u64,
}

impl AutomationConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .set_default("bot.tag", env!("CARGO_PKG_VERSION"))?
            .set_default("bot.network", "testnet")?
            .set_default("bot.dry_run", true)?
            // Ledger defaults
            .set_default("ledger.rpc_url", "http://127.0.0.1:9000")?
            .set_default("ledger.module", "squad_wager")?
            .set_default("ledger.bid_registry_id", "")?
            .set_default("ledger.match_registry_id", "")?
            .set_default("ledger.fee_config_id", "")?
            .set_default("ledger.capability_id", "")?
            .set_default("ledger.abort_already_matched", 7)?
            .set_default("ledger.event_page_size", 100)?
            .set_default("ledger.fallback_min_open", 10)?
            // Oracle defaults
            .set_default("oracle.price_url", "http://127.0.0.1:9100")?
            .set_default("oracle.cache_ttl_secs", 60)?
            .set_default("oracle.price_scale", 1_000_000)?
            .set_default("oracle.probe_token", "native")?
            // Scheduler defaults
            .set_default("scheduler.iteration_delay_secs", 15)?
            .set_default("scheduler.inter_match_delay_ms", 500)?
            .set_default("scheduler.inter_completion_delay_ms", 500)?
            .set_default("scheduler.max_consecutive_errors", 10)?
            .set_default("scheduler.backoff_base_secs", 5)?
            .set_default("scheduler.backoff_cap_secs", 300)?
            .set_default("scheduler.backoff_jitter", true)?
            .set_default("scheduler.status_interval_secs", 60)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (SQUADBOT_*)
            .add_source(Environment::with_prefix("SQUADBOT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let automation_config: AutomationConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        automation_config.validate()?;
        Ok(automation_config)
    }

    /// Structural checks that must hold before anything runs
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("ledger.bid_registry_id", &self.ledger.bid_registry_id),
            ("ledger.match_registry_id", &self.ledger.match_registry_id),
            ("ledger.fee_config_id", &self.ledger.fee_config_id),
            ("ledger.capability_id", &self.ledger.capability_id),
        ] {
            if value.trim().is_empty() {
                bail!("Required ledger object reference {} is not configured", name);
            }
        }
        if self.scheduler.max_consecutive_errors == 0 {
            bail!("scheduler.max_consecutive_errors must be at least 1");
        }
        if self.scheduler.backoff_cap_secs < self.scheduler.backoff_base_secs {
            bail!("scheduler.backoff_cap_secs must be >= backoff_base_secs");
        }
        if self.oracle.price_scale == 0 {
            bail!("oracle.price_scale must be non-zero");
        }
        Ok(())
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "bot={} network={} dry_run={} iter_delay={}s max_errors={}",
            self.bot.tag,
            self.bot.network,
            self.bot.dry_run,
            self.scheduler.iteration_delay_secs,
            self.scheduler.max_consecutive_errors
        )
    }

    /// Validate required environment variables
    pub fn validate_env(&self) -> Result<()> {
        let required = vec!["AUTOMATION_ADDRESS", "AUTOMATION_SECRET"];

        for var in required {
            if std::env::var(var).is_err() {
                bail!("Required environment variable {} is not set", var);
            }
        }

        // Validate signer address format
        let address = std::env::var("AUTOMATION_ADDRESS")?;
        if !address.starts_with("0x") || address.len() < 4 {
            bail!("AUTOMATION_ADDRESS must be a hex string with 0x prefix");
        }
        if address[2..].chars().any(|c| !c.is_ascii_hexdigit()) {
            bail!("AUTOMATION_ADDRESS contains non-hex characters");
        }

        Ok(())
    }
}

impl std::fmt::Display for AutomationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AutomationConfig {
        AutomationConfig {
            bot: BotConfig {
                tag: "test".into(),
                network: "localnet".into(),
                dry_run: true,
            },
            ledger: LedgerConfig {
                rpc_url: "http://localhost:9000".into(),
                module: "squad_wager".into(),
                bid_registry_id: "0xbids".into(),
                match_registry_id: "0xmatches".into(),
                fee_config_id: "0xfees".into(),
                capability_id: "0xcap".into(),
                abort_already_matched: 7,
                event_page_size: 100,
                fallback_min_open: 10,
            },
            oracle: OracleConfig {
                price_url: "http://localhost:9100".into(),
                cache_ttl_secs: 60,
                price_scale: 1_000_000,
                probe_token: "native".into(),
            },
            scheduler: SchedulerConfig {
                iteration_delay_secs: 15,
                inter_match_delay_ms: 500,
                inter_completion_delay_ms: 500,
                max_consecutive_errors: 10,
                backoff_base_secs: 5,
                backoff_cap_secs: 300,
                backoff_jitter: false,
                status_interval_secs: 60,
            },
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn missing_object_ref_is_rejected() {
        let mut cfg = sample();
        cfg.ledger.fee_config_id = "".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn backoff_cap_below_base_is_rejected() {
        let mut cfg = sample();
        cfg.scheduler.backoff_cap_secs = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn digest_names_no_secrets() {
        let digest = sample().digest();
        assert!(digest.contains("dry_run=true"));
        assert!(!digest.to_lowercase().contains("secret"));
    }
}
