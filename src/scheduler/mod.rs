//! Automation Scheduler - The supervising loop
//!
//! Runs the matching phase then the settlement phase each iteration,
//! sequentially and never concurrently. Repeated iteration-level errors
//! back off exponentially and eventually trip a circuit breaker; a
//! shutdown signal is honored at iteration boundaries only, so no
//! in-flight submission is ever interrupted.

use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::coordinator::MatchCoordinator;
use crate::error::EngineError;
use crate::ledger::LedgerApi;
use crate::oracle::PriceOracleClient;
use crate::registry::BidRegistry;
use crate::types::SubmitOutcome;

/// Which half of an iteration is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Matching,
    Settling,
}

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Setup,
    Running(Phase),
    Idle,
    /// Stopped by an external shutdown signal
    Stopped,
    /// Stopped by the consecutive-error circuit breaker
    CircuitBroken,
}

/// Timing and safety knobs for the loop
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub iteration_delay: Duration,
    pub inter_match_delay: Duration,
    pub inter_completion_delay: Duration,
    pub max_consecutive_errors: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub backoff_jitter: bool,
    pub status_interval: Duration,
}

/// Wait before the next iteration after `consecutive_errors` failures:
/// min(base * 2^(n-1), cap).
pub fn backoff_delay(base: Duration, cap: Duration, consecutive_errors: u32) -> Duration {
    if consecutive_errors == 0 {
        return base;
    }
    let exponent = consecutive_errors.saturating_sub(1).min(32);
    let waited = base.saturating_mul(2u32.saturating_pow(exponent));
    waited.min(cap)
}

#[derive(Debug, Default, Clone, Copy)]
struct IterationOutcome {
    matched: usize,
    settled: usize,
    skipped: usize,
    failed: usize,
}

/// Counters reported in the periodic status line
#[derive(Debug, Default)]
struct RunStats {
    iterations: u64,
    matches_submitted: u64,
    settlements_submitted: u64,
    skipped: u64,
    failures: u64,
}

pub struct AutomationScheduler {
    ledger: Arc<dyn LedgerApi>,
    oracle: Arc<PriceOracleClient>,
    registry: Arc<BidRegistry>,
    coordinator: Arc<MatchCoordinator>,
    settings: SchedulerSettings,
    signer_address: String,
    capability_id: String,
    probe_token: String,
    shutdown: watch::Receiver<bool>,
    state: SchedulerState,
    consecutive_errors: u32,
    stats: RunStats,
    started_at: i64,
    last_status_at: i64,
}

impl AutomationScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<dyn LedgerApi>,
        oracle: Arc<PriceOracleClient>,
        registry: Arc<BidRegistry>,
        coordinator: Arc<MatchCoordinator>,
        settings: SchedulerSettings,
        signer_address: String,
        capability_id: String,
        probe_token: String,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ledger,
            oracle,
            registry,
            coordinator,
            settings,
            signer_address,
            capability_id,
            probe_token,
            shutdown,
            state: SchedulerState::Setup,
            consecutive_errors: 0,
            stats: RunStats::default(),
            started_at: Utc::now().timestamp_millis(),
            last_status_at: Utc::now().timestamp_millis(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Verify preconditions, then loop until shutdown or circuit break.
    /// Returns the terminal state.
    pub async fn run(&mut self) -> Result<SchedulerState, EngineError> {
        self.setup().await?;
        self.started_at = Utc::now().timestamp_millis();
        self.last_status_at = self.started_at;
        info!("Entering automation loop");

        let mut shutdown = self.shutdown.clone();
        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested, stopping after current iteration");
                self.state = SchedulerState::Stopped;
                break;
            }

            self.stats.iterations += 1;
            match self.run_iteration().await {
                Ok(outcome) => {
                    if outcome.matched + outcome.settled > 0 {
                        self.consecutive_errors = 0;
                    }
                }
                Err(e) => {
                    self.consecutive_errors += 1;
                    error!(
                        error = %e,
                        consecutive_errors = self.consecutive_errors,
                        "Iteration failed"
                    );
                    if self.consecutive_errors >= self.settings.max_consecutive_errors {
                        error!(
                            max = self.settings.max_consecutive_errors,
                            "Too many consecutive errors, tripping circuit breaker"
                        );
                        self.state = SchedulerState::CircuitBroken;
                        break;
                    }
                }
            }

            self.maybe_emit_status().await;

            self.state = SchedulerState::Idle;
            let delay = self.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!(state = ?self.state, "Automation loop exited");
        Ok(self.state)
    }

    /// Setup failures are fatal: the loop never starts.
    async fn setup(&mut self) -> Result<(), EngineError> {
        self.state = SchedulerState::Setup;

        let owns = self
            .ledger
            .owns_capability(&self.signer_address, &self.capability_id)
            .await
            .map_err(|e| EngineError::Setup(format!("capability check failed: {e}")))?;
        if !owns {
            return Err(EngineError::Setup(format!(
                "signer {} does not own automation capability {}",
                self.signer_address, self.capability_id
            )));
        }

        self.oracle
            .probe(&self.probe_token)
            .await
            .map_err(|e| EngineError::Setup(format!("oracle probe failed: {e}")))?;

        info!(
            signer = %self.signer_address,
            "✅ Setup verified: capability owned, oracle reachable"
        );
        Ok(())
    }

    /// One iteration: matching first, then settlement, sequentially.
    async fn run_iteration(&mut self) -> Result<IterationOutcome, EngineError> {
        let mut outcome = IterationOutcome::default();

        self.state = SchedulerState::Running(Phase::Matching);
        self.run_matching_phase(&mut outcome).await?;

        self.state = SchedulerState::Running(Phase::Settling);
        self.run_settlement_phase(&mut outcome).await?;

        self.stats.matches_submitted += outcome.matched as u64;
        self.stats.settlements_submitted += outcome.settled as u64;
        self.stats.skipped += outcome.skipped as u64;
        self.stats.failures += outcome.failed as u64;
        Ok(outcome)
    }

    async fn run_matching_phase(
        &mut self,
        outcome: &mut IterationOutcome,
    ) -> Result<(), EngineError> {
        let bids = self
            .registry
            .list_open_bids()
            .await
            .map_err(EngineError::transient)?;
        let pairs = self.coordinator.find_compatible_pairs(&bids);
        if pairs.is_empty() {
            return Ok(());
        }
        info!(pairs = pairs.len(), "Attempting match submissions");

        for pair in &pairs {
            // Per-pair errors never abort the phase.
            match self.coordinator.match_bids(pair).await {
                Ok(SubmitOutcome::Submitted) => outcome.matched += 1,
                Ok(SubmitOutcome::Skipped) => outcome.skipped += 1,
                Ok(SubmitOutcome::Failed) => outcome.failed += 1,
                Err(e) if e.is_skip() => outcome.skipped += 1,
                Err(e) => {
                    warn!(
                        bid1 = %pair.bid1.id,
                        bid2 = %pair.bid2.id,
                        error = %e,
                        "Match submission failed"
                    );
                    outcome.failed += 1;
                }
            }
            tokio::time::sleep(self.settings.inter_match_delay).await;
        }
        Ok(())
    }

    async fn run_settlement_phase(
        &mut self,
        outcome: &mut IterationOutcome,
    ) -> Result<(), EngineError> {
        let matches = self
            .coordinator
            .list_active_matches()
            .await
            .map_err(EngineError::transient)?;

        let well_formed: Vec<_> = matches
            .into_iter()
            .filter(|m| {
                if m.is_well_formed() {
                    true
                } else {
                    warn!(match_id = %m.id, "Dropping malformed match record");
                    false
                }
            })
            .collect();

        let now_ms = Utc::now().timestamp_millis();
        let expired = self.coordinator.find_expired_matches(&well_formed, now_ms);
        if expired.is_empty() {
            return Ok(());
        }
        info!(expired = expired.len(), "Attempting settlements");

        for m in &expired {
            // Per-match errors never abort the phase.
            match self.coordinator.complete_and_claim(m).await {
                Ok(SubmitOutcome::Submitted) => outcome.settled += 1,
                Ok(SubmitOutcome::Skipped) => outcome.skipped += 1,
                Ok(SubmitOutcome::Failed) => outcome.failed += 1,
                Err(e) if e.is_skip() => outcome.skipped += 1,
                Err(e) => {
                    warn!(match_id = %m.id, error = %e, "Settlement failed");
                    outcome.failed += 1;
                }
            }
            tokio::time::sleep(self.settings.inter_completion_delay).await;
        }
        Ok(())
    }

    fn next_delay(&self) -> Duration {
        if self.consecutive_errors == 0 {
            return self.settings.iteration_delay;
        }
        let mut delay = backoff_delay(
            self.settings.backoff_base,
            self.settings.backoff_cap,
            self.consecutive_errors,
        );
        if self.settings.backoff_jitter {
            let factor = rand::thread_rng().gen_range(0.875..=1.125);
            delay = delay.mul_f64(factor);
        }
        delay
    }

    /// Periodic operator status line.
    async fn maybe_emit_status(&mut self) {
        let now_ms = Utc::now().timestamp_millis();
        if now_ms - self.last_status_at < self.settings.status_interval.as_millis() as i64 {
            return;
        }
        self.last_status_at = now_ms;

        let top_squads = match self.coordinator.list_active_matches().await {
            Ok(matches) => {
                let stats = self.coordinator.match_statistics(&matches, now_ms);
                format!("{:?}", stats.top_squad_pairs(3))
            }
            Err(_) => "unavailable".to_string(),
        };

        info!(
            uptime_secs = (now_ms - self.started_at) / 1_000,
            iterations = self.stats.iterations,
            matches_submitted = self.stats.matches_submitted,
            settlements_submitted = self.stats.settlements_submitted,
            skipped = self.stats.skipped,
            failures = self.stats.failures,
            consecutive_errors = self.consecutive_errors,
            top_squads = %top_squads,
            "Automation status"
        );
    }
}
