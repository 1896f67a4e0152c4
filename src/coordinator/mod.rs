//! Match Coordinator - Pairing, submission and settlement
//!
//! Pairs compatible open bids, submits match-creation transactions with
//! an idempotency guard, detects expired matches and settles them with a
//! single atomic complete-and-claim transaction. Pairing and expiry
//! detection are pure; everything that touches the ledger re-validates
//! its preconditions immediately before writing.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::ledger::{
    EventFilter, FeeConfig, LedgerApi, MatchCreatedEvent, MatchRegistrySnapshot, SquadObject,
    TransactionKind, TxRequest, TxStatus, EVENT_MATCH_CREATED,
};
use crate::oracle::PriceOracleClient;
use crate::registry::BidRegistry;
use crate::types::{Bid, Match, MatchStatistics, MatchStatus, MatchableBidPair, SubmitOutcome, TokenPrice};

pub struct MatchCoordinator {
    ledger: Arc<dyn LedgerApi>,
    oracle: Arc<PriceOracleClient>,
    registry: Arc<BidRegistry>,
    match_registry_id: String,
    fee_config_id: String,
    module: String,
    sender: String,
    abort_already_matched: u64,
    event_page_size: usize,
    dry_run: bool,
}

impl MatchCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<dyn LedgerApi>,
        oracle: Arc<PriceOracleClient>,
        registry: Arc<BidRegistry>,
        match_registry_id: String,
        fee_config_id: String,
        module: String,
        sender: String,
        abort_already_matched: u64,
        event_page_size: usize,
        dry_run: bool,
    ) -> Self {
        Self {
            ledger,
            oracle,
            registry,
            match_registry_id,
            fee_config_id,
            module,
            sender,
            abort_already_matched,
            event_page_size,
            dry_run,
        }
    }

    /// Pair compatible open bids as of now. Computed from a snapshot, so
    /// every pair is re-validated at submission time.
    pub fn find_compatible_pairs(&self, bids: &[Bid]) -> Vec<MatchableBidPair> {
        let pairs = find_compatible_pairs(bids, Utc::now().timestamp_millis());
        debug!(
            open_bids = bids.len(),
            pairs = pairs.len(),
            "Computed compatible bid pairs"
        );
        pairs
    }

    /// Submit a match-creation transaction for one pair.
    ///
    /// Re-validates both bids, skips already-matched pairs, resolves
    /// matching-time valuations through the cache, then submits once.
    pub async fn match_bids(&self, pair: &MatchableBidPair) -> EngineResult<SubmitOutcome> {
        let bid1 = &pair.bid1;
        let bid2 = &pair.bid2;

        // Guard against races since pairing was computed from a snapshot.
        let still_open = self
            .registry
            .is_still_open(&bid1.id)
            .await
            .map_err(EngineError::transient)?
            && self
                .registry
                .is_still_open(&bid2.id)
                .await
                .map_err(EngineError::transient)?;
        if !still_open {
            info!(bid1 = %bid1.id, bid2 = %bid2.id, "Bid no longer open, skipping pair");
            return Ok(SubmitOutcome::Skipped);
        }

        if self.pair_already_matched(&bid1.id, &bid2.id).await? {
            info!(bid1 = %bid1.id, bid2 = %bid2.id, "Pair already matched, skipping");
            return Ok(SubmitOutcome::Skipped);
        }

        // Matching-time entry valuations go through the short-TTL cache.
        let squad1_prices = self.resolve_squad_prices(&bid1.squad_id, false).await?;
        let squad2_prices = self.resolve_squad_prices(&bid2.squad_id, false).await?;

        if self.dry_run {
            info!(bid1 = %bid1.id, bid2 = %bid2.id, "Dry run: would submit create_match");
            return Ok(SubmitOutcome::Skipped);
        }

        let request = TxRequest {
            request_id: Uuid::new_v4().to_string(),
            sender: self.sender.clone(),
            kind: TransactionKind::CreateMatch {
                bid1_id: bid1.id.clone(),
                bid2_id: bid2.id.clone(),
                squad1_prices: squad1_prices.iter().map(|p| p.price).collect(),
                squad2_prices: squad2_prices.iter().map(|p| p.price).collect(),
            },
        };
        let status = self
            .ledger
            .submit_transaction(&request)
            .await
            .map_err(EngineError::transient)?;
        Ok(self.classify(status, &request, "match"))
    }

    /// Matches currently recorded as Active in the match registry.
    pub async fn list_active_matches(&self) -> Result<Vec<Match>> {
        let object = self
            .ledger
            .get_object(&self.match_registry_id)
            .await?
            .context("Match registry object not found")?;
        let snapshot: MatchRegistrySnapshot = serde_json::from_value(object.content)
            .context("Malformed match registry content")?;
        Ok(snapshot
            .matches
            .into_iter()
            .filter(|m| m.status == MatchStatus::Active)
            .collect())
    }

    /// Active matches whose window has elapsed.
    pub fn find_expired_matches(&self, matches: &[Match], now_ms: i64) -> Vec<Match> {
        find_expired_matches(matches, now_ms)
    }

    /// Settle one expired match: record the outcome with fresh valuations
    /// and claim the prize, both inside a single transaction.
    pub async fn complete_and_claim(&self, m: &Match) -> EngineResult<SubmitOutcome> {
        // The fee configuration must exist and parse before settlement can
        // price the protocol cut. Absence is non-retryable for this match.
        let fee_object = self
            .ledger
            .get_object(&self.fee_config_id)
            .await
            .map_err(EngineError::transient)?
            .ok_or_else(|| {
                EngineError::Validation("fee configuration object missing from ledger".to_string())
            })?;
        let fee_config: FeeConfig = serde_json::from_value(fee_object.content)
            .map_err(|e| EngineError::Validation(format!("malformed fee configuration: {}", e)))?;
        debug!(
            fee_bps = fee_config.fee_bps,
            treasury = %fee_config.treasury,
            "Fee configuration present"
        );

        // Final valuations must reflect current market state: bypass the
        // matching-time cache.
        let squad1_prices = self.resolve_squad_prices(&m.squad1_id, true).await?;
        let squad2_prices = self.resolve_squad_prices(&m.squad2_id, true).await?;

        if self.dry_run {
            info!(match_id = %m.id, "Dry run: would submit settle_match");
            return Ok(SubmitOutcome::Skipped);
        }

        let request = TxRequest {
            request_id: Uuid::new_v4().to_string(),
            sender: self.sender.clone(),
            kind: TransactionKind::SettleMatch {
                match_id: m.id.clone(),
                squad1_final_prices: squad1_prices.iter().map(|p| p.price).collect(),
                squad2_final_prices: squad2_prices.iter().map(|p| p.price).collect(),
            },
        };
        let status = self
            .ledger
            .submit_transaction(&request)
            .await
            .map_err(EngineError::transient)?;
        Ok(self.classify(status, &request, "settlement"))
    }

    /// Read-only distribution counts over the given match set.
    pub fn match_statistics(&self, matches: &[Match], now_ms: i64) -> MatchStatistics {
        match_statistics(matches, now_ms)
    }

    /// Idempotency guard: scan recent match-created events for either bid.
    async fn pair_already_matched(&self, bid1_id: &str, bid2_id: &str) -> EngineResult<bool> {
        let filter = EventFilter::new(&self.module, EVENT_MATCH_CREATED);
        let page = self
            .ledger
            .query_events(&filter, None, self.event_page_size, true)
            .await
            .map_err(EngineError::transient)?;

        for event in page.events {
            let created: MatchCreatedEvent = match serde_json::from_value(event.payload) {
                Ok(c) => c,
                Err(e) => {
                    warn!(tx = %event.tx_digest, error = %e, "Skipping malformed MatchCreated event");
                    continue;
                }
            };
            if [bid1_id, bid2_id]
                .iter()
                .any(|id| created.bid1_id == *id || created.bid2_id == *id)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Load a squad's constituents and resolve their prices. A squad that
    /// yields zero price entries cannot be valued and fails validation.
    async fn resolve_squad_prices(
        &self,
        squad_id: &str,
        fresh: bool,
    ) -> EngineResult<Vec<TokenPrice>> {
        let object = self
            .ledger
            .get_object(squad_id)
            .await
            .map_err(EngineError::transient)?
            .ok_or_else(|| {
                EngineError::Validation(format!("squad object {} not found", squad_id))
            })?;
        let squad: SquadObject = serde_json::from_value(object.content)
            .map_err(|e| EngineError::Validation(format!("malformed squad {}: {}", squad_id, e)))?;

        if squad.token_refs.is_empty() {
            return Err(EngineError::Validation(format!(
                "squad {} has no constituent tokens",
                squad_id
            )));
        }
        let prices = self.oracle.resolve(&squad.token_refs, fresh).await?;
        if prices.is_empty() {
            return Err(EngineError::Validation(format!(
                "squad {} yielded zero price entries",
                squad_id
            )));
        }
        Ok(prices)
    }

    /// Classify a ledger-reported outcome. The recognized conflict code
    /// is a no-op skip; anything else failing is a plain failure.
    fn classify(&self, status: TxStatus, request: &TxRequest, what: &str) -> SubmitOutcome {
        if status.is_conflict(self.abort_already_matched) {
            info!(
                request_id = %request.request_id,
                code = self.abort_already_matched,
                "Ledger reports {} already handled, skipping", what
            );
            return SubmitOutcome::Skipped;
        }
        match status {
            TxStatus::Success { tx_digest } => {
                info!(
                    request_id = %request.request_id,
                    tx = %tx_digest,
                    kind = request.kind.name(),
                    "Submitted {}", what
                );
                SubmitOutcome::Submitted
            }
            TxStatus::Failure { code, message } => {
                warn!(
                    request_id = %request.request_id,
                    code,
                    message = %message,
                    "Ledger rejected {}", what
                );
                SubmitOutcome::Failed
            }
        }
    }
}

/// Pair compatible open bids: distinct squads, exactly equal stakes,
/// differing creators, both Open as of `now_ms`. Emits no duplicate and
/// no self pairs. Correctness-first O(n²); an index over
/// (squad pair, stake) would bring this near-linear at scale, but the
/// compatibility rules would be unchanged.
pub fn find_compatible_pairs(bids: &[Bid], now_ms: i64) -> Vec<MatchableBidPair> {
    let mut by_squad: BTreeMap<&str, Vec<&Bid>> = BTreeMap::new();
    for bid in bids.iter().filter(|b| b.is_open_at(now_ms)) {
        by_squad.entry(bid.squad_id.as_str()).or_default().push(bid);
    }

    let squads: Vec<&str> = by_squad.keys().copied().collect();
    let mut pairs = Vec::new();
    // squad1 < squad2 so no squad pair is visited twice and no bid can
    // pair against its own squad.
    for (i, squad1) in squads.iter().enumerate() {
        for squad2 in &squads[i + 1..] {
            for bid1 in &by_squad[squad1] {
                for bid2 in &by_squad[squad2] {
                    if bid1.bid_amount == bid2.bid_amount && bid1.creator != bid2.creator {
                        pairs.push(MatchableBidPair {
                            bid1: (*bid1).clone(),
                            bid2: (*bid2).clone(),
                        });
                    }
                }
            }
        }
    }
    pairs
}

/// Pure filter: Active matches whose window has elapsed. The boundary is
/// inclusive: ends_at == now is expired.
pub fn find_expired_matches(matches: &[Match], now_ms: i64) -> Vec<Match> {
    matches
        .iter()
        .filter(|m| m.is_expired_at(now_ms))
        .cloned()
        .collect()
}

/// Distribution counts over a match set; derived, never persisted.
pub fn match_statistics(matches: &[Match], now_ms: i64) -> MatchStatistics {
    let mut stats = MatchStatistics::default();
    for m in matches {
        if m.status == MatchStatus::Active {
            if m.is_expired_at(now_ms) {
                stats.expired_matches += 1;
            } else {
                stats.active_matches += 1;
            }
        }
        *stats.by_squad_pair.entry(m.squad_pair_key()).or_insert(0) += 1;
        *stats.by_duration_ms.entry(m.duration_ms).or_insert(0) += 1;
        *stats.by_prize.entry(m.total_prize).or_insert(0) += 1;
    }
    stats
}
