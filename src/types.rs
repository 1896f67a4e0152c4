//! Core types used throughout SquadBot
//!
//! Defines the domain model for bids, matches and prices as they exist
//! on the wager ledger.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Lifecycle of a bid on the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BidStatus {
    Open,
    Matched,
    Cancelled,
    Expired,
}

impl Default for BidStatus {
    fn default() -> Self {
        BidStatus::Open
    }
}

impl fmt::Display for BidStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BidStatus::Open => write!(f, "OPEN"),
            BidStatus::Matched => write!(f, "MATCHED"),
            BidStatus::Cancelled => write!(f, "CANCELLED"),
            BidStatus::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// A party's offer to wager a stake against a squad
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    /// Ledger object id
    pub id: String,
    /// Address of the party that created the bid
    pub creator: String,
    /// Squad (token basket) the bid is backing
    pub squad_id: String,
    /// Stake in smallest units
    pub bid_amount: u64,
    /// Wager window length in milliseconds
    pub duration_ms: i64,
    /// Creation timestamp in milliseconds
    pub created_at: i64,
    /// Current status as read from the ledger
    pub status: BidStatus,
}

impl Bid {
    /// Expiry is always derived, never stored independently.
    pub fn expires_at(&self) -> i64 {
        self.created_at + self.duration_ms
    }

    /// A bid is matchable while Open and not past its expiry (inclusive).
    pub fn is_open_at(&self, now_ms: i64) -> bool {
        self.status == BidStatus::Open && now_ms <= self.expires_at()
    }
}

/// Lifecycle of a match; monotonic, Active is the only non-terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchStatus {
    Active,
    Completed,
    Tied,
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStatus::Active => write!(f, "ACTIVE"),
            MatchStatus::Completed => write!(f, "COMPLETED"),
            MatchStatus::Tied => write!(f, "TIED"),
        }
    }
}

/// A committed pairing of two bids
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    /// Ledger object id
    pub id: String,
    pub bid1_id: String,
    pub bid2_id: String,
    pub player1: String,
    pub player2: String,
    pub squad1_id: String,
    pub squad2_id: String,
    /// Combined stake in smallest units
    pub total_prize: u64,
    /// Match window length in milliseconds
    pub duration_ms: i64,
    /// Start timestamp in milliseconds
    pub started_at: i64,
    pub status: MatchStatus,
    /// Winning address, absent while active and on ties
    pub winner: Option<String>,
    pub prize_claimed: bool,
    pub fees_collected: bool,
    /// Sum of constituent prices at match time
    pub squad1_initial_value: u64,
    pub squad2_initial_value: u64,
    /// Populated at settlement
    pub squad1_final_value: Option<u64>,
    pub squad2_final_value: Option<u64>,
}

impl Match {
    /// End time is always derived from start + duration.
    pub fn ends_at(&self) -> i64 {
        self.started_at + self.duration_ms
    }

    /// Inclusive boundary: a match ending exactly now is expired.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.status == MatchStatus::Active && now_ms >= self.ends_at()
    }

    /// Structural sanity check applied before settlement is attempted.
    pub fn is_well_formed(&self) -> bool {
        self.duration_ms > 0
            && self.total_prize > 0
            && self.bid1_id != self.bid2_id
            && self.player1 != self.player2
            && self.squad1_id != self.squad2_id
    }

    /// Canonical squad-pair key used for statistics grouping.
    pub fn squad_pair_key(&self) -> String {
        if self.squad1_id <= self.squad2_id {
            format!("{}|{}", self.squad1_id, self.squad2_id)
        } else {
            format!("{}|{}", self.squad2_id, self.squad1_id)
        }
    }
}

/// Ephemeral pairing produced by the matching step; never persisted
#[derive(Debug, Clone)]
pub struct MatchableBidPair {
    pub bid1: Bid,
    pub bid2: Bid,
}

/// Normalized price for one squad constituent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPrice {
    /// Token reference within the squad
    pub token: String,
    /// Normalized non-negative integer price
    pub price: u64,
    /// When the quotation was obtained, milliseconds
    pub timestamp: i64,
}

/// Classification of one submission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Transaction landed successfully
    Submitted,
    /// Idempotent no-op (already matched/settled, stale bid, dry run)
    Skipped,
    /// Ledger reported a failure other than the recognized conflict
    Failed,
}

impl SubmitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SubmitOutcome::Submitted)
    }
}

impl fmt::Display for SubmitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitOutcome::Submitted => write!(f, "SUBMITTED"),
            SubmitOutcome::Skipped => write!(f, "SKIPPED"),
            SubmitOutcome::Failed => write!(f, "FAILED"),
        }
    }
}

/// Read-only statistics derived from the current match set
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchStatistics {
    pub active_matches: usize,
    pub expired_matches: usize,
    /// Matches grouped by canonical squad pair
    pub by_squad_pair: HashMap<String, usize>,
    /// Matches grouped by window length in milliseconds
    pub by_duration_ms: HashMap<i64, usize>,
    /// Matches grouped by total prize
    pub by_prize: HashMap<u64, usize>,
}

impl MatchStatistics {
    /// Squad pairs ordered by match count, busiest first.
    pub fn top_squad_pairs(&self, n: usize) -> Vec<(String, usize)> {
        let mut pairs: Vec<(String, usize)> = self
            .by_squad_pair
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        pairs.truncate(n);
        pairs
    }
}
