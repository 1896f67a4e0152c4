//! Ledger Types - Wire structures for the ledger gateway API

use serde::{Deserialize, Serialize};

use crate::types::{Bid, Match};

/// Abort code the wager package raises when a bid pair or match has
/// already been handled. Config-overridable; this is the package default.
pub const ABORT_ALREADY_MATCHED: u64 = 7;

/// Event type names emitted by the wager module
pub const EVENT_BID_CREATED: &str = "BidCreated";
pub const EVENT_BID_MATCHED: &str = "BidMatched";
pub const EVENT_BID_CANCELLED: &str = "BidCancelled";
pub const EVENT_MATCH_CREATED: &str = "MatchCreated";

/// A ledger object as returned by an object-state read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerObject {
    pub object_id: String,
    pub version: u64,
    /// Owning address, absent for shared objects
    #[serde(default)]
    pub owner: Option<String>,
    /// Object fields, shape depends on the object type
    pub content: serde_json::Value,
}

/// Content of the bid registry object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidRegistrySnapshot {
    pub bids: Vec<Bid>,
}

/// Content of the match registry object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRegistrySnapshot {
    pub matches: Vec<Match>,
}

/// Content of a squad object: the basket definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquadObject {
    pub squad_id: String,
    #[serde(default)]
    pub name: String,
    /// Constituent token references, in basket order
    pub token_refs: Vec<String>,
}

/// Content of the protocol fee configuration object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    pub fee_bps: u64,
    pub treasury: String,
}

/// Filter for event-log queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub module: String,
    pub event_type: String,
}

impl EventFilter {
    pub fn new(module: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            event_type: event_type.into(),
        }
    }
}

/// Opaque position in the event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCursor {
    pub tx_digest: String,
    pub event_seq: u64,
}

/// One emitted event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub tx_digest: String,
    pub event_seq: u64,
    pub timestamp_ms: i64,
    pub event_type: String,
    /// Typed payload, shape depends on event_type
    pub payload: serde_json::Value,
}

/// One page of an event-log query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPage {
    pub events: Vec<LedgerEvent>,
    #[serde(default)]
    pub next_cursor: Option<EventCursor>,
    #[serde(default)]
    pub has_next_page: bool,
}

/// Payload of a BidCreated event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidCreatedEvent {
    pub bid_id: String,
    pub creator: String,
    pub squad_id: String,
    pub bid_amount: u64,
    pub duration_ms: i64,
    pub created_at: i64,
}

/// Payload of a BidMatched event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidMatchedEvent {
    pub bid_id: String,
    pub match_id: String,
}

/// Payload of a BidCancelled event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidCancelledEvent {
    pub bid_id: String,
}

/// Payload of a MatchCreated event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCreatedEvent {
    pub match_id: String,
    pub bid1_id: String,
    pub bid2_id: String,
}

/// Entry points this engine invokes on the wager package
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionKind {
    /// Pair two open bids into a match, recording entry valuations
    CreateMatch {
        bid1_id: String,
        bid2_id: String,
        squad1_prices: Vec<u64>,
        squad2_prices: Vec<u64>,
    },
    /// Record the outcome and claim the prize in one atomic transaction
    SettleMatch {
        match_id: String,
        squad1_final_prices: Vec<u64>,
        squad2_final_prices: Vec<u64>,
    },
}

impl TransactionKind {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            TransactionKind::CreateMatch { .. } => "create_match",
            TransactionKind::SettleMatch { .. } => "settle_match",
        }
    }
}

/// A signed submission to the ledger write API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRequest {
    /// Correlation id for log tracing, not consumed on-chain
    pub request_id: String,
    pub sender: String,
    #[serde(flatten)]
    pub kind: TransactionKind,
}

/// Tagged result of a submitted transaction. Abort outcomes carry a code
/// from the package's fixed vocabulary; never parse free-text messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TxStatus {
    Success { tx_digest: String },
    Failure { code: u64, message: String },
}

impl TxStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TxStatus::Success { .. })
    }

    /// Whether this failure is the recognized idempotency conflict.
    pub fn is_conflict(&self, recognized_code: u64) -> bool {
        matches!(self, TxStatus::Failure { code, .. } if *code == recognized_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_status_tagged_roundtrip() {
        let ok = TxStatus::Success {
            tx_digest: "0xd1".into(),
        };
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "success");

        let fail: TxStatus = serde_json::from_value(serde_json::json!({
            "status": "failure",
            "code": 7,
            "message": "EAlreadyMatched"
        }))
        .unwrap();
        assert!(fail.is_conflict(ABORT_ALREADY_MATCHED));
        assert!(!fail.is_conflict(3));
        assert!(!fail.is_success());
    }

    #[test]
    fn tx_request_flattens_kind() {
        let req = TxRequest {
            request_id: "r-1".into(),
            sender: "0xbot".into(),
            kind: TransactionKind::CreateMatch {
                bid1_id: "0xb1".into(),
                bid2_id: "0xb2".into(),
                squad1_prices: vec![10, 20],
                squad2_prices: vec![30],
            },
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["kind"], "create_match");
        assert_eq!(json["bid1_id"], "0xb1");
    }
}
