//! Bid Registry - Open-bid discovery from ledger state
//!
//! Primary path reads the live bid-registry object in one round trip.
//! If that read is unavailable the registry falls back to replaying the
//! bid event streams: exclusion sets from matched/cancelled events, then
//! a bounded newest-first scan of creation events.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::ledger::{
    BidCancelledEvent, BidCreatedEvent, BidMatchedEvent, BidRegistrySnapshot, EventFilter,
    LedgerApi, EVENT_BID_CANCELLED, EVENT_BID_CREATED, EVENT_BID_MATCHED,
};
use crate::types::{Bid, BidStatus};

pub struct BidRegistry {
    ledger: Arc<dyn LedgerApi>,
    registry_id: String,
    module: String,
    /// Page size for fallback event scans
    page_size: usize,
    /// Below this many open bids, the fallback pages back once more
    min_open_for_scan: usize,
}

impl BidRegistry {
    pub fn new(
        ledger: Arc<dyn LedgerApi>,
        registry_id: String,
        module: String,
        page_size: usize,
        min_open_for_scan: usize,
    ) -> Self {
        Self {
            ledger,
            registry_id,
            module,
            page_size,
            min_open_for_scan,
        }
    }

    /// Currently open, non-expired bids.
    pub async fn list_open_bids(&self) -> Result<Vec<Bid>> {
        let now_ms = Utc::now().timestamp_millis();
        match self.read_snapshot().await {
            Ok(bids) => {
                let open: Vec<Bid> = bids.into_iter().filter(|b| b.is_open_at(now_ms)).collect();
                debug!(open = open.len(), "Listed open bids from registry snapshot");
                Ok(open)
            }
            Err(e) => {
                warn!(error = %e, "Registry snapshot unavailable, replaying event log");
                self.replay_from_events(now_ms).await
            }
        }
    }

    /// Pre-submission guard. Re-runs discovery; membership is not assumed
    /// stable between discovery and submission.
    pub async fn is_still_open(&self, bid_id: &str) -> Result<bool> {
        let open = self.list_open_bids().await?;
        Ok(open.iter().any(|b| b.id == bid_id))
    }

    async fn read_snapshot(&self) -> Result<Vec<Bid>> {
        let object = self
            .ledger
            .get_object(&self.registry_id)
            .await?
            .context("Bid registry object not found")?;
        let snapshot: BidRegistrySnapshot = serde_json::from_value(object.content)
            .context("Malformed bid registry content")?;
        Ok(snapshot.bids)
    }

    /// Degraded path: derive open bids from the three bid event streams.
    /// The scan is bounded: one page of creation events newest-first,
    /// plus at most one further page if too few open bids were found.
    async fn replay_from_events(&self, now_ms: i64) -> Result<Vec<Bid>> {
        let matched = self.exclusion_set(EVENT_BID_MATCHED).await?;
        let cancelled = self.exclusion_set(EVENT_BID_CANCELLED).await?;

        let filter = EventFilter::new(&self.module, EVENT_BID_CREATED);
        let mut open: Vec<Bid> = Vec::new();
        let mut cursor = None;

        for page_index in 0..2 {
            let page = self
                .ledger
                .query_events(&filter, cursor, self.page_size, true)
                .await
                .context("Failed to query bid creation events")?;

            for event in &page.events {
                let created: BidCreatedEvent =
                    match serde_json::from_value(event.payload.clone()) {
                        Ok(c) => c,
                        Err(e) => {
                            warn!(tx = %event.tx_digest, error = %e, "Skipping malformed BidCreated event");
                            continue;
                        }
                    };
                if matched.contains(&created.bid_id) || cancelled.contains(&created.bid_id) {
                    continue;
                }
                let bid = Bid {
                    id: created.bid_id,
                    creator: created.creator,
                    squad_id: created.squad_id,
                    bid_amount: created.bid_amount,
                    duration_ms: created.duration_ms,
                    created_at: created.created_at,
                    status: BidStatus::Open,
                };
                if bid.is_open_at(now_ms) {
                    open.push(bid);
                }
            }

            if open.len() >= self.min_open_for_scan || !page.has_next_page {
                break;
            }
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
            debug!(
                open = open.len(),
                page = page_index + 1,
                "Few open bids found, paging further back"
            );
        }

        debug!(open = open.len(), "Reconstructed open bids from event log");
        Ok(open)
    }

    /// One page of matched/cancelled ids, newest first. A bounded set is
    /// acceptable here: anything older than the creation-scan window
    /// cannot appear in the scan either.
    async fn exclusion_set(&self, event_type: &str) -> Result<HashSet<String>> {
        let filter = EventFilter::new(&self.module, event_type);
        let page = self
            .ledger
            .query_events(&filter, None, self.page_size, true)
            .await
            .with_context(|| format!("Failed to query {} events", event_type))?;

        let mut ids = HashSet::new();
        for event in page.events {
            let bid_id = if event_type == EVENT_BID_MATCHED {
                serde_json::from_value::<BidMatchedEvent>(event.payload)
                    .map(|e| e.bid_id)
            } else {
                serde_json::from_value::<BidCancelledEvent>(event.payload)
                    .map(|e| e.bid_id)
            };
            match bid_id {
                Ok(id) => {
                    ids.insert(id);
                }
                Err(e) => {
                    warn!(event_type, error = %e, "Skipping malformed exclusion event")
                }
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{EventCursor, EventPage, LedgerEvent, MockLedgerApi};
    use serde_json::json;

    fn snapshot_object(bids: serde_json::Value) -> crate::ledger::LedgerObject {
        crate::ledger::LedgerObject {
            object_id: "0xreg".into(),
            version: 1,
            owner: None,
            content: json!({ "bids": bids }),
        }
    }

    fn open_bid_json(id: &str, creator: &str, created_at: i64) -> serde_json::Value {
        json!({
            "id": id,
            "creator": creator,
            "squad_id": "0xsquad1",
            "bid_amount": 1_000_000u64,
            "duration_ms": 3_600_000i64,
            "created_at": created_at,
            "status": "Open"
        })
    }

    fn created_event(bid_id: &str, created_at: i64) -> LedgerEvent {
        LedgerEvent {
            tx_digest: format!("0xtx-{bid_id}"),
            event_seq: 0,
            timestamp_ms: created_at,
            event_type: EVENT_BID_CREATED.into(),
            payload: json!({
                "bid_id": bid_id,
                "creator": "0xalice",
                "squad_id": "0xsquad1",
                "bid_amount": 1_000_000u64,
                "duration_ms": 3_600_000i64,
                "created_at": created_at,
            }),
        }
    }

    fn bid_id_event(event_type: &str, bid_id: &str) -> LedgerEvent {
        LedgerEvent {
            tx_digest: format!("0xtx-{bid_id}"),
            event_seq: 0,
            timestamp_ms: 0,
            event_type: event_type.into(),
            payload: if event_type == EVENT_BID_MATCHED {
                json!({ "bid_id": bid_id, "match_id": "0xm" })
            } else {
                json!({ "bid_id": bid_id })
            },
        }
    }

    fn registry(ledger: MockLedgerApi) -> BidRegistry {
        BidRegistry::new(Arc::new(ledger), "0xreg".into(), "squad_wager".into(), 100, 2)
    }

    #[tokio::test]
    async fn snapshot_path_filters_expired_and_non_open() {
        let now = Utc::now().timestamp_millis();
        let mut ledger = MockLedgerApi::new();
        let mut cancelled = open_bid_json("0xb3", "0xcarol", now - 1_000);
        cancelled["status"] = json!("Cancelled");
        let bids = json!([
            open_bid_json("0xb1", "0xalice", now - 1_000),
            // expired long ago
            open_bid_json("0xb2", "0xbob", now - 10_000_000),
            cancelled,
        ]);
        ledger
            .expect_get_object()
            .returning(move |_| Ok(Some(snapshot_object(bids.clone()))));

        let open = registry(ledger).list_open_bids().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, "0xb1");
    }

    #[tokio::test]
    async fn fallback_applies_exclusion_sets() {
        let now = Utc::now().timestamp_millis();
        let mut ledger = MockLedgerApi::new();
        ledger
            .expect_get_object()
            .returning(|_| anyhow::bail!("node unavailable"));
        ledger
            .expect_query_events()
            .returning(move |filter, _, _, _| {
                let events = match filter.event_type.as_str() {
                    EVENT_BID_MATCHED => vec![bid_id_event(EVENT_BID_MATCHED, "0xb2")],
                    EVENT_BID_CANCELLED => vec![bid_id_event(EVENT_BID_CANCELLED, "0xb3")],
                    _ => vec![
                        created_event("0xb1", now - 1_000),
                        created_event("0xb2", now - 1_000),
                        created_event("0xb3", now - 1_000),
                    ],
                };
                Ok(EventPage {
                    events,
                    next_cursor: None,
                    has_next_page: false,
                })
            });

        let open = registry(ledger).list_open_bids().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, "0xb1");
    }

    #[tokio::test]
    async fn fallback_pages_back_once_when_few_open() {
        let now = Utc::now().timestamp_millis();
        let mut ledger = MockLedgerApi::new();
        ledger
            .expect_get_object()
            .returning(|_| anyhow::bail!("node unavailable"));
        ledger
            .expect_query_events()
            .returning(move |filter, cursor, _, _| {
                if filter.event_type != EVENT_BID_CREATED {
                    return Ok(EventPage {
                        events: vec![],
                        next_cursor: None,
                        has_next_page: false,
                    });
                }
                if cursor.is_none() {
                    Ok(EventPage {
                        events: vec![created_event("0xb1", now - 1_000)],
                        next_cursor: Some(EventCursor {
                            tx_digest: "0xtx-0xb1".into(),
                            event_seq: 0,
                        }),
                        has_next_page: true,
                    })
                } else {
                    Ok(EventPage {
                        events: vec![created_event("0xb2", now - 2_000)],
                        next_cursor: None,
                        has_next_page: false,
                    })
                }
            });

        // min_open_for_scan = 2, so one open bid triggers the second page.
        let open = registry(ledger).list_open_bids().await.unwrap();
        assert_eq!(open.len(), 2);
    }

    #[tokio::test]
    async fn is_still_open_reruns_discovery() {
        let now = Utc::now().timestamp_millis();
        let mut ledger = MockLedgerApi::new();
        let bids = json!([open_bid_json("0xb1", "0xalice", now - 1_000)]);
        ledger
            .expect_get_object()
            .times(2)
            .returning(move |_| Ok(Some(snapshot_object(bids.clone()))));

        let registry = registry(ledger);
        assert!(registry.is_still_open("0xb1").await.unwrap());
        assert!(!registry.is_still_open("0xmissing").await.unwrap());
    }
}
