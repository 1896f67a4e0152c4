//! Price Oracle Client
//!
//! Resolves squad constituent tokens to normalized integer prices.
//! Matching-time lookups go through a short-TTL cache; settlement-time
//! lookups bypass it so final valuations always reflect current market
//! state. The cache is owned here and never exposed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::types::TokenPrice;

/// Raw quotation source. Tokens with no listing are absent from the map.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn fetch_quotes(&self, tokens: &[String]) -> Result<HashMap<String, f64>>;
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    prices: HashMap<String, f64>,
}

/// HTTP implementation of the oracle's price-lookup service
pub struct HttpPriceFeed {
    client: Client,
    base_url: String,
}

impl HttpPriceFeed {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PriceFeed for HttpPriceFeed {
    async fn fetch_quotes(&self, tokens: &[String]) -> Result<HashMap<String, f64>> {
        let url = format!("{}/prices", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("tokens", tokens.join(","))])
            .send()
            .await
            .context("Price oracle request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Price oracle returned HTTP {}", status);
        }

        let quotes: QuoteResponse = response
            .json()
            .await
            .context("Failed to decode price oracle response")?;
        Ok(quotes.prices)
    }
}

/// Normalize an external quotation to a non-negative integer price.
/// Fractional sub-units are truncated toward zero, never rounded up,
/// so a valuation can never be inflated. Negative or non-finite quotes
/// count as missing data.
pub fn normalize_price(quote: f64, scale: u64) -> Option<u64> {
    if !quote.is_finite() || quote < 0.0 {
        return None;
    }
    let scaled = (quote * scale as f64).trunc();
    if scaled > u64::MAX as f64 {
        return None;
    }
    Some(scaled as u64)
}

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    price: u64,
    fetched_at: i64,
}

/// Price resolution with a matching-time cache and a settlement-time
/// bypass. Sole owner of the cache.
pub struct PriceOracleClient {
    feed: Box<dyn PriceFeed>,
    cache: Mutex<HashMap<String, CachedPrice>>,
    ttl_ms: i64,
    scale: u64,
}

impl PriceOracleClient {
    pub fn new(feed: Box<dyn PriceFeed>, cache_ttl_secs: u64, price_scale: u64) -> Self {
        Self {
            feed,
            cache: Mutex::new(HashMap::new()),
            ttl_ms: (cache_ttl_secs as i64) * 1_000,
            scale: price_scale,
        }
    }

    /// Resolve prices for the given tokens, in input order.
    ///
    /// `fresh = true` bypasses the cache entirely and must be used for
    /// settlement valuations. Fails with `MissingPriceData` naming every
    /// token for which no quotation could be obtained; callers must not
    /// substitute a default price.
    pub async fn resolve(&self, tokens: &[String], fresh: bool) -> EngineResult<Vec<TokenPrice>> {
        let now_ms = Utc::now().timestamp_millis();
        let mut resolved: HashMap<String, TokenPrice> = HashMap::new();
        let mut misses: Vec<String> = Vec::new();

        if fresh {
            misses = tokens.to_vec();
        } else {
            let cache = self.cache.lock().expect("price cache lock poisoned");
            for token in tokens {
                match cache.get(token) {
                    Some(entry) if now_ms - entry.fetched_at <= self.ttl_ms => {
                        resolved.insert(
                            token.clone(),
                            TokenPrice {
                                token: token.clone(),
                                price: entry.price,
                                timestamp: entry.fetched_at,
                            },
                        );
                    }
                    _ => misses.push(token.clone()),
                }
            }
        }

        if !misses.is_empty() {
            debug!(count = misses.len(), fresh, "Fetching live quotations");
            let quotes = self
                .feed
                .fetch_quotes(&misses)
                .await
                .map_err(EngineError::transient)?;

            let mut missing: Vec<String> = Vec::new();
            let fetched_at = Utc::now().timestamp_millis();
            let mut cache = self.cache.lock().expect("price cache lock poisoned");
            for token in &misses {
                let price = quotes.get(token).and_then(|q| normalize_price(*q, self.scale));
                match price {
                    Some(price) => {
                        cache.insert(
                            token.clone(),
                            CachedPrice { price, fetched_at },
                        );
                        resolved.insert(
                            token.clone(),
                            TokenPrice {
                                token: token.clone(),
                                price,
                                timestamp: fetched_at,
                            },
                        );
                    }
                    None => missing.push(token.clone()),
                }
            }

            if !missing.is_empty() {
                warn!(tokens = ?missing, "Oracle returned no usable quotation");
                return Err(EngineError::MissingPriceData { tokens: missing });
            }
        }

        // Duplicate token refs resolve to the same entry.
        tokens
            .iter()
            .map(|token| {
                resolved
                    .get(token)
                    .cloned()
                    .ok_or_else(|| EngineError::MissingPriceData {
                        tokens: vec![token.clone()],
                    })
            })
            .collect()
    }

    /// End-to-end health probe used during scheduler setup.
    pub async fn probe(&self, token: &str) -> EngineResult<()> {
        self.resolve(&[token.to_string()], true).await.map(|_| ())
    }
}
