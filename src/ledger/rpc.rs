//! Ledger RPC Client
//!
//! Handles HTTP communication with the ledger gateway node. Reads are
//! plain JSON-RPC calls; transaction submission is authenticated with an
//! HMAC-SHA256 signature over the request body.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE},
    Client,
};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use std::time::Duration;

use super::types::{EventCursor, EventFilter, EventPage, LedgerObject, TxRequest, TxStatus};

/// Read/write surface the engine needs from the ledger. Seam for tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerApi: Send + Sync {
    /// Object-state read. `None` when the object does not exist.
    async fn get_object(&self, object_id: &str) -> Result<Option<LedgerObject>>;

    /// Paginated, ordered, filterable event-log query.
    async fn query_events(
        &self,
        filter: &EventFilter,
        cursor: Option<EventCursor>,
        limit: usize,
        descending: bool,
    ) -> Result<EventPage>;

    /// Whether `owner` currently owns the capability object.
    async fn owns_capability(&self, owner: &str, capability_id: &str) -> Result<bool>;

    /// Submit a signed transaction and await its tagged result.
    async fn submit_transaction(&self, request: &TxRequest) -> Result<TxStatus>;
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

/// JSON-RPC client for the ledger gateway
pub struct LedgerClient {
    client: Client,
    rpc_url: String,
    signer_address: String,
    signer_secret: String,
}

impl LedgerClient {
    /// Create a new client. The secret stays in memory for the run's
    /// lifetime and is only used to sign write calls.
    pub fn new(rpc_url: &str, signer_address: String, signer_secret: String) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            rpc_url: rpc_url.trim_end_matches('/').to_string(),
            signer_address,
            signer_secret,
        }
    }

    /// Signing address this client submits transactions as.
    pub fn signer_address(&self) -> &str {
        &self.signer_address
    }

    /// Build write-auth headers: HMAC-SHA256 over timestamp + method + body.
    fn build_auth_headers(&self, method: &str, body: &str) -> Result<HeaderMap> {
        let timestamp = Utc::now().timestamp().to_string();
        let message = format!("{}{}{}", timestamp, method, body);

        let secret_bytes = general_purpose::URL_SAFE_NO_PAD
            .decode(&self.signer_secret)
            .or_else(|_| general_purpose::URL_SAFE.decode(&self.signer_secret))
            .context("Failed to decode AUTOMATION_SECRET as url-safe base64")?;

        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(&secret_bytes)
            .context("Failed to initialize HMAC for transaction signature")?;
        mac.update(message.as_bytes());
        let signature = general_purpose::URL_SAFE.encode(mac.finalize().into_bytes());

        let mut headers = HeaderMap::new();
        headers.insert(
            "AUTOMATION_ADDRESS",
            HeaderValue::from_str(&self.signer_address)
                .context("Invalid AUTOMATION_ADDRESS header value")?,
        );
        headers.insert(
            "AUTOMATION_SIGNATURE",
            HeaderValue::from_str(&signature)
                .context("Invalid AUTOMATION_SIGNATURE header value")?,
        );
        headers.insert(
            "AUTOMATION_TIMESTAMP",
            HeaderValue::from_str(&timestamp)
                .context("Invalid AUTOMATION_TIMESTAMP header value")?,
        );
        Ok(headers)
    }

    async fn rpc_call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
        auth: bool,
    ) -> Result<Option<T>> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let mut request = self.client.post(&self.rpc_url).json(&body);
        if auth {
            let body_str = serde_json::to_string(&body)?;
            request = request.headers(self.build_auth_headers(method, &body_str)?);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Ledger RPC request failed: {}", method))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Ledger RPC {} returned HTTP {}: {}", method, status, text);
        }

        let rpc: RpcResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to decode ledger RPC response: {}", method))?;

        if let Some(err) = rpc.error {
            bail!("Ledger RPC {} error {}: {}", method, err.code, err.message);
        }
        Ok(rpc.result)
    }
}

#[async_trait]
impl LedgerApi for LedgerClient {
    async fn get_object(&self, object_id: &str) -> Result<Option<LedgerObject>> {
        self.rpc_call("ledger_getObject", json!([object_id]), false)
            .await
    }

    async fn query_events(
        &self,
        filter: &EventFilter,
        cursor: Option<EventCursor>,
        limit: usize,
        descending: bool,
    ) -> Result<EventPage> {
        let page: Option<EventPage> = self
            .rpc_call(
                "ledger_queryEvents",
                json!([filter, cursor, limit, descending]),
                false,
            )
            .await?;
        page.context("Ledger RPC ledger_queryEvents returned no result")
    }

    async fn owns_capability(&self, owner: &str, capability_id: &str) -> Result<bool> {
        let object = self.get_object(capability_id).await?;
        Ok(object
            .and_then(|obj| obj.owner)
            .map(|cap_owner| cap_owner == owner)
            .unwrap_or(false))
    }

    async fn submit_transaction(&self, request: &TxRequest) -> Result<TxStatus> {
        let status: Option<TxStatus> = self
            .rpc_call(
                "ledger_executeTransaction",
                json!([request]),
                true,
            )
            .await?;
        status.context("Ledger RPC ledger_executeTransaction returned no result")
    }
}
