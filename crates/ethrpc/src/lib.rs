//! Thin JSON-RPC client for EVM node gateways.
//!
//! The client owns transport concerns: endpoint failover, deadlines,
//! retry with backoff, request spacing, and classifying gateway error
//! strings into typed kinds. It deliberately does *not* own `eth_getLogs`
//! range policy; the scanner decides whether to shrink, split, skip or
//! permanently exclude a range based on the error kind reported here.

pub mod error;
pub mod types;

pub use error::Error;

use {
    alloy_primitives::{Address, B256, Bytes},
    chain::Tier,
    serde::de::DeserializeOwned,
    serde_json::{Value, json},
    std::{
        sync::atomic::{AtomicU64, Ordering},
        time::{Duration, Instant},
    },
    tokio::sync::{Mutex, OnceCell},
    types::{Block, Log, LogFilter, Transaction},
    url::Url,
};

/// Gateway-specific method reporting the account's service tier.
const TIER_INFO_METHOD: &str = "gateway_serviceTier";

#[derive(Clone, Debug)]
pub struct RpcConfig {
    /// Primary gateway first, fallbacks after.
    pub urls: Vec<Url>,
    /// Deadline for a single attempt.
    pub request_timeout: Duration,
    /// Attempts across the whole URL ring before giving up.
    pub max_attempts: u32,
    /// Minimum spacing between requests. `None` disables the budget,
    /// which is the mode used behind a local proxy.
    pub min_request_interval: Option<Duration>,
    /// `None` probes the gateway at first use.
    pub tier: Option<Tier>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            request_timeout: Duration::from_secs(30),
            max_attempts: 3,
            min_request_interval: Some(Duration::from_millis(200)),
            tier: None,
        }
    }
}

pub struct RpcClient {
    config: RpcConfig,
    client: reqwest::Client,
    id: AtomicU64,
    last_request: Mutex<Option<Instant>>,
    tier: OnceCell<Tier>,
}

impl RpcClient {
    pub fn new(config: RpcConfig) -> Result<Self, Error> {
        if config.urls.is_empty() {
            return Err(Error::InvalidResponse("no gateway urls configured".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            config,
            client,
            id: AtomicU64::new(1),
            last_request: Mutex::new(None),
            tier: OnceCell::new(),
        })
    }

    /// The service tier of the primary gateway. Probed once on first
    /// use; any probe failure means `free`, the conservative answer.
    pub async fn tier(&self) -> Tier {
        if let Some(tier) = self.config.tier {
            return tier;
        }
        *self
            .tier
            .get_or_init(|| async {
                match self.request::<types::TierInfo>(TIER_INFO_METHOD, json!([])).await {
                    Ok(info) => {
                        tracing::info!(tier = %info.tier, "gateway tier detected");
                        info.tier
                    }
                    Err(err) => {
                        tracing::debug!(?err, "tier probe failed, assuming free");
                        Tier::Free
                    }
                }
            })
            .await
    }

    pub async fn block_number(&self) -> Result<u64, Error> {
        let value: types::U64Hex = self.request("eth_blockNumber", json!([])).await?;
        Ok(value.0)
    }

    pub async fn block_by_number(&self, number: u64) -> Result<Option<Block>, Error> {
        self.request(
            "eth_getBlockByNumber",
            json!([types::to_hex(number), false]),
        )
        .await
    }

    pub async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, Error> {
        self.request("eth_getLogs", json!([filter])).await
    }

    pub async fn call(&self, to: Address, data: &Bytes) -> Result<Bytes, Error> {
        self.request(
            "eth_call",
            json!([{ "to": to, "data": data }, "latest"]),
        )
        .await
    }

    pub async fn get_code(&self, address: Address) -> Result<Bytes, Error> {
        self.request("eth_getCode", json!([address, "latest"])).await
    }

    /// Fetches code for many addresses in a single JSON-RPC batch.
    /// Results are positional; an address whose sub-request failed maps
    /// to `None` so the caller can skip it instead of guessing.
    pub async fn batch_get_code(
        &self,
        addresses: &[Address],
    ) -> Result<Vec<Option<Bytes>>, Error> {
        let calls: Vec<(&str, Value)> = addresses
            .iter()
            .map(|address| ("eth_getCode", json!([address, "latest"])))
            .collect();
        let results = self.request_batch(&calls).await?;
        Ok(results
            .into_iter()
            .map(|result| result.and_then(|value| serde_json::from_value(value).ok()))
            .collect())
    }

    pub async fn transaction_by_hash(
        &self,
        hash: B256,
    ) -> Result<Option<Transaction>, Error> {
        self.request("eth_getTransactionByHash", json!([hash])).await
    }

    pub async fn balance(&self, address: Address) -> Result<alloy_primitives::U256, Error> {
        self.request("eth_getBalance", json!([address, "latest"])).await
    }

    /// Issues a single JSON-RPC request, retrying transient failures
    /// with exponential backoff across the gateway ring. Classified
    /// `getLogs` failures (too many results, response too large, range
    /// too wide) surface immediately because retrying the identical
    /// request cannot succeed.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, Error> {
        let mut last_error = None;
        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(error::backoff(attempt)).await;
            }
            let url = &self.config.urls[attempt as usize % self.config.urls.len()];
            match self.request_once(url, method, params.clone()).await {
                Ok(value) => {
                    return serde_json::from_value(value)
                        .map_err(|err| Error::InvalidResponse(err.to_string()));
                }
                Err(err) if err.is_transient() => {
                    tracing::debug!(%method, attempt, ?err, "rpc attempt failed");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        match last_error {
            Some(Error::Timeout) => Err(Error::Timeout),
            _ => Err(Error::Exhausted),
        }
    }

    /// Issues many requests as one JSON-RPC batch. Transport errors fail
    /// the whole batch; per-item RPC errors map to `None` entries.
    pub async fn request_batch(
        &self,
        calls: &[(&str, Value)],
    ) -> Result<Vec<Option<Value>>, Error> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        let first_id = self.id.fetch_add(calls.len() as u64, Ordering::Relaxed);
        let body: Vec<Value> = calls
            .iter()
            .enumerate()
            .map(|(i, (method, params))| {
                json!({
                    "jsonrpc": "2.0",
                    "id": first_id + i as u64,
                    "method": method,
                    "params": params,
                })
            })
            .collect();

        self.respect_budget().await;
        let url = &self.config.urls[0];
        let response = self
            .client
            .post(url.clone())
            .json(&body)
            .send()
            .await
            .map_err(Error::from_reqwest)?;
        let envelopes: Vec<types::ResponseEnvelope> =
            response.json().await.map_err(Error::from_reqwest)?;

        // Batch responses may arrive in any order.
        let mut results: Vec<Option<Value>> = vec![None; calls.len()];
        for envelope in envelopes {
            let index = envelope.id.checked_sub(first_id).map(|i| i as usize);
            let Some(slot) = index.and_then(|i| results.get_mut(i)) else {
                return Err(Error::InvalidResponse("unknown id in batch response".into()));
            };
            if let Some(err) = envelope.error {
                tracing::debug!(code = err.code, message = %err.message, "batch item failed");
                continue;
            }
            *slot = Some(envelope.result);
        }
        Ok(results)
    }

    async fn request_once(
        &self,
        url: &Url,
        method: &str,
        params: Value,
    ) -> Result<Value, Error> {
        self.respect_budget().await;
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });
        let response = self
            .client
            .post(url.clone())
            .json(&body)
            .send()
            .await
            .map_err(Error::from_reqwest)?;
        let envelope: types::ResponseEnvelope =
            response.json().await.map_err(Error::from_reqwest)?;
        if let Some(err) = envelope.error {
            return Err(error::classify(err.code, &err.message, err.data.as_ref()));
        }
        Ok(envelope.result)
    }

    /// Enforces the minimum spacing between requests unless the budget
    /// is disabled.
    async fn respect_budget(&self) {
        let Some(interval) = self.config.min_request_interval else {
            return;
        };
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < interval {
                tokio::time::sleep(interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_url_ring() {
        assert!(RpcClient::new(RpcConfig::default()).is_err());
    }

    #[tokio::test]
    async fn configured_tier_skips_probe() {
        let config = RpcConfig {
            urls: vec!["http://localhost:1".parse().unwrap()],
            tier: Some(Tier::Premium),
            ..Default::default()
        };
        let client = RpcClient::new(config).unwrap();
        assert_eq!(client.tier().await, Tier::Premium);
    }
}
