//! Block-explorer REST client.
//!
//! One HTTP surface hides two dialects: the unified multi-chain endpoint
//! (selected with a `chainid` query parameter) and dedicated per-chain
//! hosts. Non-proxy modules answer with a `{status, message, result}`
//! envelope where `status = "0"` plus a "No data found" style message is
//! a *negative answer*, not a failure; proxy modules answer with a raw
//! JSON-RPC envelope instead.

mod envelope;
mod key_ring;

pub use {envelope::Outcome, key_ring::KeyRing};

use {
    alloy_primitives::Address,
    serde::Deserialize,
    std::time::{Duration, Instant},
    tokio::sync::Mutex,
    url::Url,
};

/// The explorer caps `getcontractcreation` at five addresses per call.
pub const CREATION_BATCH_LIMIT: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("explorer rate limit hit on every key")]
    RateLimited,
    #[error("all configured api keys were rejected")]
    AllKeysInvalid,
    #[error("malformed explorer response: {0}")]
    Malformed(String),
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Clone, Debug)]
pub struct ExplorerConfig {
    pub dialect: chain::Explorer,
    pub api_keys: Vec<String>,
    /// Keys also rotate after this many requests, spreading the load.
    pub rotate_every: u32,
    /// Minimum spacing between requests (the public tier allows 5/s).
    pub min_request_interval: Duration,
    pub request_timeout: Duration,
    /// Attempts per logical call; each retry rotates the key.
    pub max_attempts: u32,
}

impl ExplorerConfig {
    pub fn new(dialect: chain::Explorer, api_keys: Vec<String>) -> Self {
        Self {
            dialect,
            api_keys,
            rotate_every: 500,
            min_request_interval: Duration::from_millis(200),
            request_timeout: Duration::from_secs(20),
            max_attempts: 4,
        }
    }
}

/// Verified source metadata of a contract.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ContractSource {
    #[serde(rename = "ContractName")]
    pub contract_name: String,
    #[serde(rename = "CompilerVersion", default)]
    pub compiler_version: String,
    #[serde(rename = "Proxy", default)]
    pub proxy: String,
    #[serde(rename = "SourceCode", default)]
    source_code: String,
}

impl ContractSource {
    /// The explorer answers unverified contracts with an empty source
    /// body rather than an empty envelope.
    pub fn is_verified(&self) -> bool {
        !self.source_code.is_empty() && !self.contract_name.is_empty()
    }
}

/// Creation info for a contract. `tx_hash` stays a string because
/// genesis deployments carry a `GENESIS…` marker instead of a real
/// transaction hash.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ContractCreation {
    #[serde(rename = "contractAddress")]
    pub contract_address: String,
    #[serde(rename = "contractCreator")]
    pub creator: String,
    #[serde(rename = "txHash")]
    pub tx_hash: String,
    #[serde(rename = "timestamp", default)]
    pub timestamp: Option<String>,
}

pub const GENESIS_MARKER: &str = "GENESIS";

impl ContractCreation {
    pub fn is_genesis(&self) -> bool {
        self.tx_hash.starts_with(GENESIS_MARKER)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TokenInfo {
    #[serde(rename = "symbol", default)]
    pub symbol: Option<String>,
    #[serde(rename = "tokenName", default)]
    pub name: Option<String>,
    #[serde(rename = "divisor", default)]
    pub decimals: Option<String>,
    #[serde(rename = "tokenImage", default)]
    pub logo_url: Option<String>,
}

pub struct ExplorerClient {
    config: ExplorerConfig,
    client: reqwest::Client,
    keys: KeyRing,
    last_request: Mutex<Option<Instant>>,
}

impl ExplorerClient {
    pub fn new(config: ExplorerConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let keys = KeyRing::new(config.api_keys.clone(), config.rotate_every);
        Ok(Self {
            config,
            client,
            keys,
            last_request: Mutex::new(None),
        })
    }

    /// Source metadata, `Ok(None)` when the explorer has never seen the
    /// address as a contract.
    pub async fn contract_source(
        &self,
        address: Address,
    ) -> Result<Option<ContractSource>, Error> {
        let outcome: Outcome<Vec<ContractSource>> = self
            .get(&[
                ("module", "contract".to_string()),
                ("action", "getsourcecode".to_string()),
                ("address", format!("{address:?}")),
            ])
            .await?;
        Ok(outcome.into_option().and_then(|mut list| {
            (!list.is_empty()).then(|| list.swap_remove(0))
        }))
    }

    /// Creation transactions for up to [`CREATION_BATCH_LIMIT`]
    /// contracts at once.
    pub async fn contract_creations(
        &self,
        addresses: &[Address],
    ) -> Result<Vec<ContractCreation>, Error> {
        debug_assert!(addresses.len() <= CREATION_BATCH_LIMIT);
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let joined = addresses
            .iter()
            .map(|a| format!("{a:?}"))
            .collect::<Vec<_>>()
            .join(",");
        let outcome: Outcome<Vec<ContractCreation>> = self
            .get(&[
                ("module", "contract".to_string()),
                ("action", "getcontractcreation".to_string()),
                ("contractaddresses", joined),
            ])
            .await?;
        Ok(outcome.into_option().unwrap_or_default())
    }

    /// The latest block mined at or before the given timestamp.
    pub async fn block_by_timestamp(&self, timestamp: i64) -> Result<u64, Error> {
        let outcome: Outcome<String> = self
            .get(&[
                ("module", "block".to_string()),
                ("action", "getblocknobytime".to_string()),
                ("timestamp", timestamp.to_string()),
                ("closest", "before".to_string()),
            ])
            .await?;
        let number = outcome
            .into_option()
            .ok_or_else(|| Error::Malformed("no block for timestamp".into()))?;
        number
            .parse()
            .map_err(|_| Error::Malformed(format!("unparsable block number: {number}")))
    }

    /// Timestamp of a block, via the proxy module (raw JSON-RPC shape,
    /// no status envelope).
    pub async fn block_timestamp(&self, number: u64) -> Result<Option<i64>, Error> {
        #[derive(Deserialize)]
        struct ProxyBlock {
            timestamp: String,
        }
        let result: Option<ProxyBlock> = self
            .get_proxy(&[
                ("module", "proxy".to_string()),
                ("action", "eth_getBlockByNumber".to_string()),
                ("tag", format!("0x{number:x}")),
                ("boolean", "false".to_string()),
            ])
            .await?;
        result
            .map(|block| {
                let digits = block.timestamp.strip_prefix("0x").unwrap_or(&block.timestamp);
                i64::from_str_radix(digits, 16)
                    .map_err(|_| Error::Malformed(format!("bad timestamp: {}", block.timestamp)))
            })
            .transpose()
    }

    /// A transaction looked up through the proxy module. Used to resolve
    /// deployment times from creation transactions.
    pub async fn transaction_block(&self, tx_hash: &str) -> Result<Option<u64>, Error> {
        #[derive(Deserialize)]
        struct ProxyTransaction {
            #[serde(rename = "blockNumber")]
            block_number: Option<String>,
        }
        let result: Option<ProxyTransaction> = self
            .get_proxy(&[
                ("module", "proxy".to_string()),
                ("action", "eth_getTransactionByHash".to_string()),
                ("txhash", tx_hash.to_string()),
            ])
            .await?;
        Ok(result.and_then(|tx| tx.block_number).and_then(|raw| {
            let digits = raw.strip_prefix("0x").unwrap_or(&raw);
            u64::from_str_radix(digits, 16).ok()
        }))
    }

    /// Token shape for the metadata cache.
    pub async fn token_info(&self, address: Address) -> Result<Option<TokenInfo>, Error> {
        let outcome: Outcome<Vec<TokenInfo>> = self
            .get(&[
                ("module", "token".to_string()),
                ("action", "tokeninfo".to_string()),
                ("contractaddress", format!("{address:?}")),
            ])
            .await?;
        Ok(outcome.into_option().and_then(|mut list| {
            (!list.is_empty()).then(|| list.swap_remove(0))
        }))
    }

    /// Issues one enveloped request, rotating keys on rate limits and
    /// rejected keys.
    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        params: &[(&str, String)],
    ) -> Result<Outcome<T>, Error> {
        let mut rejected_keys = 0;
        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(400 * u64::from(attempt))).await;
            }
            self.respect_budget().await;
            let url = self.build_url(params);
            let body: serde_json::Value = self.client.get(url).send().await?.json().await?;
            match envelope::parse::<T>(&body) {
                Ok(outcome) => return Ok(outcome),
                Err(envelope::ParseError::RateLimited) => {
                    tracing::debug!(attempt, "explorer rate limited, rotating key");
                    self.keys.rotate();
                }
                Err(envelope::ParseError::InvalidKey) => {
                    rejected_keys += 1;
                    if rejected_keys >= self.keys.len() {
                        return Err(Error::AllKeysInvalid);
                    }
                    self.keys.rotate();
                }
                Err(envelope::ParseError::Malformed(reason)) => {
                    return Err(Error::Malformed(reason));
                }
            }
        }
        Err(Error::RateLimited)
    }

    /// Issues one proxy-module request (raw JSON-RPC result shape).
    async fn get_proxy<T: serde::de::DeserializeOwned>(
        &self,
        params: &[(&str, String)],
    ) -> Result<Option<T>, Error> {
        self.respect_budget().await;
        let url = self.build_url(params);
        let body: serde_json::Value = self.client.get(url).send().await?.json().await?;
        envelope::parse_proxy(&body).map_err(|err| match err {
            envelope::ParseError::RateLimited => Error::RateLimited,
            envelope::ParseError::InvalidKey => Error::AllKeysInvalid,
            envelope::ParseError::Malformed(reason) => Error::Malformed(reason),
        })
    }

    fn build_url(&self, params: &[(&str, String)]) -> Url {
        let (base, chain_id) = match self.config.dialect {
            chain::Explorer::Unified { base, chain_id } => (base, Some(chain_id)),
            chain::Explorer::Dedicated { base } => (base, None),
        };
        let mut url: Url = base.parse().expect("static explorer url is valid");
        {
            let mut query = url.query_pairs_mut();
            if let Some(id) = chain_id {
                query.append_pair("chainid", &id.to_string());
            }
            for (key, value) in params {
                query.append_pair(key, value);
            }
            if let Some(key) = self.keys.current() {
                query.append_pair("apikey", &key);
            }
        }
        url
    }

    async fn respect_budget(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.config.min_request_interval {
                tokio::time::sleep(self.config.min_request_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verified_requires_name_and_source() {
        let verified = ContractSource {
            contract_name: "TetherToken".into(),
            compiler_version: "v0.4.18".into(),
            proxy: "0".into(),
            source_code: "contract TetherToken {}".into(),
        };
        assert!(verified.is_verified());
        let unverified = ContractSource {
            contract_name: String::new(),
            compiler_version: String::new(),
            proxy: String::new(),
            source_code: String::new(),
        };
        assert!(!unverified.is_verified());
    }

    #[test]
    fn genesis_marker_detection() {
        let creation = ContractCreation {
            contract_address: "0x0".into(),
            creator: "0x0".into(),
            tx_hash: "GENESIS_6a254dd4a5b7e0a0".into(),
            timestamp: None,
        };
        assert!(creation.is_genesis());
    }

    #[test]
    fn unified_dialect_carries_chainid() {
        let config = ExplorerConfig::new(
            chain::Explorer::Unified {
                base: "https://api.etherscan.io/v2/api",
                chain_id: 137,
            },
            vec!["KEY".into()],
        );
        let client = ExplorerClient::new(config).unwrap();
        let url = client.build_url(&[("module", "block".to_string())]);
        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(query.contains(&("chainid".to_string(), "137".to_string())));
        assert!(query.contains(&("apikey".to_string(), "KEY".to_string())));
    }

    #[test]
    fn dedicated_dialect_omits_chainid() {
        let config = ExplorerConfig::new(
            chain::Explorer::Dedicated {
                base: "https://api.bscscan.com/api",
            },
            vec![],
        );
        let client = ExplorerClient::new(config).unwrap();
        let url = client.build_url(&[]);
        assert!(url.query_pairs().all(|(k, _)| k != "chainid" && k != "apikey"));
    }
}
