//! Multi-source USD price oracle.
//!
//! Lookups try sources in priority order and the first usable answer
//! wins. Answers live in a short-TTL in-process cache and are persisted
//! to the `symbol_prices` table so other jobs and later runs start warm.
//! The table is shared across per-chain processes, so writes happen
//! under the database advisory lock.

pub mod sources;

pub use sources::PriceSource;

use {
    database::{advisory_lock, symbol_prices, tokens, unix_now},
    moka::sync::Cache,
    sqlx::PgPool,
    std::{collections::HashMap, time::Duration},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("malformed price response: {0}")]
    Malformed(String),
}

/// A returned price is suspicious when it exceeds the last known price
/// by this factor. A known upstream bug once returned inflated prices
/// for a handful of tokens.
pub const ANOMALY_FACTOR: f64 = 100.0;

#[derive(Clone, Debug)]
pub struct OracleConfig {
    pub cache_ttl: Duration,
    /// DB prices older than this are refreshed on access.
    pub stale_after: Duration,
    /// Bypasses both the cache and the staleness check.
    pub force_refresh: bool,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60),
            stale_after: Duration::from_secs(7 * 24 * 60 * 60),
            force_refresh: false,
        }
    }
}

/// Validates a price against basic sanity rules and, when available, the
/// last known reference value. Returns `None` for anything suspicious.
pub fn sanitize(symbol: &str, value: f64, reference: Option<f64>) -> Option<f64> {
    if !value.is_finite() || value < 0.0 {
        tracing::warn!(%symbol, value, "discarding non-finite or negative price");
        return None;
    }
    if let Some(reference) = reference {
        if reference > 0.0 && value > reference * ANOMALY_FACTOR {
            tracing::warn!(%symbol, value, reference, "discarding anomalous price");
            return None;
        }
    }
    Some(value)
}

pub struct PriceOracle {
    /// Sources in try order (highest priority first).
    sources: Vec<Box<dyn PriceSource>>,
    cache: Cache<String, f64>,
    pool: PgPool,
    config: OracleConfig,
}

impl PriceOracle {
    /// `sources` must already be filtered to enabled ones; they are
    /// sorted by ascending priority number (lower tries first).
    pub fn new(
        config: OracleConfig,
        mut sources: Vec<(u32, Box<dyn PriceSource>)>,
        pool: PgPool,
    ) -> Self {
        sources.sort_by_key(|(priority, _)| *priority);
        Self {
            sources: sources.into_iter().map(|(_, source)| source).collect(),
            cache: Cache::builder().time_to_live(config.cache_ttl).build(),
            pool,
            config,
        }
    }

    /// USD price for a ticker. `None` means no source knows it, which
    /// callers treat as "skip this token for now", never as an error.
    pub async fn price(&self, symbol: &str) -> Result<Option<f64>, Error> {
        if !self.config.force_refresh {
            if let Some(cached) = self.cache.get(symbol) {
                return Ok(Some(cached));
            }
            if let Some(stored) = self.fresh_stored_price(symbol).await? {
                self.cache.insert(symbol.to_string(), stored);
                return Ok(Some(stored));
            }
        }

        let reference = self.stored_reference(symbol).await?;
        for source in &self.sources {
            match source.spot(symbol).await {
                Ok(Some(value)) => {
                    let Some(value) = sanitize(symbol, value, reference) else {
                        continue;
                    };
                    self.remember(symbol, value).await?;
                    return Ok(Some(value));
                }
                Ok(None) => continue,
                Err(err) => {
                    tracing::debug!(source = source.name(), %symbol, ?err, "price source failed");
                    continue;
                }
            }
        }
        tracing::debug!(%symbol, "no price source could answer");
        Ok(None)
    }

    /// Bulk lookup: one wide ticker response from the first source that
    /// supports it, then per-symbol fallback for the misses.
    pub async fn prices(&self, symbols: &[String]) -> Result<HashMap<String, f64>, Error> {
        let mut resolved = HashMap::new();

        for source in &self.sources {
            match source.bulk().await {
                Ok(Some(tickers)) => {
                    for symbol in symbols {
                        if let Some(&value) = tickers.get(symbol) {
                            let reference = self.stored_reference(symbol).await?;
                            if let Some(value) = sanitize(symbol, value, reference) {
                                resolved.insert(symbol.clone(), value);
                            }
                        }
                    }
                    break;
                }
                Ok(None) => continue,
                Err(err) => {
                    tracing::debug!(source = source.name(), ?err, "bulk price fetch failed");
                    continue;
                }
            }
        }

        for symbol in symbols {
            if resolved.contains_key(symbol) {
                continue;
            }
            if let Some(value) = self.price(symbol).await? {
                resolved.insert(symbol.clone(), value);
            }
        }

        if !resolved.is_empty() {
            self.persist(&resolved).await?;
            for (symbol, value) in &resolved {
                self.cache.insert(symbol.clone(), *value);
            }
        }
        Ok(resolved)
    }

    /// Refreshes the per-token USD prices of a chain's whitelist in the
    /// `tokens` table.
    pub async fn refresh_token_prices(&self, network: &str) -> Result<usize, Error> {
        let mut con = self.pool.acquire().await?;
        let whitelist = tokens::whitelist(&mut con, network).await?;
        let symbols: Vec<String> = whitelist.iter().map(|t| t.symbol.clone()).collect();
        let resolved = self.prices(&symbols).await?;

        let updates: Vec<(String, f64)> = whitelist
            .iter()
            .filter_map(|token| {
                resolved
                    .get(&token.symbol)
                    .map(|price| (token.token_address.clone(), *price))
            })
            .collect();
        if !updates.is_empty() {
            tokens::update_prices(&mut con, network, &updates, unix_now()).await?;
        }
        tracing::info!(
            network,
            refreshed = updates.len(),
            whitelisted = whitelist.len(),
            "token prices refreshed"
        );
        Ok(updates.len())
    }

    async fn fresh_stored_price(&self, symbol: &str) -> Result<Option<f64>, Error> {
        let mut con = self.pool.acquire().await?;
        let stored = symbol_prices::get(&mut con, symbol).await?;
        let stale_cutoff = unix_now() - i64::try_from(self.config.stale_after.as_secs()).unwrap_or(i64::MAX);
        Ok(stored
            .filter(|price| price.last_updated >= stale_cutoff)
            .map(|price| price.price_usd))
    }

    async fn stored_reference(&self, symbol: &str) -> Result<Option<f64>, Error> {
        let mut con = self.pool.acquire().await?;
        Ok(symbol_prices::get(&mut con, symbol)
            .await?
            .map(|price| price.price_usd))
    }

    async fn remember(&self, symbol: &str, value: f64) -> Result<(), Error> {
        self.cache.insert(symbol.to_string(), value);
        self.persist(&HashMap::from([(symbol.to_string(), value)])).await
    }

    /// Writes prices to the shared table under the advisory lock.
    async fn persist(&self, prices: &HashMap<String, f64>) -> Result<(), Error> {
        let rows: Vec<symbol_prices::SymbolPrice> = prices
            .iter()
            .map(|(symbol, value)| symbol_prices::SymbolPrice {
                symbol: symbol.clone(),
                price_usd: *value,
                decimals: None,
                name: None,
                last_updated: unix_now(),
            })
            .collect();

        let mut con = self.pool.acquire().await?;
        advisory_lock::acquire(&mut con, advisory_lock::SYMBOL_PRICES_LOCK).await?;
        let result = symbol_prices::upsert_all(&mut con, &rows).await;
        let released = advisory_lock::release(&mut con, advisory_lock::SYMBOL_PRICES_LOCK).await;
        result?;
        if !released? {
            tracing::warn!("symbol price lock was not held at release");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_rejects_garbage() {
        assert_eq!(sanitize("ETH", f64::NAN, None), None);
        assert_eq!(sanitize("ETH", f64::INFINITY, None), None);
        assert_eq!(sanitize("ETH", -1.0, None), None);
        assert_eq!(sanitize("ETH", 2500.0, None), Some(2500.0));
    }

    #[test]
    fn sanitize_rejects_anomalies_against_reference() {
        assert_eq!(sanitize("ETH", 2500.0, Some(2400.0)), Some(2500.0));
        assert_eq!(sanitize("ETH", 2400.0 * ANOMALY_FACTOR * 2.0, Some(2400.0)), None);
        // Without a reference, large values pass the basic checks.
        assert!(sanitize("ETH", 1_000_000.0, None).is_some());
    }

    #[test]
    fn cache_honors_ttl_config() {
        let cache: Cache<String, f64> = Cache::builder()
            .time_to_live(Duration::from_secs(60))
            .build();
        cache.insert("ETH".to_string(), 2500.0);
        assert_eq!(cache.get("ETH"), Some(2500.0));
    }
}
