//! FundUpdater: refreshes the cached USD valuation of stored addresses.
//!
//! Picks the most stale rows that plausibly hold value, makes sure
//! prices are current (native token first), collects balances through
//! the adaptive reader, and writes nothing but `fund` and
//! `last_fund_updated` so classification fields stay untouched.

use {
    crate::{run::JobEnv, token_list},
    alloy_primitives::{Address, U256},
    anyhow::{Context, Result, anyhow},
    balances::BalanceReader,
    chain::Chain,
    database::{addresses, addresses::FundSelection, token_metadata_cache, tokens, unix_now},
    explorer::ExplorerClient,
    prices::{OracleConfig, PriceOracle, sources},
    sqlx::PgPool,
    std::{sync::Arc, time::Duration},
};

/// A single address valued above this is assumed to be a measurement
/// artifact and skipped for the run.
const ANOMALY_USD_CEILING: f64 = 1e12;

#[derive(Clone, Copy, Debug)]
pub struct FundConfig {
    pub all: bool,
    pub high_fund: bool,
    pub stale_after: Duration,
    pub max_batch: i64,
    pub force_price_update: bool,
    pub price_stale_after: Duration,
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "fund_updater")]
struct Metrics {
    /// Rows selected for revaluation.
    candidates: prometheus::IntGauge,
    /// Rows whose fund value was written.
    valued: prometheus::IntCounter,
    /// Rows skipped because a component value failed the sanity check.
    anomalies: prometheus::IntCounter,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}

pub struct FundUpdater {
    chain: Chain,
    network: &'static str,
    db: PgPool,
    explorer: Arc<ExplorerClient>,
    reader: Option<BalanceReader>,
    oracle: PriceOracle,
    config: FundConfig,
    token_dir: std::path::PathBuf,
    metrics: &'static Metrics,
}

impl FundUpdater {
    pub fn new(env: JobEnv, config: FundConfig) -> Self {
        let reader = env
            .balance_helper
            .map(|helper| BalanceReader::new(env.rpc.clone(), helper));
        let oracle = PriceOracle::new(
            OracleConfig {
                force_refresh: config.force_price_update,
                stale_after: config.price_stale_after,
                ..Default::default()
            },
            sources::default_sources(),
            env.db.clone(),
        );
        Self {
            chain: env.chain,
            network: env.chain.name(),
            db: env.db,
            explorer: env.explorer,
            reader,
            oracle,
            config,
            token_dir: env.token_list_dir,
            metrics: Metrics::get(),
        }
    }

    pub async fn run(self) -> Result<()> {
        let reader = self
            .reader
            .as_ref()
            .ok_or_else(|| anyhow!("fund updates need a BalanceHelper address"))?;

        self.bootstrap_whitelist().await?;
        self.fill_token_metadata().await;
        let native_price = self.refresh_prices().await?;

        let mut con = self.db.acquire().await?;
        let candidates = addresses::outdated_for_fund(
            &mut con,
            self.network,
            FundSelection {
                all: self.config.all,
                high_fund: self.config.high_fund,
                stale_after_secs: i64::try_from(self.config.stale_after.as_secs())
                    .unwrap_or(i64::MAX),
                max_batch: self.config.max_batch,
            },
        )
        .await
        .context("select outdated addresses")?;
        let whitelist = tokens::whitelist(&mut con, self.network).await?;
        drop(con);

        #[allow(clippy::cast_possible_wrap)]
        self.metrics.candidates.set(candidates.len() as i64);
        tracing::info!(candidates = candidates.len(), "selected for revaluation");
        if candidates.is_empty() {
            return Ok(());
        }

        let holders: Vec<Address> = candidates
            .iter()
            .filter_map(|candidate| candidate.address.parse().ok())
            .collect();
        let priced_tokens: Vec<(Address, i32, f64)> = whitelist
            .iter()
            .filter(|token| token.is_valid)
            .filter_map(|token| {
                let address = token.token_address.parse().ok()?;
                let price = token.price?;
                Some((address, token.decimals, price))
            })
            .collect();
        let token_addresses: Vec<Address> =
            priced_tokens.iter().map(|(address, ..)| *address).collect();

        let native = reader
            .native_balances(&holders)
            .await
            .context("collect native balances")?;
        let erc20 = reader
            .erc20_balances(&holders, &token_addresses)
            .await
            .context("collect token balances")?;

        let mut valuations: Vec<(String, i64)> = Vec::with_capacity(holders.len());
        let mut anomalies = 0u64;
        for (holder, native_balance) in holders.iter().zip(&native) {
            let token_holdings: Vec<(U256, i32, f64)> = priced_tokens
                .iter()
                .map(|(token, decimals, price)| {
                    let balance = erc20
                        .get(holder)
                        .and_then(|held| held.get(token))
                        .copied()
                        .unwrap_or(U256::ZERO);
                    (balance, *decimals, *price)
                })
                .collect();
            match value_in_usd(*native_balance, native_price, &token_holdings) {
                Some(fund) => valuations.push((format!("{holder:?}"), fund)),
                None => anomalies += 1,
            }
        }

        let mut con = self.db.acquire().await?;
        addresses::set_funds(&mut con, self.network, &valuations)
            .await
            .context("write valuations")?;

        self.metrics.valued.inc_by(valuations.len() as u64);
        self.metrics.anomalies.inc_by(anomalies);
        tracing::info!(
            valued = valuations.len(),
            anomalies,
            "fund update complete"
        );
        Ok(())
    }

    /// Makes sure the prices the valuation is about to use are current.
    /// The chain's native token always refreshes first.
    async fn refresh_prices(&self) -> Result<f64> {
        let native_symbol = self.chain.native_symbol();
        let native_price = self
            .oracle
            .price(native_symbol)
            .await
            .context("native token price")?
            .unwrap_or_else(|| {
                tracing::warn!(%native_symbol, "no native price, native balances value as zero");
                0.0
            });

        let mut con = self.db.acquire().await?;
        let newest = tokens::newest_price_update(&mut con, self.network).await?;
        drop(con);
        let stale_cutoff = unix_now()
            - i64::try_from(self.config.price_stale_after.as_secs()).unwrap_or(i64::MAX);
        if self.config.force_price_update || newest < stale_cutoff {
            self.oracle
                .refresh_token_prices(self.network)
                .await
                .context("refresh token prices")?;
        }
        Ok(native_price)
    }

    async fn bootstrap_whitelist(&self) -> Result<()> {
        let whitelist = token_list::load(&self.token_dir, self.chain)?;
        if whitelist.is_empty() {
            return Ok(());
        }
        let mut con = self.db.acquire().await?;
        tokens::bootstrap(&mut con, self.network, &token_list::to_db_tokens(&whitelist))
            .await
            .context("bootstrap token whitelist")
    }

    /// Fills the 30-day metadata cache for whitelisted tokens the
    /// explorer has not described yet. Best effort: a miss only means
    /// the next run asks again.
    async fn fill_token_metadata(&self) {
        let result: Result<()> = async {
            let mut con = self.db.acquire().await?;
            let whitelist = tokens::whitelist(&mut con, self.network).await?;
            for token in whitelist {
                if token_metadata_cache::get(&mut con, self.network, &token.token_address)
                    .await?
                    .is_some()
                {
                    continue;
                }
                let Ok(parsed) = token.token_address.parse() else {
                    continue;
                };
                match self.explorer.token_info(parsed).await {
                    Ok(Some(info)) => {
                        let metadata = token_metadata_cache::TokenMetadata {
                            token_address: token.token_address.clone(),
                            symbol: info.symbol,
                            name: info.name,
                            decimals: info.decimals.and_then(|d| d.parse().ok()),
                            logo_url: info.logo_url,
                            last_updated: unix_now(),
                        };
                        token_metadata_cache::upsert(&mut con, self.network, &metadata).await?;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::debug!(token = %token.token_address, ?err, "token info unavailable");
                    }
                }
            }
            Ok(())
        }
        .await;
        if let Err(err) = result {
            tracing::warn!(?err, "token metadata refresh failed");
        }
    }
}

/// Total USD value of one address, floored to whole dollars. `None`
/// when any component value fails the sanity check; the address is then
/// skipped for this run rather than stored with a bogus number.
fn value_in_usd(
    native_wei: U256,
    native_price: f64,
    tokens: &[(U256, i32, f64)],
) -> Option<i64> {
    let mut total = component_usd(native_wei, 18, native_price)?;
    for (balance, decimals, price) in tokens {
        total += component_usd(*balance, *decimals, *price)?;
    }
    if total > ANOMALY_USD_CEILING {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    Some(total.floor() as i64)
}

fn component_usd(balance: U256, decimals: i32, price: f64) -> Option<f64> {
    let units = u256_to_f64(balance) / 10f64.powi(decimals);
    let value = units * price;
    (value.is_finite() && value >= 0.0 && value <= ANOMALY_USD_CEILING).then_some(value)
}

fn u256_to_f64(value: U256) -> f64 {
    value.to_string().parse().unwrap_or(f64::INFINITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wei(eth: u64) -> U256 {
        U256::from(eth) * U256::from(10u64).pow(U256::from(18))
    }

    #[test]
    fn values_native_balance() {
        // 2 ETH at $2500.
        assert_eq!(value_in_usd(wei(2), 2500.0, &[]), Some(5000));
    }

    #[test]
    fn values_tokens_with_their_decimals() {
        // 100 USDT (6 decimals) at $1 on top of 1 ETH at $2000.
        let tokens = vec![(U256::from(100_000_000u64), 6, 1.0)];
        assert_eq!(value_in_usd(wei(1), 2000.0, &tokens), Some(2100));
    }

    #[test]
    fn floors_to_whole_dollars() {
        // 1.5 tokens at $1.99 = $2.985.
        let tokens = vec![(U256::from(1_500_000u64), 6, 1.99)];
        assert_eq!(value_in_usd(U256::ZERO, 0.0, &tokens), Some(2));
    }

    #[test]
    fn anomalous_component_skips_the_address() {
        let huge = U256::MAX;
        assert_eq!(value_in_usd(huge, 2500.0, &[]), None);
        let tokens = vec![(U256::from(1u64), 0, f64::NAN)];
        assert_eq!(value_in_usd(U256::ZERO, 0.0, &tokens), None);
    }

    #[test]
    fn unpriced_chain_values_as_zero() {
        assert_eq!(value_in_usd(wei(3), 0.0, &[]), Some(0));
    }

    #[test]
    fn u256_conversion_is_monotonic_for_common_sizes() {
        assert_eq!(u256_to_f64(U256::ZERO), 0.0);
        assert_eq!(u256_to_f64(U256::from(1_000u64)), 1000.0);
        assert!(u256_to_f64(wei(1_000_000)) > u256_to_f64(wei(999_999)));
    }
}
