//! The individual price sources, in their default priority order:
//! Binance (bulk capable), Coinbase, Kraken, OKX, then the CoinGecko
//! aggregator. Each source answers `Ok(None)` when it simply does not
//! list the symbol; transport and shape problems are errors so the
//! oracle can log and fall through.

use {
    crate::Error,
    async_trait::async_trait,
    serde::Deserialize,
    std::{collections::HashMap, time::Duration},
};

#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// USD spot price of one ticker.
    async fn spot(&self, symbol: &str) -> Result<Option<f64>, Error>;

    /// One wide ticker dump covering many symbols. Sources without such
    /// an endpoint answer `Ok(None)` and the oracle falls back to
    /// per-symbol lookups.
    async fn bulk(&self) -> Result<Option<HashMap<String, f64>>, Error> {
        Ok(None)
    }
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("static client configuration is valid")
}

fn parse_price(raw: &str, source: &str) -> Result<f64, Error> {
    raw.parse()
        .map_err(|_| Error::Malformed(format!("{source}: unparsable price {raw:?}")))
}

pub struct Binance {
    client: reqwest::Client,
    base: String,
}

impl Binance {
    pub fn new() -> Self {
        Self {
            client: http_client(),
            base: "https://api.binance.com".to_string(),
        }
    }
}

impl Default for Binance {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct BinanceTicker {
    symbol: String,
    price: String,
}

#[async_trait]
impl PriceSource for Binance {
    fn name(&self) -> &'static str {
        "binance"
    }

    async fn spot(&self, symbol: &str) -> Result<Option<f64>, Error> {
        let url = format!("{}/api/v3/ticker/price?symbol={symbol}USDT", self.base);
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            // Unknown trading pair.
            return Ok(None);
        }
        let ticker: BinanceTicker = response.error_for_status()?.json().await?;
        parse_price(&ticker.price, self.name()).map(Some)
    }

    async fn bulk(&self) -> Result<Option<HashMap<String, f64>>, Error> {
        let url = format!("{}/api/v3/ticker/price", self.base);
        let tickers: Vec<BinanceTicker> = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let mut prices = HashMap::new();
        for ticker in tickers {
            // Only the USDT quote pairs map cleanly onto USD tickers.
            if let Some(base) = ticker.symbol.strip_suffix("USDT") {
                if let Ok(price) = ticker.price.parse() {
                    prices.insert(base.to_string(), price);
                }
            }
        }
        Ok(Some(prices))
    }
}

pub struct Coinbase {
    client: reqwest::Client,
    base: String,
}

impl Coinbase {
    pub fn new() -> Self {
        Self {
            client: http_client(),
            base: "https://api.coinbase.com".to_string(),
        }
    }
}

impl Default for Coinbase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceSource for Coinbase {
    fn name(&self) -> &'static str {
        "coinbase"
    }

    async fn spot(&self, symbol: &str) -> Result<Option<f64>, Error> {
        #[derive(Deserialize)]
        struct Response {
            data: Data,
        }
        #[derive(Deserialize)]
        struct Data {
            amount: String,
        }
        let url = format!("{}/v2/prices/{symbol}-USD/spot", self.base);
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let parsed: Response = response.error_for_status()?.json().await?;
        parse_price(&parsed.data.amount, self.name()).map(Some)
    }
}

pub struct Kraken {
    client: reqwest::Client,
    base: String,
}

impl Kraken {
    pub fn new() -> Self {
        Self {
            client: http_client(),
            base: "https://api.kraken.com".to_string(),
        }
    }
}

impl Default for Kraken {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceSource for Kraken {
    fn name(&self) -> &'static str {
        "kraken"
    }

    async fn spot(&self, symbol: &str) -> Result<Option<f64>, Error> {
        #[derive(Deserialize)]
        struct Response {
            #[serde(default)]
            error: Vec<String>,
            #[serde(default)]
            result: HashMap<String, Ticker>,
        }
        #[derive(Deserialize)]
        struct Ticker {
            /// Last trade closed: [price, lot volume].
            c: Vec<String>,
        }
        let url = format!("{}/0/public/Ticker?pair={symbol}USD", self.base);
        let parsed: Response = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if parsed.error.iter().any(|e| e.contains("Unknown asset pair")) {
            return Ok(None);
        }
        if !parsed.error.is_empty() {
            return Err(Error::Malformed(format!("kraken: {:?}", parsed.error)));
        }
        match parsed.result.into_values().next().and_then(|t| t.c.into_iter().next()) {
            Some(raw) => parse_price(&raw, self.name()).map(Some),
            None => Ok(None),
        }
    }
}

pub struct Okx {
    client: reqwest::Client,
    base: String,
}

impl Okx {
    pub fn new() -> Self {
        Self {
            client: http_client(),
            base: "https://www.okx.com".to_string(),
        }
    }
}

impl Default for Okx {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceSource for Okx {
    fn name(&self) -> &'static str {
        "okx"
    }

    async fn spot(&self, symbol: &str) -> Result<Option<f64>, Error> {
        #[derive(Deserialize)]
        struct Response {
            #[serde(default)]
            data: Vec<Ticker>,
        }
        #[derive(Deserialize)]
        struct Ticker {
            last: String,
        }
        let url = format!("{}/api/v5/market/ticker?instId={symbol}-USDT", self.base);
        let parsed: Response = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        match parsed.data.first() {
            Some(ticker) => parse_price(&ticker.last, self.name()).map(Some),
            None => Ok(None),
        }
    }
}

pub struct CoinGecko {
    client: reqwest::Client,
    base: String,
}

impl CoinGecko {
    pub fn new() -> Self {
        Self {
            client: http_client(),
            base: "https://api.coingecko.com".to_string(),
        }
    }

    /// The aggregator keys by platform id, not ticker.
    fn platform_id(symbol: &str) -> Option<&'static str> {
        Some(match symbol {
            "ETH" => "ethereum",
            "BNB" => "binancecoin",
            "POL" => "polygon-ecosystem-token",
            "AVAX" => "avalanche-2",
            "XDAI" => "xdai",
            "USDT" => "tether",
            "USDC" => "usd-coin",
            "DAI" => "dai",
            "WBTC" => "wrapped-bitcoin",
            "WETH" => "weth",
            _ => return None,
        })
    }
}

impl Default for CoinGecko {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceSource for CoinGecko {
    fn name(&self) -> &'static str {
        "coingecko"
    }

    async fn spot(&self, symbol: &str) -> Result<Option<f64>, Error> {
        let Some(id) = Self::platform_id(symbol) else {
            return Ok(None);
        };
        let url = format!(
            "{}/api/v3/simple/price?ids={id}&vs_currencies=usd",
            self.base
        );
        let parsed: HashMap<String, HashMap<String, f64>> = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(parsed.get(id).and_then(|entry| entry.get("usd")).copied())
    }
}

/// The default source stack in priority order.
pub fn default_sources() -> Vec<(u32, Box<dyn PriceSource>)> {
    vec![
        (1, Box::new(Binance::new()) as Box<dyn PriceSource>),
        (2, Box::new(Coinbase::new())),
        (3, Box::new(Kraken::new())),
        (4, Box::new(Okx::new())),
        (5, Box::new(CoinGecko::new())),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coingecko_maps_only_known_symbols() {
        assert_eq!(CoinGecko::platform_id("ETH"), Some("ethereum"));
        assert_eq!(CoinGecko::platform_id("NOPE"), None);
    }

    #[test]
    fn default_stack_has_five_sources_in_order() {
        let sources = default_sources();
        assert_eq!(sources.len(), 5);
        let priorities: Vec<u32> = sources.iter().map(|(p, _)| *p).collect();
        assert_eq!(priorities, vec![1, 2, 3, 4, 5]);
        assert_eq!(sources[0].1.name(), "binance");
    }

    #[test]
    fn parse_price_rejects_garbage() {
        assert!(parse_price("2500.5", "test").is_ok());
        assert!(parse_price("not a number", "test").is_err());
    }
}
