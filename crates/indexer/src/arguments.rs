use {
    chain::{Chain, Tier},
    std::{path::PathBuf, str::FromStr, time::Duration},
    url::Url,
};

/// Arguments every job shares: target chain, gateways, database, and
/// the frame's deadline.
#[derive(Clone, Debug, clap::Parser)]
pub struct Shared {
    /// Target chain identifier, e.g. `ethereum` or `polygon`.
    #[clap(long, env = "NETWORK")]
    pub network: Chain,

    /// RPC gateway URLs, primary first.
    #[clap(long, env = "RPC_URLS", use_value_delimiter = true)]
    pub rpc_urls: Vec<Url>,

    /// `auto` probes the gateway, `free` and `premium` pin the tier.
    #[clap(long, env = "RPC_TIER", default_value = "auto")]
    pub rpc_tier: TierArg,

    /// Hard wall-clock deadline for the whole job.
    #[clap(long, env = "TIMEOUT_SECONDS", default_value = "7200")]
    pub timeout_seconds: u64,

    /// Route all RPC through a local proxy. Disables the request-rate
    /// budget since the proxy does its own pacing.
    #[clap(long, env = "USE_PROXY_RPC")]
    pub use_proxy_rpc: bool,

    #[clap(long, env = "PROXY_RPC_URL")]
    pub proxy_rpc_url: Option<Url>,

    /// Url of the Postgres database. By default connects to locally
    /// running postgres, honoring the usual PG* environment variables.
    #[clap(long, env = "DB_URL", default_value = "postgresql://")]
    pub db_url: Url,

    /// Explorer API credential ring.
    #[clap(long, env = "EXPLORER_API_KEYS", use_value_delimiter = true)]
    pub explorer_api_keys: Vec<String>,

    /// Address of the deployed BalanceHelper contract on this chain.
    #[clap(long, env = "BALANCE_HELPER")]
    pub balance_helper: Option<alloy_primitives::Address>,

    /// Directory holding the per-chain token whitelist JSON files.
    #[clap(long, env = "TOKEN_LIST_DIR", default_value = "tokens")]
    pub token_list_dir: PathBuf,

    #[clap(long, env = "LOG_FILTER", default_value = "info")]
    pub log_filter: String,
}

/// `RPC_TIER` accepts `auto` on top of the plain tiers.
#[derive(Clone, Copy, Debug)]
pub enum TierArg {
    Auto,
    Fixed(Tier),
}

impl TierArg {
    pub fn fixed(&self) -> Option<Tier> {
        match self {
            Self::Auto => None,
            Self::Fixed(tier) => Some(*tier),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("expected auto, free or premium, got {0:?}")]
pub struct InvalidTier(String);

impl FromStr for TierArg {
    type Err = InvalidTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "auto" {
            return Ok(Self::Auto);
        }
        s.parse()
            .map(Self::Fixed)
            .map_err(|_| InvalidTier(s.to_string()))
    }
}

#[derive(Debug, clap::Parser)]
pub struct ScannerArguments {
    #[clap(flatten)]
    pub shared: Shared,

    /// How far back the scan window starts, counted from now.
    #[clap(
        long,
        env = "TIME_DELAY",
        default_value = "2h",
        value_parser = humantime::parse_duration,
    )]
    pub time_delay: Duration,

    /// In-flight batch processing tasks the streaming loop keeps.
    #[clap(long, env = "MAX_CONCURRENT", default_value = "4")]
    pub max_concurrent: usize,

    /// Retries before a single stubborn block is permanently excluded.
    #[clap(long, env = "EXCLUDE_AFTER_RETRIES", default_value = "3")]
    pub exclude_after_retries: u32,
}

impl ScannerArguments {
    pub fn scanner_config(&self) -> crate::scanner::ScannerConfig {
        crate::scanner::ScannerConfig {
            time_delay: self.time_delay,
            max_concurrent: self.max_concurrent.max(1),
            exclude_after_retries: self.exclude_after_retries,
        }
    }
}

#[derive(Debug, clap::Parser)]
pub struct FundArguments {
    #[clap(flatten)]
    pub shared: Shared,

    /// Ignore staleness and re-price every selected row.
    #[clap(long = "all", env = "ALL_FLAG")]
    pub all: bool,

    /// Only rows already known to hold at least 100k USD.
    #[clap(long = "high-fund", env = "HIGH_FUND_FLAG")]
    pub high_fund: bool,

    /// Rows valued less recently than this many days are stale.
    #[clap(long, env = "FUND_UPDATE_DELAY_DAYS", default_value = "7")]
    pub delay_days: u32,

    /// Hard cap on rows per run.
    #[clap(long, env = "FUND_UPDATE_MAX_BATCH", default_value = "50000")]
    pub max_batch: i64,

    /// Refresh token prices even if they look fresh.
    #[clap(long, env = "FORCE_PRICE_UPDATE")]
    pub force_price_update: bool,

    /// Token prices older than this many days trigger a bulk refresh.
    #[clap(long, env = "PRICE_UPDATE_INTERVAL_DAYS", default_value = "7")]
    pub price_interval_days: u32,
}

impl FundArguments {
    pub fn fund_config(&self) -> crate::fund::FundConfig {
        crate::fund::FundConfig {
            all: self.all,
            high_fund: self.high_fund,
            stale_after: Duration::from_secs(u64::from(self.delay_days) * 24 * 60 * 60),
            max_batch: self.max_batch,
            force_price_update: self.force_price_update,
            price_stale_after: Duration::from_secs(
                u64::from(self.price_interval_days) * 24 * 60 * 60,
            ),
        }
    }
}

#[derive(Debug, clap::Parser)]
pub struct RevalidateArguments {
    #[clap(flatten)]
    pub shared: Shared,

    /// Restrict the pass to rows first seen recently.
    #[clap(long, env = "RECENT_CONTRACTS")]
    pub recent_contracts: bool,

    /// Window for `--recent-contracts`, in days.
    #[clap(long, env = "RECENT_DAYS", default_value = "30")]
    pub recent_days: u32,

    /// Hard cap on rows per run.
    #[clap(long, env = "REVALIDATE_MAX_BATCH", default_value = "100000")]
    pub max_batch: i64,

    /// Rows re-classified per processing round.
    #[clap(long, env = "REVALIDATE_CHUNK", default_value = "1000")]
    pub chunk_size: usize,
}

impl RevalidateArguments {
    pub fn revalidate_config(&self) -> crate::revalidate::RevalidateConfig {
        crate::revalidate::RevalidateConfig {
            recent_window: self
                .recent_contracts
                .then(|| Duration::from_secs(u64::from(self.recent_days) * 24 * 60 * 60)),
            max_batch: self.max_batch,
            chunk_size: self.chunk_size.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, clap::Parser};

    #[test]
    fn scanner_defaults() {
        let args = ScannerArguments::parse_from([
            "unified-scanner",
            "--network",
            "ethereum",
            "--rpc-urls",
            "http://localhost:8545",
        ]);
        assert_eq!(args.shared.network, Chain::Mainnet);
        assert_eq!(args.time_delay, Duration::from_secs(2 * 60 * 60));
        assert_eq!(args.max_concurrent, 4);
        assert_eq!(args.shared.timeout_seconds, 7200);
        assert!(args.shared.rpc_tier.fixed().is_none());
    }

    #[test]
    fn tier_argument_parses_all_modes() {
        assert!(matches!("auto".parse::<TierArg>().unwrap(), TierArg::Auto));
        assert_eq!(
            "premium".parse::<TierArg>().unwrap().fixed(),
            Some(Tier::Premium)
        );
        assert!("turbo".parse::<TierArg>().is_err());
    }

    #[test]
    fn fund_flags() {
        let args = FundArguments::parse_from([
            "fund-updater",
            "--network",
            "polygon",
            "--rpc-urls",
            "http://localhost:8545",
            "--all",
            "--max-batch",
            "100",
        ]);
        let config = args.fund_config();
        assert!(config.all);
        assert!(!config.high_fund);
        assert_eq!(config.max_batch, 100);
        assert_eq!(config.stale_after, Duration::from_secs(7 * 24 * 60 * 60));
    }

    #[test]
    fn revalidate_recent_window() {
        let args = RevalidateArguments::parse_from([
            "data-revalidator",
            "--network",
            "ethereum",
            "--rpc-urls",
            "http://localhost:8545",
            "--recent-contracts",
            "--recent-days",
            "7",
        ]);
        let config = args.revalidate_config();
        assert_eq!(config.recent_window, Some(Duration::from_secs(7 * 24 * 60 * 60)));
    }
}
