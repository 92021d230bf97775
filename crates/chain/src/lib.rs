use {
    serde::{de, Deserialize, Deserializer},
    std::{str::FromStr, time::Duration},
    thiserror::Error,
};

pub mod profile;

pub use profile::{Activity, ScanProfile};

/// Represents each chain the indexer can scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum Chain {
    Mainnet = 1,
    Optimism = 10,
    Bsc = 56,
    Gnosis = 100,
    Polygon = 137,
    Base = 8453,
    ArbitrumOne = 42161,
    Avalanche = 43114,
}

/// Service tier of an RPC gateway. Governs how wide a single
/// `eth_getLogs` request may span.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Tier {
    #[default]
    Free,
    Premium,
}

impl Chain {
    /// Returns the chain's chain ID.
    pub fn id(&self) -> u64 {
        *self as u64
    }

    /// Returns the short identifier stored in the `network` column of
    /// every persisted row.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mainnet => "ethereum",
            Self::Optimism => "optimism",
            Self::Bsc => "binance",
            Self::Gnosis => "gnosis",
            Self::Polygon => "polygon",
            Self::Base => "base",
            Self::ArbitrumOne => "arbitrum",
            Self::Avalanche => "avalanche",
        }
    }

    /// Ticker of the chain's native token, as used by the price sources
    /// and the `symbol_prices` table.
    pub fn native_symbol(&self) -> &'static str {
        match self {
            Self::Mainnet | Self::Optimism | Self::ArbitrumOne | Self::Base => "ETH",
            Self::Bsc => "BNB",
            Self::Gnosis => "XDAI",
            Self::Polygon => "POL",
            Self::Avalanche => "AVAX",
        }
    }

    /// Unix timestamp of the chain's genesis block. Contracts created in
    /// genesis carry this as their deployment time.
    pub fn genesis_timestamp(&self) -> i64 {
        match self {
            Self::Mainnet => 1_438_269_973,
            Self::Optimism => 1_636_665_399,
            Self::Bsc => 1_598_671_449,
            Self::Gnosis => 1_539_024_185,
            Self::Polygon => 1_590_824_836,
            Self::Base => 1_686_789_347,
            Self::ArbitrumOne => 1_622_243_344,
            Self::Avalanche => 1_600_961_379,
        }
    }

    /// Returns the average block time.
    pub fn block_time(&self) -> Duration {
        match self {
            Self::Mainnet => Duration::from_millis(12_000),
            Self::Optimism => Duration::from_millis(2_000),
            Self::Bsc => Duration::from_millis(3_000),
            Self::Gnosis => Duration::from_millis(5_000),
            Self::Polygon => Duration::from_millis(2_000),
            Self::Base => Duration::from_millis(2_000),
            Self::ArbitrumOne => Duration::from_millis(250),
            Self::Avalanche => Duration::from_millis(2_000),
        }
    }

    /// Returns the number of blocks produced in the given wall-clock span.
    pub fn blocks_in(&self, span: Duration) -> u64 {
        (span.as_millis() / self.block_time().as_millis()).try_into().unwrap_or(u64::MAX)
    }

    /// The widest block span a single `eth_getLogs` request may cover on
    /// this chain for the given gateway tier. Chains without an entry get
    /// a conservative default.
    pub fn log_span_cap(&self, tier: Tier) -> u64 {
        match (self, tier) {
            (Self::Mainnet, Tier::Free) => 800,
            (Self::Mainnet, Tier::Premium) => 5_000,
            (Self::Bsc, Tier::Free) => 500,
            (Self::Bsc, Tier::Premium) => 5_000,
            (Self::Polygon, Tier::Free) => 1_000,
            (Self::Polygon, Tier::Premium) => 10_000,
            (Self::ArbitrumOne, Tier::Free) => 2_000,
            (Self::ArbitrumOne, Tier::Premium) => 20_000,
            (Self::Optimism | Self::Base, Tier::Free) => 1_000,
            (Self::Optimism | Self::Base, Tier::Premium) => 10_000,
            // No measured table entry for the remaining chains.
            (_, Tier::Free | Tier::Premium) => DEFAULT_LOG_SPAN_CAP,
        }
    }

    /// How busy the chain's ERC-20 transfer traffic is, which picks the
    /// scan profile.
    pub fn activity(&self) -> Activity {
        match self {
            Self::Mainnet | Self::Bsc | Self::Polygon | Self::Base => Activity::High,
            Self::ArbitrumOne | Self::Optimism | Self::Avalanche => Activity::Medium,
            Self::Gnosis => Activity::Low,
        }
    }

    /// The block explorer surface for this chain.
    pub fn explorer(&self) -> Explorer {
        match self {
            // Served by the unified multi-chain endpoint, selected via
            // the `chainid` query parameter.
            Self::Mainnet
            | Self::Optimism
            | Self::Polygon
            | Self::Base
            | Self::ArbitrumOne => Explorer::Unified {
                base: "https://api.etherscan.io/v2/api",
                chain_id: self.id(),
            },
            Self::Bsc => Explorer::Dedicated {
                base: "https://api.bscscan.com/api",
            },
            Self::Gnosis => Explorer::Dedicated {
                base: "https://api.gnosisscan.io/api",
            },
            Self::Avalanche => Explorer::Dedicated {
                base: "https://api.snowscan.xyz/api",
            },
        }
    }

    pub fn variants() -> &'static [Chain] {
        &[
            Self::Mainnet,
            Self::Optimism,
            Self::Bsc,
            Self::Gnosis,
            Self::Polygon,
            Self::Base,
            Self::ArbitrumOne,
            Self::Avalanche,
        ]
    }
}

/// Span used for chains that have no measured `eth_getLogs` cap.
pub const DEFAULT_LOG_SPAN_CAP: u64 = 10;

/// Which dialect of block-explorer REST API serves a chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Explorer {
    /// One host serving many chains, selected by `chainid` parameter.
    Unified { base: &'static str, chain_id: u64 },
    /// A host dedicated to a single chain.
    Dedicated { base: &'static str },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("chain id not supported")]
    ChainIdNotSupported,
    #[error("unknown network name: {0}")]
    UnknownNetwork(String),
}

impl TryFrom<u64> for Chain {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        let chain = match value {
            x if x == Self::Mainnet as u64 => Self::Mainnet,
            x if x == Self::Optimism as u64 => Self::Optimism,
            x if x == Self::Bsc as u64 => Self::Bsc,
            x if x == Self::Gnosis as u64 => Self::Gnosis,
            x if x == Self::Polygon as u64 => Self::Polygon,
            x if x == Self::Base as u64 => Self::Base,
            x if x == Self::ArbitrumOne as u64 => Self::ArbitrumOne,
            x if x == Self::Avalanche as u64 => Self::Avalanche,
            _ => Err(Error::ChainIdNotSupported)?,
        };
        Ok(chain)
    }
}

impl FromStr for Chain {
    type Err = Error;

    /// Parses the short network identifier, e.g. from the `NETWORK`
    /// environment variable.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::variants()
            .iter()
            .copied()
            .find(|chain| chain.name() == s)
            .ok_or_else(|| Error::UnknownNetwork(s.to_string()))
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "premium" => Ok(Self::Premium),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Free => "free",
            Self::Premium => "premium",
        })
    }
}

impl<'de> Deserialize<'de> for Chain {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ChainVisitor;

        impl de::Visitor<'_> for ChainVisitor {
            type Value = Chain;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a chain id or a network name")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Chain::try_from(value).map_err(E::custom)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                value.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(ChainVisitor)
    }
}
