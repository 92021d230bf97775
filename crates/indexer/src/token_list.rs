//! Static per-chain ERC-20 whitelists, shipped as `tokens/<chain>.json`
//! files: a rank-ordered array of token descriptors. Loaded into the
//! `tokens` table at job start.

use {
    crate::domain::normalize,
    anyhow::{Context, Result},
    chain::Chain,
    serde::Deserialize,
    std::path::Path,
};

#[derive(Clone, Debug, Deserialize)]
pub struct WhitelistToken {
    pub rank: u32,
    pub name: String,
    pub symbol: String,
    pub address: String,
    pub decimals: u8,
}

/// Reads and normalizes the whitelist for a chain. A missing file is an
/// empty whitelist, not an error: new chains start without one.
pub fn load(dir: &Path, chain: Chain) -> Result<Vec<WhitelistToken>> {
    let path = dir.join(format!("{}.json", chain.name()));
    if !path.exists() {
        tracing::warn!(path = %path.display(), "no token whitelist for chain");
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("read {}", path.display()))?;
    parse(&raw).with_context(|| format!("parse {}", path.display()))
}

fn parse(raw: &str) -> Result<Vec<WhitelistToken>> {
    let mut tokens: Vec<WhitelistToken> = serde_json::from_str(raw)?;
    for token in &mut tokens {
        token.address = normalize(&token.address)
            .with_context(|| format!("whitelist address {:?}", token.address))?;
    }
    tokens.sort_by_key(|token| token.rank);
    Ok(tokens)
}

pub fn to_db_tokens(tokens: &[WhitelistToken]) -> Vec<database::tokens::Token> {
    tokens
        .iter()
        .map(|token| database::tokens::Token {
            token_address: token.address.clone(),
            name: Some(token.name.clone()),
            symbol: token.symbol.clone(),
            decimals: i32::from(token.decimals),
            price: None,
            price_updated: 0,
            is_valid: true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes() {
        let raw = r#"[
            {"rank": 2, "name": "USD Coin", "symbol": "USDC",
             "address": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", "decimals": 6},
            {"rank": 1, "name": "Tether USD", "symbol": "USDT",
             "address": "0xdAC17F958D2ee523a2206206994597C13D831ec7", "decimals": 6}
        ]"#;
        let tokens = parse(raw).unwrap();
        assert_eq!(tokens.len(), 2);
        // Rank ordering, not file ordering.
        assert_eq!(tokens[0].symbol, "USDT");
        assert_eq!(
            tokens[0].address,
            "0xdac17f958d2ee523a2206206994597c13d831ec7"
        );
    }

    #[test]
    fn rejects_malformed_addresses() {
        let raw = r#"[{"rank": 1, "name": "Bad", "symbol": "BAD",
                       "address": "not-an-address", "decimals": 18}]"#;
        assert!(parse(raw).is_err());
    }

    #[test]
    fn missing_file_is_empty_whitelist() {
        let tokens = load(Path::new("/nonexistent"), Chain::Mainnet).unwrap();
        assert!(tokens.is_empty());
    }
}
