//! The `tokens` table: per-chain ERC-20 whitelist doubling as the price
//! cache for token valuation.

use sqlx::{PgConnection, Row};

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Token {
    pub token_address: String,
    pub name: Option<String>,
    pub symbol: String,
    pub decimals: i32,
    pub price: Option<f64>,
    pub price_updated: i64,
    pub is_valid: bool,
}

/// Loads the static whitelist into the table. Metadata is refreshed,
/// previously discovered prices are kept.
pub async fn bootstrap(
    ex: &mut PgConnection,
    network: &str,
    tokens: &[Token],
) -> Result<(), sqlx::Error> {
    const QUERY: &str = "\
        INSERT INTO tokens (token_address, network, name, symbol, decimals, price_updated) \
        SELECT t.token_address, $1, t.name, t.symbol, t.decimals, 0 \
        FROM UNNEST($2::text[], $3::text[], $4::text[], $5::int[]) \
          AS t(token_address, name, symbol, decimals) \
        ON CONFLICT (token_address, network) DO UPDATE SET \
            name = EXCLUDED.name, \
            symbol = EXCLUDED.symbol, \
            decimals = EXCLUDED.decimals;";
    let addresses: Vec<&str> = tokens.iter().map(|t| t.token_address.as_str()).collect();
    let names: Vec<Option<&str>> = tokens.iter().map(|t| t.name.as_deref()).collect();
    let symbols: Vec<&str> = tokens.iter().map(|t| t.symbol.as_str()).collect();
    let decimals: Vec<i32> = tokens.iter().map(|t| t.decimals).collect();
    sqlx::query(QUERY)
        .bind(network)
        .bind(&addresses)
        .bind(&names)
        .bind(&symbols)
        .bind(&decimals)
        .execute(ex)
        .await?;
    Ok(())
}

/// All valid whitelist entries for a chain, most established first.
pub async fn whitelist(
    ex: &mut PgConnection,
    network: &str,
) -> Result<Vec<Token>, sqlx::Error> {
    const QUERY: &str = "\
        SELECT token_address, name, symbol, decimals, price, price_updated, is_valid \
        FROM tokens WHERE network = $1 AND is_valid ORDER BY token_address;";
    sqlx::query_as(QUERY).bind(network).fetch_all(ex).await
}

/// Timestamp of the freshest price in the table, 0 when no price was
/// ever stored. Decides whether a bulk refresh is due.
pub async fn newest_price_update(
    ex: &mut PgConnection,
    network: &str,
) -> Result<i64, sqlx::Error> {
    const QUERY: &str =
        "SELECT COALESCE(MAX(price_updated), 0) FROM tokens WHERE network = $1;";
    let row = sqlx::query(QUERY).bind(network).fetch_one(ex).await?;
    row.try_get(0)
}

pub async fn update_prices(
    ex: &mut PgConnection,
    network: &str,
    prices: &[(String, f64)],
    updated_at: i64,
) -> Result<(), sqlx::Error> {
    const QUERY: &str = "\
        UPDATE tokens SET price = t.price, price_updated = $4 \
        FROM UNNEST($2::text[], $3::double precision[]) AS t(token_address, price) \
        WHERE tokens.network = $1 AND tokens.token_address = t.token_address;";
    let addresses: Vec<&str> = prices.iter().map(|(a, _)| a.as_str()).collect();
    let values: Vec<f64> = prices.iter().map(|(_, p)| *p).collect();
    sqlx::query(QUERY)
        .bind(network)
        .bind(&addresses)
        .bind(&values)
        .bind(updated_at)
        .execute(ex)
        .await?;
    Ok(())
}

/// Marks a token as unusable for valuation, e.g. after repeated
/// anomalous prices.
pub async fn invalidate(
    ex: &mut PgConnection,
    network: &str,
    token_address: &str,
) -> Result<(), sqlx::Error> {
    const QUERY: &str =
        "UPDATE tokens SET is_valid = FALSE WHERE network = $1 AND token_address = $2;";
    sqlx::query(QUERY)
        .bind(network)
        .bind(token_address)
        .execute(ex)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::schema,
        sqlx::{Connection, PgConnection},
    };

    #[tokio::test]
    #[ignore]
    async fn postgres_bootstrap_keeps_prices() {
        let mut con = PgConnection::connect("postgresql://").await.unwrap();
        let mut tx = con.begin().await.unwrap();
        schema::ensure(&mut tx).await.unwrap();
        crate::clear_DANGER_(&mut tx).await.unwrap();

        let token = Token {
            token_address: "0xdac17f958d2ee523a2206206994597c13d831ec7".to_string(),
            name: Some("Tether USD".to_string()),
            symbol: "USDT".to_string(),
            decimals: 6,
            price: None,
            price_updated: 0,
            is_valid: true,
        };
        bootstrap(&mut tx, "ethereum", std::slice::from_ref(&token))
            .await
            .unwrap();
        update_prices(
            &mut tx,
            "ethereum",
            &[(token.token_address.clone(), 1.0)],
            42,
        )
        .await
        .unwrap();

        // Re-running the bootstrap must not wipe the discovered price.
        bootstrap(&mut tx, "ethereum", &[token]).await.unwrap();
        let stored = whitelist(&mut tx, "ethereum").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].price, Some(1.0));
        assert_eq!(newest_price_update(&mut tx, "ethereum").await.unwrap(), 42);
    }
}
