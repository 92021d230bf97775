//! The `symbol_prices` table: canonical native-token prices indexed by
//! ticker. Shared across all chain processes, so writers must hold the
//! price advisory lock (see [`crate::advisory_lock`]).

use sqlx::PgConnection;

#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct SymbolPrice {
    pub symbol: String,
    pub price_usd: f64,
    pub decimals: Option<i32>,
    pub name: Option<String>,
    pub last_updated: i64,
}

pub async fn upsert_all(
    ex: &mut PgConnection,
    prices: &[SymbolPrice],
) -> Result<(), sqlx::Error> {
    const QUERY: &str = "\
        INSERT INTO symbol_prices (symbol, price_usd, decimals, name, last_updated) \
        SELECT * FROM UNNEST($1::text[], $2::double precision[], $3::int[], $4::text[], $5::bigint[]) \
        ON CONFLICT (symbol) DO UPDATE SET \
            price_usd = EXCLUDED.price_usd, \
            decimals = COALESCE(EXCLUDED.decimals, symbol_prices.decimals), \
            name = COALESCE(EXCLUDED.name, symbol_prices.name), \
            last_updated = EXCLUDED.last_updated;";
    let symbols: Vec<&str> = prices.iter().map(|p| p.symbol.as_str()).collect();
    let values: Vec<f64> = prices.iter().map(|p| p.price_usd).collect();
    let decimals: Vec<Option<i32>> = prices.iter().map(|p| p.decimals).collect();
    let names: Vec<Option<&str>> = prices.iter().map(|p| p.name.as_deref()).collect();
    let updated: Vec<i64> = prices.iter().map(|p| p.last_updated).collect();
    sqlx::query(QUERY)
        .bind(&symbols)
        .bind(&values)
        .bind(&decimals)
        .bind(&names)
        .bind(&updated)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn get(
    ex: &mut PgConnection,
    symbol: &str,
) -> Result<Option<SymbolPrice>, sqlx::Error> {
    const QUERY: &str = "\
        SELECT symbol, price_usd, decimals, name, last_updated \
        FROM symbol_prices WHERE symbol = $1;";
    sqlx::query_as(QUERY).bind(symbol).fetch_optional(ex).await
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
    async fn postgres_symbol_price_round_trip() {
        let mut con = PgConnection::connect("postgresql://").await.unwrap();
        let mut tx = con.begin().await.unwrap();
        schema::ensure(&mut tx).await.unwrap();
        crate::clear_DANGER_(&mut tx).await.unwrap();

        let price = SymbolPrice {
            symbol: "ETH".to_string(),
            price_usd: 2500.0,
            decimals: Some(18),
            name: Some("Ether".to_string()),
            last_updated: 1,
        };
        upsert_all(&mut tx, std::slice::from_ref(&price)).await.unwrap();
        assert_eq!(get(&mut tx, "ETH").await.unwrap(), Some(price.clone()));

        // A later update without metadata keeps the stored metadata.
        let newer = SymbolPrice {
            price_usd: 2600.0,
            decimals: None,
            name: None,
            last_updated: 2,
            ..price
        };
        upsert_all(&mut tx, &[newer]).await.unwrap();
        let stored = get(&mut tx, "ETH").await.unwrap().unwrap();
        assert_eq!(stored.price_usd, 2600.0);
        assert_eq!(stored.decimals, Some(18));
        assert_eq!(stored.name.as_deref(), Some("Ether"));
    }
}
