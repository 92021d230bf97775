//! The `token_metadata_cache` table: explorer-sourced token shape
//! (symbol, name, decimals, logo) cached for 30 days so repeated runs do
//! not re-query the explorer for the same token.

use {crate::unix_now, sqlx::PgConnection};

/// Entries older than this are treated as absent.
pub const TTL_SECS: i64 = 30 * 24 * 60 * 60;

#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct TokenMetadata {
    pub token_address: String,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub decimals: Option<i32>,
    pub logo_url: Option<String>,
    pub last_updated: i64,
}

pub async fn get(
    ex: &mut PgConnection,
    network: &str,
    token_address: &str,
) -> Result<Option<TokenMetadata>, sqlx::Error> {
    const QUERY: &str = "\
        SELECT token_address, symbol, name, decimals, logo_url, last_updated \
        FROM token_metadata_cache \
        WHERE network = $1 AND token_address = $2 AND last_updated > $3;";
    sqlx::query_as(QUERY)
        .bind(network)
        .bind(token_address)
        .bind(unix_now() - TTL_SECS)
        .fetch_optional(ex)
        .await
}

pub async fn upsert(
    ex: &mut PgConnection,
    network: &str,
    metadata: &TokenMetadata,
) -> Result<(), sqlx::Error> {
    const QUERY: &str = "\
        INSERT INTO token_metadata_cache \
            (network, token_address, symbol, name, decimals, logo_url, last_updated) \
        VALUES ($1, $2, $3, $4, $5, $6, $7) \
        ON CONFLICT (network, token_address) DO UPDATE SET \
            symbol = EXCLUDED.symbol, \
            name = EXCLUDED.name, \
            decimals = EXCLUDED.decimals, \
            logo_url = EXCLUDED.logo_url, \
            last_updated = EXCLUDED.last_updated;";
    sqlx::query(QUERY)
        .bind(network)
        .bind(&metadata.token_address)
        .bind(&metadata.symbol)
        .bind(&metadata.name)
        .bind(metadata.decimals)
        .bind(&metadata.logo_url)
        .bind(metadata.last_updated)
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
    async fn postgres_metadata_ttl() {
        let mut con = PgConnection::connect("postgresql://").await.unwrap();
        let mut tx = con.begin().await.unwrap();
        schema::ensure(&mut tx).await.unwrap();
        crate::clear_DANGER_(&mut tx).await.unwrap();

        let fresh = TokenMetadata {
            token_address: "0xdac17f958d2ee523a2206206994597c13d831ec7".to_string(),
            symbol: Some("USDT".to_string()),
            name: Some("Tether USD".to_string()),
            decimals: Some(6),
            logo_url: None,
            last_updated: unix_now(),
        };
        upsert(&mut tx, "ethereum", &fresh).await.unwrap();
        assert!(get(&mut tx, "ethereum", &fresh.token_address)
            .await
            .unwrap()
            .is_some());

        // An entry past the TTL is invisible.
        let stale = TokenMetadata {
            last_updated: unix_now() - TTL_SECS - 1,
            ..fresh.clone()
        };
        upsert(&mut tx, "ethereum", &stale).await.unwrap();
        assert!(get(&mut tx, "ethereum", &fresh.token_address)
            .await
            .unwrap()
            .is_none());
    }
}
