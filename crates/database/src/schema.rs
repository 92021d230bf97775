//! Idempotent schema bootstrap. Every job except the revalidator runs
//! this on startup; the revalidator skips it to avoid DDL lock contention
//! with active writers.

use {crate::PgTransaction, sqlx::Executor};

const CREATE_ADDRESSES: &str = "\
    CREATE TABLE IF NOT EXISTS addresses (\
        address TEXT NOT NULL,\
        network TEXT NOT NULL,\
        code_hash TEXT,\
        contract_name TEXT,\
        deployed BIGINT,\
        first_seen BIGINT NOT NULL,\
        last_updated BIGINT NOT NULL,\
        tags TEXT[],\
        fund BIGINT,\
        last_fund_updated BIGINT,\
        name_checked BOOLEAN,\
        name_checked_at BIGINT,\
        PRIMARY KEY (address, network)\
    );";

const CREATE_TOKENS: &str = "\
    CREATE TABLE IF NOT EXISTS tokens (\
        token_address TEXT NOT NULL,\
        network TEXT NOT NULL,\
        name TEXT,\
        symbol TEXT NOT NULL,\
        decimals INT NOT NULL,\
        price DOUBLE PRECISION,\
        price_updated BIGINT NOT NULL DEFAULT 0,\
        is_valid BOOLEAN NOT NULL DEFAULT TRUE,\
        PRIMARY KEY (token_address, network)\
    );";

const CREATE_TOKEN_METADATA_CACHE: &str = "\
    CREATE TABLE IF NOT EXISTS token_metadata_cache (\
        network TEXT NOT NULL,\
        token_address TEXT NOT NULL,\
        symbol TEXT,\
        name TEXT,\
        decimals INT,\
        logo_url TEXT,\
        last_updated BIGINT NOT NULL,\
        PRIMARY KEY (network, token_address)\
    );";

const CREATE_SYMBOL_PRICES: &str = "\
    CREATE TABLE IF NOT EXISTS symbol_prices (\
        symbol TEXT PRIMARY KEY,\
        price_usd DOUBLE PRECISION NOT NULL,\
        decimals INT,\
        name TEXT,\
        last_updated BIGINT NOT NULL\
    );";

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS addresses_tags_gin ON addresses USING GIN (tags);",
    "CREATE INDEX IF NOT EXISTS addresses_network_fund ON addresses (network, fund DESC);",
    "CREATE INDEX IF NOT EXISTS addresses_network_last_updated ON addresses (network, last_updated);",
    // Contract listing queries never look at rows that are nothing but an
    // EOA, which is the vast majority of the table.
    "CREATE INDEX IF NOT EXISTS addresses_contracts_only ON addresses (network, address) \
     WHERE tags <> '{EOA}'::text[];",
];

pub async fn ensure(ex: &mut PgTransaction<'_>) -> sqlx::Result<()> {
    ex.execute(CREATE_ADDRESSES).await?;
    ex.execute(CREATE_TOKENS).await?;
    ex.execute(CREATE_TOKEN_METADATA_CACHE).await?;
    ex.execute(CREATE_SYMBOL_PRICES).await?;
    for statement in CREATE_INDEXES {
        ex.execute(*statement).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        sqlx::{Connection, PgConnection},
    };

    #[tokio::test]
    #[ignore]
    async fn postgres_schema_is_idempotent() {
        let mut con = PgConnection::connect("postgresql://").await.unwrap();
        let mut con = con.begin().await.unwrap();
        ensure(&mut con).await.unwrap();
        ensure(&mut con).await.unwrap();
    }
}
