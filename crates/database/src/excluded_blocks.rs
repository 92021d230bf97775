//! The `excluded_blocks` table: blocks permanently removed from
//! scanning after exhausting the full retry budget. Append only. The
//! table is created lazily because most deployments never poison a
//! block.

use {
    crate::unix_now,
    sqlx::{Executor, PgConnection},
    std::collections::HashSet,
};

const CREATE: &str = "\
    CREATE TABLE IF NOT EXISTS excluded_blocks (\
        network TEXT NOT NULL,\
        block_number BIGINT NOT NULL,\
        reason TEXT NOT NULL,\
        excluded_at BIGINT NOT NULL,\
        PRIMARY KEY (network, block_number)\
    );";

pub async fn ensure(ex: &mut PgConnection) -> Result<(), sqlx::Error> {
    ex.execute(CREATE).await?;
    Ok(())
}

/// Hydrates the in-memory skip set at job start.
pub async fn load_set(
    ex: &mut PgConnection,
    network: &str,
) -> Result<HashSet<i64>, sqlx::Error> {
    ensure(ex).await?;
    const QUERY: &str = "SELECT block_number FROM excluded_blocks WHERE network = $1;";
    let blocks: Vec<i64> = sqlx::query_scalar(QUERY).bind(network).fetch_all(ex).await?;
    Ok(blocks.into_iter().collect())
}

pub async fn insert(
    ex: &mut PgConnection,
    network: &str,
    block_number: i64,
    reason: &str,
) -> Result<(), sqlx::Error> {
    ensure(ex).await?;
    const QUERY: &str = "\
        INSERT INTO excluded_blocks (network, block_number, reason, excluded_at) \
        VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING;";
    sqlx::query(QUERY)
        .bind(network)
        .bind(block_number)
        .bind(reason)
        .bind(unix_now())
        .execute(ex)
        .await?;
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
    async fn postgres_excluded_blocks() {
        let mut con = PgConnection::connect("postgresql://").await.unwrap();
        let mut tx = con.begin().await.unwrap();
        ensure(&mut tx).await.unwrap();
        crate::clear_DANGER_(&mut tx).await.unwrap();

        insert(&mut tx, "ethereum", 123, "getLogs timeout after 3 retries")
            .await
            .unwrap();
        // Repeat insert is a no-op.
        insert(&mut tx, "ethereum", 123, "other reason").await.unwrap();

        let set = load_set(&mut tx, "ethereum").await.unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains(&123));
        assert!(load_set(&mut tx, "polygon").await.unwrap().is_empty());
    }
}
