//! Session-level advisory locks. The price oracle takes
//! [`SYMBOL_PRICES_LOCK`] around `symbol_prices` writes so concurrent
//! per-chain fund updaters serialize on the one table they share.

use sqlx::PgConnection;

/// Lock key for the `symbol_prices` table ("PRIC").
pub const SYMBOL_PRICES_LOCK: i64 = 0x5052_4943;

/// Blocks until the lock is acquired. The lock is tied to the
/// connection's session; keep using the same connection until
/// [`release`].
pub async fn acquire(ex: &mut PgConnection, key: i64) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_lock($1);")
        .bind(key)
        .execute(ex)
        .await?;
    Ok(())
}

/// Returns whether a lock was actually held.
pub async fn release(ex: &mut PgConnection, key: i64) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT pg_advisory_unlock($1);")
        .bind(key)
        .fetch_one(ex)
        .await
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        sqlx::{Connection, PgConnection},
    };

    #[tokio::test]
    #[ignore]
    async fn postgres_advisory_lock_round_trip() {
        let mut con = PgConnection::connect("postgresql://").await.unwrap();
        acquire(&mut con, SYMBOL_PRICES_LOCK).await.unwrap();
        assert!(release(&mut con, SYMBOL_PRICES_LOCK).await.unwrap());
        // Releasing again reports that no lock was held.
        assert!(!release(&mut con, SYMBOL_PRICES_LOCK).await.unwrap());
    }
}
