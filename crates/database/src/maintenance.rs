//! Index-lifecycle helpers for the operational maintenance tool. These
//! take table locks and are never called from within a job.

use sqlx::{Executor, PgConnection};

pub async fn reindex(ex: &mut PgConnection, index: &str) -> Result<(), sqlx::Error> {
    ex.execute(format!("REINDEX INDEX CONCURRENTLY {index};").as_str())
        .await?;
    Ok(())
}

/// Leaves headroom in heap pages so the HOT update path can keep the
/// frequently rewritten address rows on their original page.
pub async fn set_fillfactor(
    ex: &mut PgConnection,
    table: &str,
    percent: u8,
) -> Result<(), sqlx::Error> {
    ex.execute(format!("ALTER TABLE {table} SET (FILLFACTOR = {percent});").as_str())
        .await?;
    Ok(())
}

pub async fn vacuum_analyze(ex: &mut PgConnection, table: &str) -> Result<(), sqlx::Error> {
    ex.execute(format!("VACUUM ANALYZE {table};").as_str()).await?;
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
    async fn postgres_maintenance_statements() {
        // VACUUM and REINDEX CONCURRENTLY cannot run inside a
        // transaction, so this test uses a bare connection and real
        // committed DDL.
        let mut con = PgConnection::connect("postgresql://").await.unwrap();
        let mut tx = con.begin().await.unwrap();
        crate::schema::ensure(&mut tx).await.unwrap();
        tx.commit().await.unwrap();

        set_fillfactor(&mut con, "addresses", 85).await.unwrap();
        vacuum_analyze(&mut con, "addresses").await.unwrap();
        reindex(&mut con, "addresses_network_fund").await.unwrap();
    }
}
