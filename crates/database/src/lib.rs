pub mod addresses;
pub mod advisory_lock;
pub mod excluded_blocks;
pub mod maintenance;
pub mod schema;
pub mod symbol_prices;
pub mod token_metadata_cache;
pub mod tokens;

use sqlx::{Executor, PgPool};

// Design:
//
// Functions that execute multiple statements take `&mut PgTransaction` to
// indicate this and to ensure that the whole function succeeds or fails
// together. Functions that execute a single statement take `&mut
// PgConnection`. We usually call the parameter `ex` for `Executor` which is
// the trait whose methods we use to run queries. This scheme allows callers
// to decide whether they want to use the function as part of a bigger
// transaction or standalone. Note that PgTransaction implements Deref to
// PgConnection. Callers do need to take care of calling `commit` on the
// transaction.
//
// For tests a useful pattern is to start a transaction at the beginning of
// the test, use it for all queries and never commit it. When the
// uncommitted transaction gets dropped it is rolled back, which allows
// postgres tests to run in parallel.

pub type PgTransaction<'a> = sqlx::Transaction<'a, sqlx::Postgres>;

/// The names of all tables we use in the db.
pub const ALL_TABLES: &[&str] = &[
    "addresses",
    "tokens",
    "token_metadata_cache",
    "symbol_prices",
    "excluded_blocks",
];

/// Current wall-clock time as Unix seconds, the timestamp representation
/// used by every table in the schema.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Delete all data in the database. Only used by tests.
#[allow(non_snake_case)]
pub async fn clear_DANGER_(ex: &mut PgTransaction<'_>) -> sqlx::Result<()> {
    for table in ALL_TABLES {
        ex.execute(format!("TRUNCATE {table};").as_str()).await?;
    }
    Ok(())
}

/// Like above but more ergonomic for some tests that use a pool.
#[allow(non_snake_case)]
pub async fn clear_DANGER(pool: &PgPool) -> sqlx::Result<()> {
    let mut transaction = pool.begin().await?;
    schema::ensure(&mut transaction).await?;
    excluded_blocks::ensure(&mut transaction).await?;
    clear_DANGER_(&mut transaction).await?;
    transaction.commit().await
}
