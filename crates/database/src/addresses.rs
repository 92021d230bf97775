//! The `addresses` table: one row per (address, network) pair.
//!
//! Writers have partial views of a row (the scanner knows classification
//! but not valuation, the fund updater the other way around), so the
//! merge upsert coalesces null incoming fields with stored ones. `tags`
//! is the exception: a tag set is a classification conclusion and always
//! replaces the stored set wholesale.

use {
    crate::{PgTransaction, unix_now},
    sqlx::{PgConnection, Row},
};

/// A full or partial view of an address row. `None` fields never
/// overwrite stored values on upsert.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AddressRow {
    pub address: String,
    pub code_hash: Option<String>,
    pub contract_name: Option<String>,
    pub deployed: Option<i64>,
    pub first_seen: i64,
    pub last_updated: i64,
    pub tags: Vec<String>,
    pub fund: Option<i64>,
    pub last_fund_updated: Option<i64>,
    pub name_checked: Option<bool>,
    pub name_checked_at: Option<i64>,
}

/// What the database already knows about an address. The scanner uses
/// this for self-destruct detection and to skip re-verification.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct StoredIdentity {
    pub address: String,
    pub code_hash: Option<String>,
    pub contract_name: Option<String>,
    pub deployed: Option<i64>,
    pub name_checked: Option<bool>,
}

/// Candidate row for a fund update pass.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct FundCandidate {
    pub address: String,
    pub tags: Option<Vec<String>>,
    pub fund: Option<i64>,
}

/// Row selected for revalidation because its classification is
/// incomplete or inconsistent.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct RevalidationCandidate {
    pub address: String,
    pub code_hash: Option<String>,
    pub deployed: Option<i64>,
    pub tags: Option<Vec<String>>,
}

/// Rows per statement for the merge upsert. Keeps the statement well
/// under the bind-parameter limit while amortizing round trips.
pub const UPSERT_CHUNK: usize = 500;

/// Tags travel to Postgres as a comma-joined string because UNNEST
/// cannot carry an array-of-arrays column.
fn join_tags(tags: &[String]) -> String {
    tags.join(",")
}

const UPSERT_QUERY: &str = "\
    INSERT INTO addresses (address, network, code_hash, contract_name, deployed, \
                           first_seen, last_updated, tags, fund, last_fund_updated, \
                           name_checked, name_checked_at) \
    SELECT t.address, $1, t.code_hash, t.contract_name, t.deployed, \
           t.first_seen, t.last_updated, \
           CASE WHEN t.tags = '' THEN '{}'::text[] ELSE string_to_array(t.tags, ',') END, \
           t.fund, t.last_fund_updated, t.name_checked, t.name_checked_at \
    FROM UNNEST($2::text[], $3::text[], $4::text[], $5::bigint[], $6::bigint[], \
                $7::bigint[], $8::text[], $9::bigint[], $10::bigint[], \
                $11::boolean[], $12::bigint[]) \
      AS t(address, code_hash, contract_name, deployed, first_seen, last_updated, \
           tags, fund, last_fund_updated, name_checked, name_checked_at) \
    ON CONFLICT (address, network) DO UPDATE SET \
        code_hash = COALESCE(EXCLUDED.code_hash, addresses.code_hash), \
        contract_name = COALESCE(EXCLUDED.contract_name, addresses.contract_name), \
        deployed = COALESCE(EXCLUDED.deployed, addresses.deployed), \
        first_seen = LEAST(addresses.first_seen, EXCLUDED.first_seen), \
        last_updated = GREATEST(addresses.last_updated, EXCLUDED.last_updated), \
        tags = EXCLUDED.tags, \
        fund = COALESCE(EXCLUDED.fund, addresses.fund), \
        last_fund_updated = COALESCE(EXCLUDED.last_fund_updated, addresses.last_fund_updated), \
        name_checked = COALESCE(EXCLUDED.name_checked, addresses.name_checked), \
        name_checked_at = COALESCE(EXCLUDED.name_checked_at, addresses.name_checked_at);";

/// Merge-upserts the given rows in chunks of [`UPSERT_CHUNK`].
pub async fn upsert(
    ex: &mut PgTransaction<'_>,
    network: &str,
    rows: &[AddressRow],
) -> Result<(), sqlx::Error> {
    for chunk in rows.chunks(UPSERT_CHUNK) {
        let mut addresses = Vec::with_capacity(chunk.len());
        let mut code_hashes = Vec::with_capacity(chunk.len());
        let mut contract_names = Vec::with_capacity(chunk.len());
        let mut deployed = Vec::with_capacity(chunk.len());
        let mut first_seen = Vec::with_capacity(chunk.len());
        let mut last_updated = Vec::with_capacity(chunk.len());
        let mut tags = Vec::with_capacity(chunk.len());
        let mut funds = Vec::with_capacity(chunk.len());
        let mut fund_updated = Vec::with_capacity(chunk.len());
        let mut name_checked = Vec::with_capacity(chunk.len());
        let mut name_checked_at = Vec::with_capacity(chunk.len());
        for row in chunk {
            addresses.push(row.address.as_str());
            code_hashes.push(row.code_hash.as_deref());
            contract_names.push(row.contract_name.as_deref());
            deployed.push(row.deployed);
            first_seen.push(row.first_seen);
            last_updated.push(row.last_updated);
            tags.push(join_tags(&row.tags));
            funds.push(row.fund);
            fund_updated.push(row.last_fund_updated);
            name_checked.push(row.name_checked);
            name_checked_at.push(row.name_checked_at);
        }
        sqlx::query(UPSERT_QUERY)
            .bind(network)
            .bind(&addresses)
            .bind(&code_hashes)
            .bind(&contract_names)
            .bind(&deployed)
            .bind(&first_seen)
            .bind(&last_updated)
            .bind(&tags)
            .bind(&funds)
            .bind(&fund_updated)
            .bind(&name_checked)
            .bind(&name_checked_at)
            .execute(&mut **ex)
            .await?;
    }
    Ok(())
}

/// Authoritative rewrite of classification fields, used by the
/// revalidator. Unlike [`upsert`] this does not coalesce: the freshly
/// computed values win, including explicit NULLs (an address that turned
/// out to be an EOA loses its stale contract metadata).
pub async fn reclassify(
    ex: &mut PgTransaction<'_>,
    network: &str,
    rows: &[AddressRow],
) -> Result<(), sqlx::Error> {
    const QUERY: &str = "\
        UPDATE addresses SET \
            code_hash = t.code_hash, \
            contract_name = t.contract_name, \
            deployed = t.deployed, \
            tags = CASE WHEN t.tags = '' THEN '{}'::text[] \
                        ELSE string_to_array(t.tags, ',') END, \
            name_checked = t.name_checked, \
            name_checked_at = t.name_checked_at, \
            last_updated = GREATEST(addresses.last_updated, t.last_updated) \
        FROM UNNEST($2::text[], $3::text[], $4::text[], $5::bigint[], $6::text[], \
                    $7::boolean[], $8::bigint[], $9::bigint[]) \
          AS t(address, code_hash, contract_name, deployed, tags, name_checked, \
               name_checked_at, last_updated) \
        WHERE addresses.network = $1 AND addresses.address = t.address;";
    for chunk in rows.chunks(UPSERT_CHUNK) {
        let mut addresses = Vec::with_capacity(chunk.len());
        let mut code_hashes = Vec::with_capacity(chunk.len());
        let mut contract_names = Vec::with_capacity(chunk.len());
        let mut deployed = Vec::with_capacity(chunk.len());
        let mut tags = Vec::with_capacity(chunk.len());
        let mut name_checked = Vec::with_capacity(chunk.len());
        let mut name_checked_at = Vec::with_capacity(chunk.len());
        let mut last_updated = Vec::with_capacity(chunk.len());
        for row in chunk {
            addresses.push(row.address.as_str());
            code_hashes.push(row.code_hash.as_deref());
            contract_names.push(row.contract_name.as_deref());
            deployed.push(row.deployed);
            tags.push(join_tags(&row.tags));
            name_checked.push(row.name_checked.unwrap_or(false));
            name_checked_at.push(row.name_checked_at.unwrap_or(0));
            last_updated.push(row.last_updated);
        }
        sqlx::query(QUERY)
            .bind(network)
            .bind(&addresses)
            .bind(&code_hashes)
            .bind(&contract_names)
            .bind(&deployed)
            .bind(&tags)
            .bind(&name_checked)
            .bind(&name_checked_at)
            .bind(&last_updated)
            .execute(&mut **ex)
            .await?;
    }
    Ok(())
}

/// Returns the subset of `addresses` that already has a classified row
/// (non-empty tags) for this network. The scanner drops these from its
/// pipeline; rows that exist but never got classified flow through
/// classification again.
pub async fn filter_classified(
    ex: &mut PgConnection,
    network: &str,
    addresses: &[String],
) -> Result<Vec<String>, sqlx::Error> {
    const QUERY: &str = "\
        SELECT address FROM addresses \
        WHERE network = $1 AND address = ANY($2) \
          AND tags IS NOT NULL AND tags <> '{}'::text[];";
    sqlx::query_scalar(QUERY)
        .bind(network)
        .bind(addresses)
        .fetch_all(ex)
        .await
}

pub async fn stored_identities(
    ex: &mut PgConnection,
    network: &str,
    addresses: &[String],
) -> Result<Vec<StoredIdentity>, sqlx::Error> {
    const QUERY: &str = "\
        SELECT address, code_hash, contract_name, deployed, name_checked \
        FROM addresses WHERE network = $1 AND address = ANY($2);";
    sqlx::query_as(QUERY)
        .bind(network)
        .bind(addresses)
        .fetch_all(ex)
        .await
}

/// Mode switches for the fund update selection.
#[derive(Clone, Copy, Debug)]
pub struct FundSelection {
    /// Ignore staleness entirely.
    pub all: bool,
    /// Restrict to rows already known to be worth at least
    /// [`HIGH_FUND_THRESHOLD`].
    pub high_fund: bool,
    /// Rows whose valuation is older than this many seconds are stale.
    pub stale_after_secs: i64,
    /// Hard cap on rows per run.
    pub max_batch: i64,
}

pub const HIGH_FUND_THRESHOLD: i64 = 100_000;

/// Picks the rows whose valuation should be refreshed, highest stored
/// fund first, then oldest valuation.
pub async fn outdated_for_fund(
    ex: &mut PgConnection,
    network: &str,
    selection: FundSelection,
) -> Result<Vec<FundCandidate>, sqlx::Error> {
    if selection.high_fund {
        const QUERY: &str = "\
            SELECT address, tags, fund FROM addresses \
            WHERE network = $1 AND COALESCE(fund, 0) >= $2 \
            ORDER BY fund DESC NULLS LAST \
            LIMIT $3;";
        return sqlx::query_as(QUERY)
            .bind(network)
            .bind(HIGH_FUND_THRESHOLD)
            .bind(selection.max_batch)
            .fetch_all(ex)
            .await;
    }
    const QUERY: &str = "\
        SELECT address, tags, fund FROM addresses \
        WHERE network = $1 AND ($2 OR COALESCE(last_fund_updated, 0) < $3) \
        ORDER BY fund DESC NULLS LAST, COALESCE(last_fund_updated, 0) ASC \
        LIMIT $4;";
    let stale_cutoff = unix_now() - selection.stale_after_secs;
    sqlx::query_as(QUERY)
        .bind(network)
        .bind(selection.all)
        .bind(stale_cutoff)
        .bind(selection.max_batch)
        .fetch_all(ex)
        .await
}

/// Writes freshly computed valuations. Touches nothing but the fund
/// columns and the row timestamp.
pub async fn set_funds(
    ex: &mut PgConnection,
    network: &str,
    valuations: &[(String, i64)],
) -> Result<(), sqlx::Error> {
    const QUERY: &str = "\
        UPDATE addresses SET \
            fund = t.fund, \
            last_fund_updated = t.updated_at, \
            last_updated = GREATEST(addresses.last_updated, t.updated_at) \
        FROM UNNEST($2::text[], $3::bigint[], $4::bigint[]) \
          AS t(address, fund, updated_at) \
        WHERE addresses.network = $1 AND addresses.address = t.address;";
    let now = unix_now();
    for chunk in valuations.chunks(UPSERT_CHUNK) {
        let addresses: Vec<&str> = chunk.iter().map(|(a, _)| a.as_str()).collect();
        let funds: Vec<i64> = chunk.iter().map(|(_, f)| *f).collect();
        let updated: Vec<i64> = vec![now; chunk.len()];
        sqlx::query(QUERY)
            .bind(network)
            .bind(&addresses)
            .bind(&funds)
            .bind(&updated)
            .execute(&mut *ex)
            .await?;
    }
    Ok(())
}

/// Fills in deployment timestamps resolved in the background. Never
/// downgrades an already known value.
pub async fn set_deployed(
    ex: &mut PgConnection,
    network: &str,
    deployments: &[(String, i64)],
) -> Result<(), sqlx::Error> {
    const QUERY: &str = "\
        UPDATE addresses SET \
            deployed = COALESCE(addresses.deployed, t.deployed), \
            last_updated = GREATEST(addresses.last_updated, $4) \
        FROM UNNEST($2::text[], $3::bigint[]) AS t(address, deployed) \
        WHERE addresses.network = $1 AND addresses.address = t.address;";
    let now = unix_now();
    for chunk in deployments.chunks(UPSERT_CHUNK) {
        let addresses: Vec<&str> = chunk.iter().map(|(a, _)| a.as_str()).collect();
        let deployed: Vec<i64> = chunk.iter().map(|(_, d)| *d).collect();
        sqlx::query(QUERY)
            .bind(network)
            .bind(&addresses)
            .bind(&deployed)
            .bind(now)
            .execute(&mut *ex)
            .await?;
    }
    Ok(())
}

const REVALIDATION_WHERE: &str = "\
    network = $1 AND (\
        tags IS NULL OR tags = '{}'::text[] \
        OR ('Contract' = ANY(tags) AND code_hash IS NULL) \
        OR ('Contract' = ANY(tags) AND deployed IS NULL) \
        OR 'SelfDestroyed' = ANY(tags)\
    )";

/// Rows whose classification is incomplete or inconsistent, most
/// valuable first. `recent_cutoff` optionally restricts the pass to rows
/// first seen after the given timestamp.
pub async fn needing_revalidation(
    ex: &mut PgConnection,
    network: &str,
    limit: i64,
    recent_cutoff: Option<i64>,
) -> Result<Vec<RevalidationCandidate>, sqlx::Error> {
    match recent_cutoff {
        None => {
            let query = format!(
                "SELECT address, code_hash, deployed, tags FROM addresses \
                 WHERE {REVALIDATION_WHERE} \
                 ORDER BY fund DESC NULLS LAST LIMIT $2;"
            );
            sqlx::query_as(&query)
                .bind(network)
                .bind(limit)
                .fetch_all(ex)
                .await
        }
        Some(cutoff) => {
            let query = format!(
                "SELECT address, code_hash, deployed, tags FROM addresses \
                 WHERE {REVALIDATION_WHERE} AND first_seen >= $3 \
                 ORDER BY fund DESC NULLS LAST LIMIT $2;"
            );
            sqlx::query_as(&query)
                .bind(network)
                .bind(limit)
                .bind(cutoff)
                .fetch_all(ex)
                .await
        }
    }
}

/// Fetches one row in full. Test and spot-check helper.
pub async fn fetch(
    ex: &mut PgConnection,
    network: &str,
    address: &str,
) -> Result<Option<AddressRow>, sqlx::Error> {
    const QUERY: &str = "\
        SELECT address, code_hash, contract_name, deployed, first_seen, last_updated, \
               tags, fund, last_fund_updated, name_checked, name_checked_at \
        FROM addresses WHERE network = $1 AND address = $2;";
    let row = sqlx::query(QUERY)
        .bind(network)
        .bind(address)
        .fetch_optional(ex)
        .await?;
    Ok(row.map(|row| AddressRow {
        address: row.get("address"),
        code_hash: row.get("code_hash"),
        contract_name: row.get("contract_name"),
        deployed: row.get("deployed"),
        first_seen: row.get("first_seen"),
        last_updated: row.get("last_updated"),
        tags: row.get::<Option<Vec<String>>, _>("tags").unwrap_or_default(),
        fund: row.get("fund"),
        last_fund_updated: row.get("last_fund_updated"),
        name_checked: row.get("name_checked"),
        name_checked_at: row.get("name_checked_at"),
    }))
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::schema,
        sqlx::{Connection, PgConnection},
    };

    fn eoa(address: &str, seen: i64) -> AddressRow {
        AddressRow {
            address: address.to_string(),
            first_seen: seen,
            last_updated: seen,
            tags: vec!["EOA".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn tags_round_trip_through_join() {
        assert_eq!(join_tags(&[]), "");
        assert_eq!(
            join_tags(&["Contract".to_string(), "Verified".to_string()]),
            "Contract,Verified"
        );
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_upsert_coalesces_fields() {
        let mut con = PgConnection::connect("postgresql://").await.unwrap();
        let mut tx = con.begin().await.unwrap();
        schema::ensure(&mut tx).await.unwrap();
        crate::clear_DANGER_(&mut tx).await.unwrap();

        // First write knows classification but not valuation.
        let first = AddressRow {
            address: "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string(),
            code_hash: Some("0x1234".to_string()),
            first_seen: 100,
            last_updated: 100,
            tags: vec!["Contract".to_string(), "Unverified".to_string()],
            ..Default::default()
        };
        upsert(&mut tx, "ethereum", std::slice::from_ref(&first))
            .await
            .unwrap();

        // Second write knows the name but not the hash. The hash must
        // survive, the name must land, tags are replaced.
        let second = AddressRow {
            address: first.address.clone(),
            contract_name: Some("TetherToken".to_string()),
            first_seen: 200,
            last_updated: 200,
            tags: vec!["Contract".to_string(), "Verified".to_string()],
            name_checked: Some(true),
            name_checked_at: Some(200),
            ..Default::default()
        };
        upsert(&mut tx, "ethereum", std::slice::from_ref(&second))
            .await
            .unwrap();

        let stored = fetch(&mut tx, "ethereum", &first.address)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.code_hash.as_deref(), Some("0x1234"));
        assert_eq!(stored.contract_name.as_deref(), Some("TetherToken"));
        assert_eq!(stored.tags, vec!["Contract", "Verified"]);
        assert_eq!(stored.first_seen, 100);
        assert_eq!(stored.last_updated, 200);
        assert_eq!(stored.name_checked, Some(true));
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_upsert_is_coalesce_commutative() {
        let mut con = PgConnection::connect("postgresql://").await.unwrap();
        let mut tx = con.begin().await.unwrap();
        schema::ensure(&mut tx).await.unwrap();
        crate::clear_DANGER_(&mut tx).await.unwrap();

        let base = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
        let with_hash = AddressRow {
            address: base.to_string(),
            code_hash: Some("0xff".to_string()),
            first_seen: 10,
            last_updated: 10,
            tags: vec!["Contract".to_string()],
            ..Default::default()
        };
        let with_deployed = AddressRow {
            address: base.to_string(),
            deployed: Some(5),
            first_seen: 10,
            last_updated: 10,
            tags: vec!["Contract".to_string()],
            ..Default::default()
        };

        upsert(&mut tx, "ethereum", &[with_hash.clone()]).await.unwrap();
        upsert(&mut tx, "ethereum", &[with_deployed.clone()]).await.unwrap();
        let ab = fetch(&mut tx, "ethereum", base).await.unwrap().unwrap();

        crate::clear_DANGER_(&mut tx).await.unwrap();
        upsert(&mut tx, "ethereum", &[with_deployed]).await.unwrap();
        upsert(&mut tx, "ethereum", &[with_hash]).await.unwrap();
        let ba = fetch(&mut tx, "ethereum", base).await.unwrap().unwrap();

        assert_eq!(ab.code_hash, ba.code_hash);
        assert_eq!(ab.deployed, ba.deployed);
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_reclassify_overwrites_with_nulls() {
        let mut con = PgConnection::connect("postgresql://").await.unwrap();
        let mut tx = con.begin().await.unwrap();
        schema::ensure(&mut tx).await.unwrap();
        crate::clear_DANGER_(&mut tx).await.unwrap();

        let address = "0xcccccccccccccccccccccccccccccccccccccccc";
        let stale = AddressRow {
            address: address.to_string(),
            code_hash: Some("0xdead".to_string()),
            contract_name: Some("Wrong".to_string()),
            deployed: Some(1),
            first_seen: 1,
            last_updated: 1,
            tags: vec!["Contract".to_string()],
            name_checked: Some(true),
            name_checked_at: Some(1),
            ..Default::default()
        };
        upsert(&mut tx, "ethereum", &[stale]).await.unwrap();

        // Revalidation decided this is actually an EOA.
        let repaired = AddressRow {
            address: address.to_string(),
            first_seen: 1,
            last_updated: 50,
            tags: vec!["EOA".to_string()],
            name_checked: Some(false),
            name_checked_at: Some(0),
            ..Default::default()
        };
        reclassify(&mut tx, "ethereum", &[repaired]).await.unwrap();

        let stored = fetch(&mut tx, "ethereum", address).await.unwrap().unwrap();
        assert_eq!(stored.code_hash, None);
        assert_eq!(stored.contract_name, None);
        assert_eq!(stored.deployed, None);
        assert_eq!(stored.tags, vec!["EOA"]);
        assert_eq!(stored.name_checked, Some(false));
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_fund_update_keeps_classification() {
        let mut con = PgConnection::connect("postgresql://").await.unwrap();
        let mut tx = con.begin().await.unwrap();
        schema::ensure(&mut tx).await.unwrap();
        crate::clear_DANGER_(&mut tx).await.unwrap();

        let address = "0xdddddddddddddddddddddddddddddddddddddddd";
        upsert(&mut tx, "ethereum", &[eoa(address, 100)]).await.unwrap();
        set_funds(&mut tx, "ethereum", &[(address.to_string(), 5000)])
            .await
            .unwrap();

        let stored = fetch(&mut tx, "ethereum", address).await.unwrap().unwrap();
        assert_eq!(stored.fund, Some(5000));
        assert!(stored.last_fund_updated.unwrap() > 0);
        assert_eq!(stored.tags, vec!["EOA"]);
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_revalidation_selection() {
        let mut con = PgConnection::connect("postgresql://").await.unwrap();
        let mut tx = con.begin().await.unwrap();
        schema::ensure(&mut tx).await.unwrap();
        crate::clear_DANGER_(&mut tx).await.unwrap();

        // Contract with no code hash: needs repair.
        let broken = AddressRow {
            address: "0x1111111111111111111111111111111111111111".to_string(),
            first_seen: 1,
            last_updated: 1,
            tags: vec!["Contract".to_string()],
            ..Default::default()
        };
        // Healthy EOA: must not be selected.
        let healthy = eoa("0x2222222222222222222222222222222222222222", 1);
        upsert(&mut tx, "ethereum", &[broken.clone(), healthy]).await.unwrap();

        let selected = needing_revalidation(&mut tx, "ethereum", 10, None)
            .await
            .unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].address, broken.address);
    }
}
