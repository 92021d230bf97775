//! DataRevalidator: the idempotent reclassification pass.
//!
//! Selects rows whose classification is incomplete or inconsistent with
//! current on-chain truth, reruns the same stateless classification
//! routine the scanner uses, and rewrites the rows authoritatively.
//! Rows the classifier cannot decide are left untouched. Safe to run
//! next to an active scanner: same upsert path, no schema DDL.

use {
    crate::{
        domain::{Tag, tag_strings},
        run::JobEnv,
        scanner::{
            classification::{Classification, Outcome, classify_batch},
            deployments,
        },
    },
    alloy_primitives::Address,
    anyhow::{Context, Result},
    chain::Chain,
    database::{addresses, addresses::AddressRow, unix_now},
    ethrpc::RpcClient,
    explorer::ExplorerClient,
    sqlx::PgPool,
    std::{collections::HashMap, sync::Arc, time::Duration},
};

#[derive(Clone, Copy, Debug)]
pub struct RevalidateConfig {
    /// Restrict the pass to rows first seen within this window.
    pub recent_window: Option<Duration>,
    pub max_batch: i64,
    pub chunk_size: usize,
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "revalidator")]
struct Metrics {
    /// Rows selected for revalidation.
    candidates: prometheus::IntGauge,
    /// Rows rewritten with fresh classification.
    repaired: prometheus::IntCounter,
    /// Rows left untouched because classification came back unknown.
    undecided: prometheus::IntCounter,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}

pub struct DataRevalidator {
    chain: Chain,
    network: &'static str,
    db: PgPool,
    rpc: Arc<RpcClient>,
    explorer: Arc<ExplorerClient>,
    config: RevalidateConfig,
    metrics: &'static Metrics,
}

impl DataRevalidator {
    pub fn new(env: JobEnv, config: RevalidateConfig) -> Self {
        Self {
            chain: env.chain,
            network: env.chain.name(),
            db: env.db,
            rpc: env.rpc,
            explorer: env.explorer,
            config,
            metrics: Metrics::get(),
        }
    }

    pub async fn run(self) -> Result<()> {
        let recent_cutoff = self.config.recent_window.map(|window| {
            unix_now() - i64::try_from(window.as_secs()).unwrap_or(i64::MAX)
        });

        let mut con = self.db.acquire().await?;
        let candidates = addresses::needing_revalidation(
            &mut con,
            self.network,
            self.config.max_batch,
            recent_cutoff,
        )
        .await
        .context("select rows needing revalidation")?;
        drop(con);

        #[allow(clippy::cast_possible_wrap)]
        self.metrics.candidates.set(candidates.len() as i64);
        tracing::info!(candidates = candidates.len(), "rows need revalidation");

        for chunk in candidates.chunks(self.config.chunk_size) {
            let addresses: Vec<String> =
                chunk.iter().map(|candidate| candidate.address.clone()).collect();
            match self.revalidate_chunk(&addresses).await {
                Ok((repaired, undecided)) => {
                    self.metrics.repaired.inc_by(repaired);
                    self.metrics.undecided.inc_by(undecided);
                }
                Err(err) => {
                    // The rows stay in the pool for a later pass.
                    tracing::warn!(?err, "revalidation chunk failed, leaving rows for next run");
                }
            }
        }
        Ok(())
    }

    async fn revalidate_chunk(&self, addresses: &[String]) -> Result<(u64, u64)> {
        let classifications = classify_batch(&self.rpc, &self.db, self.network, addresses)
            .await
            .context("classify chunk")?;

        let now = unix_now();
        let mut undecided = 0u64;
        let mut rows: Vec<AddressRow> = Vec::new();
        let mut contracts: Vec<Classification> = Vec::new();

        for classification in classifications {
            match &classification.outcome {
                Outcome::Unknown => {
                    // Never overwrite a row with speculative data.
                    tracing::debug!(address = %classification.address, "classification unknown, leaving row untouched");
                    undecided += 1;
                }
                Outcome::Eoa => rows.push(AddressRow {
                    address: classification.address.clone(),
                    first_seen: now,
                    last_updated: now,
                    tags: tag_strings(&[Tag::Eoa]),
                    name_checked: Some(false),
                    name_checked_at: Some(0),
                    ..Default::default()
                }),
                Outcome::SmartWallet { code_hash } => rows.push(AddressRow {
                    address: classification.address.clone(),
                    code_hash: Some(code_hash.clone()),
                    first_seen: now,
                    last_updated: now,
                    tags: tag_strings(&[Tag::Eoa, Tag::SmartWallet]),
                    name_checked: Some(false),
                    name_checked_at: Some(0),
                    ..Default::default()
                }),
                Outcome::SelfDestroyed { code_hash } => rows.push(AddressRow {
                    address: classification.address.clone(),
                    code_hash: Some(code_hash.clone()),
                    first_seen: now,
                    last_updated: now,
                    tags: tag_strings(&[Tag::Contract, Tag::SelfDestroyed]),
                    name_checked: Some(false),
                    name_checked_at: Some(0),
                    ..Default::default()
                }),
                Outcome::Contract { .. } => contracts.push(classification),
            }
        }

        rows.extend(self.rebuild_contracts(&contracts, now).await);

        if !rows.is_empty() {
            let mut tx = self.db.begin().await?;
            addresses::reclassify(&mut tx, self.network, &rows).await?;
            tx.commit().await.context("commit repaired rows")?;
        }
        Ok((rows.len() as u64, undecided))
    }

    /// Rebuilds authoritative contract rows: deployment times in
    /// explorer batches of five, then source metadata (the explorer
    /// client paces the requests).
    async fn rebuild_contracts(&self, contracts: &[Classification], now: i64) -> Vec<AddressRow> {
        let missing_deployed: Vec<String> = contracts
            .iter()
            .filter(|classification| {
                classification
                    .stored
                    .as_ref()
                    .is_none_or(|stored| stored.deployed.is_none())
            })
            .map(|classification| classification.address.clone())
            .collect();
        let mut deployed: HashMap<String, i64> = HashMap::new();
        for batch in missing_deployed.chunks(explorer::CREATION_BATCH_LIMIT) {
            match deployments::resolve_batch(&self.explorer, self.chain, batch).await {
                Ok(resolved) => deployed.extend(resolved),
                Err(err) => {
                    tracing::warn!(?err, "deployment batch failed, timestamps stay null");
                }
            }
        }

        let mut rows = Vec::with_capacity(contracts.len());
        for classification in contracts {
            let Outcome::Contract { code_hash } = &classification.outcome else {
                continue;
            };
            let address = &classification.address;
            let (tags, contract_name, name_checked, name_checked_at) =
                match self.fetch_source(address).await {
                    Some(name) => (
                        vec![Tag::Contract, Tag::Verified],
                        Some(name),
                        Some(true),
                        Some(now),
                    ),
                    None => (
                        vec![Tag::Contract, Tag::Unverified],
                        None,
                        Some(false),
                        Some(0),
                    ),
                };
            rows.push(AddressRow {
                address: address.clone(),
                code_hash: Some(code_hash.clone()),
                contract_name,
                deployed: classification
                    .stored
                    .as_ref()
                    .and_then(|stored| stored.deployed)
                    .or_else(|| deployed.get(address).copied()),
                first_seen: now,
                last_updated: now,
                tags: tag_strings(&tags),
                name_checked,
                name_checked_at,
                ..Default::default()
            });
        }
        rows
    }

    async fn fetch_source(&self, address: &str) -> Option<String> {
        let parsed: Address = address.parse().ok()?;
        match self.explorer.contract_source(parsed).await {
            Ok(Some(source)) if source.is_verified() => Some(source.contract_name),
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(%address, ?err, "source fetch failed, storing unverified");
                None
            }
        }
    }
}
