//! UnifiedScanner: the streaming log-to-address pipeline.
//!
//! The fetch loop walks the target block window with an adaptive batch
//! size and keeps a small set of batch-processing tasks in flight.
//! Processing classifies every never-seen address, screens candidate
//! contracts by balance before spending explorer calls on verification,
//! and persists through the merge upsert, so re-running any window is
//! idempotent.

pub mod batching;
pub mod classification;
pub mod deployments;

pub use self::batching::AdaptiveBatcher;

use {
    self::classification::{Classification, Outcome, classify_batch},
    crate::{
        domain::{Tag, normalize, tag_strings},
        run::JobEnv,
        token_list,
    },
    alloy_primitives::{Address, B256, b256},
    anyhow::{Context, Result},
    balances::BalanceReader,
    chain::Chain,
    database::{addresses, addresses::AddressRow, excluded_blocks, tokens, unix_now},
    ethrpc::{Error as RpcError, RpcClient, types::LogFilter},
    explorer::ExplorerClient,
    sqlx::PgPool,
    std::{
        collections::{BTreeSet, HashSet},
        sync::Arc,
        time::{Duration, Instant},
    },
    tokio::{sync::mpsc, task::JoinSet},
};

/// Topic-0 of `Transfer(address,address,uint256)`, shared by every
/// ERC-20 deployment.
pub const TRANSFER_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

/// Retry ceiling for a shrinking range before the scanner moves on.
const MAX_RANGE_RETRIES: u32 = 5;

#[derive(Clone, Copy, Debug)]
pub struct ScannerConfig {
    /// How far back the window starts.
    pub time_delay: Duration,
    /// Bound on in-flight batch-processing tasks.
    pub max_concurrent: usize,
    /// Attempts on a single stubborn block before permanent exclusion.
    pub exclude_after_retries: u32,
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "scanner")]
struct Metrics {
    /// Blocks covered by successful getLogs requests.
    blocks_scanned: prometheus::IntCounter,
    /// Logs fetched.
    logs_fetched: prometheus::IntCounter,
    /// Never-seen addresses queued for classification.
    addresses_discovered: prometheus::IntCounter,
    /// Address rows persisted.
    addresses_persisted: prometheus::IntCounter,
    /// getLogs failures by classified kind.
    #[metric(labels("kind"))]
    get_logs_failures: prometheus::IntCounterVec,
    /// Blocks permanently excluded this run.
    blocks_excluded: prometheus::IntCounter,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}

struct Inner {
    chain: Chain,
    network: &'static str,
    db: PgPool,
    rpc: Arc<RpcClient>,
    explorer: Arc<ExplorerClient>,
    reader: Option<BalanceReader>,
    profile: chain::ScanProfile,
    /// Whitelisted token addresses used for the balance screen.
    whitelist: Vec<Address>,
    metrics: &'static Metrics,
}

pub struct UnifiedScanner {
    inner: Arc<Inner>,
    config: ScannerConfig,
    token_dir: std::path::PathBuf,
}

impl UnifiedScanner {
    pub fn new(env: JobEnv, config: ScannerConfig) -> Self {
        let reader = env
            .balance_helper
            .map(|helper| BalanceReader::new(env.rpc.clone(), helper));
        let inner = Inner {
            chain: env.chain,
            network: env.chain.name(),
            db: env.db,
            rpc: env.rpc,
            explorer: env.explorer,
            reader,
            profile: env.profile,
            whitelist: Vec::new(),
            metrics: Metrics::get(),
        };
        Self {
            inner: Arc::new(inner),
            config,
            token_dir: env.token_list_dir,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        self.bootstrap_whitelist().await?;
        let inner = self.inner.clone();

        let (from_block, to_block) = self.select_window().await?;
        tracing::info!(from_block, to_block, "scan window selected");

        let mut con = inner.db.acquire().await?;
        let mut excluded: BTreeSet<u64> = excluded_blocks::load_set(&mut con, inner.network)
            .await
            .context("load excluded blocks")?
            .into_iter()
            .filter_map(|block| u64::try_from(block).ok())
            .collect();
        drop(con);

        let (deploy_tx, deploy_rx) = mpsc::unbounded_channel();
        let deploy_task = tokio::spawn(deployment_fetcher(inner.clone(), deploy_rx));

        let mut batcher = AdaptiveBatcher::new(inner.profile);
        let mut seen: HashSet<String> = HashSet::new();
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        let mut current = from_block;
        let mut retries: u32 = 0;

        while current <= to_block || !tasks.is_empty() {
            if current > to_block || tasks.len() >= self.config.max_concurrent {
                if let Some(finished) = tasks.join_next().await {
                    match finished {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => tracing::warn!(?err, "batch processing failed"),
                        Err(err) => tracing::error!(?err, "batch task panicked"),
                    }
                }
                continue;
            }

            if excluded.contains(&current) {
                current += 1;
                retries = 0;
                continue;
            }

            let mut end = current
                .saturating_add(batcher.size().saturating_sub(1))
                .min(to_block);
            // Never let a range swallow a known-poison block.
            if let Some(&poison) = excluded.range(current..=end).next() {
                end = poison - 1;
            }

            let filter = LogFilter {
                from_block: current,
                to_block: end,
                address: None,
                topics: vec![Some(TRANSFER_TOPIC)],
            };
            let started = Instant::now();
            match inner.rpc.get_logs(&filter).await {
                Ok(logs) => {
                    let span = end - current + 1;
                    batcher.adjust(started.elapsed(), logs.len());
                    inner.metrics.blocks_scanned.inc_by(span);
                    inner.metrics.logs_fetched.inc_by(logs.len() as u64);

                    let fresh = extract_new_addresses(&logs, &mut seen);
                    if !fresh.is_empty() {
                        inner.metrics.addresses_discovered.inc_by(fresh.len() as u64);
                        tasks.spawn(process_batch(
                            inner.clone(),
                            fresh,
                            deploy_tx.clone(),
                        ));
                    }
                    current = end + 1;
                    retries = 0;
                }
                Err(err) => {
                    self.handle_get_logs_failure(
                        err,
                        &mut current,
                        end,
                        &mut retries,
                        &mut batcher,
                        &mut excluded,
                    )
                    .await?;
                }
            }
        }

        drop(deploy_tx);
        deploy_task.await.context("deployment fetcher panicked")?;
        tracing::info!(
            discovered = seen.len(),
            "scan complete"
        );
        Ok(())
    }

    /// The failure policy table: which error kind leads to shrink,
    /// retry, advance, or permanent exclusion.
    async fn handle_get_logs_failure(
        &self,
        err: RpcError,
        current: &mut u64,
        end: u64,
        retries: &mut u32,
        batcher: &mut AdaptiveBatcher,
        excluded: &mut BTreeSet<u64>,
    ) -> Result<()> {
        let inner = &self.inner;
        let span = end - *current + 1;
        *retries += 1;
        inner
            .metrics
            .get_logs_failures
            .with_label_values(&[failure_kind(&err)])
            .inc();

        match err {
            RpcError::Timeout => {
                if span == 1 && *retries >= self.config.exclude_after_retries {
                    let reason = format!("getLogs timeout after {} retries", *retries);
                    self.exclude_block(*current, &reason, excluded).await?;
                    *current += 1;
                    *retries = 0;
                } else if *retries < MAX_RANGE_RETRIES {
                    tracing::debug!(from = *current, to = end, "getLogs timeout, shrinking");
                    batcher.shrink_half();
                } else {
                    tracing::warn!(from = *current, to = end, "giving up on range after timeouts");
                    *current = end + 1;
                    *retries = 0;
                    batcher.shrink_half();
                }
            }
            RpcError::TooManyResults { suggested } => {
                if span == 1 && *retries >= self.config.exclude_after_retries {
                    let reason = format!("getLogs too many results after {} retries", *retries);
                    self.exclude_block(*current, &reason, excluded).await?;
                    *current += 1;
                    *retries = 0;
                    return Ok(());
                }
                match suggested {
                    Some((_, suggested_end)) if suggested_end >= *current => {
                        batcher.shrink_to(suggested_end - *current + 1);
                    }
                    _ => batcher.shrink_half(),
                }
                tracing::debug!(from = *current, to = end, "too many results, shrinking");
            }
            RpcError::ResponseTooLarge => {
                // A single block that cannot be served at any size is
                // poison: record it and move on.
                if span == 1 && *retries >= self.config.exclude_after_retries {
                    let reason = format!("getLogs response too large after {} retries", *retries);
                    self.exclude_block(*current, &reason, excluded).await?;
                    *current += 1;
                    *retries = 0;
                    return Ok(());
                }
                batcher.shrink_slow();
                tracing::debug!(from = *current, to = end, "response too large, shrinking");
            }
            RpcError::RangeTooWide => {
                batcher.shrink_half();
                tracing::debug!(from = *current, to = end, "range too wide, shrinking");
            }
            RpcError::Exhausted => {
                if span == 1 {
                    self.exclude_block(*current, "all endpoints exhausted", excluded)
                        .await?;
                    *current += 1;
                } else {
                    tracing::warn!(from = *current, to = end, "endpoints exhausted, skipping range");
                    *current = end + 1;
                    batcher.shrink_half();
                }
                *retries = 0;
            }
            other => {
                tracing::warn!(from = *current, to = end, ?other, "unexpected getLogs error, skipping range");
                *current = end + 1;
                *retries = 0;
            }
        }
        Ok(())
    }

    /// Records the block in memory and in the database so every future
    /// run skips it without a request.
    async fn exclude_block(
        &self,
        block: u64,
        reason: &str,
        excluded: &mut BTreeSet<u64>,
    ) -> Result<()> {
        let inner = &self.inner;
        tracing::warn!(block, reason, "permanently excluding block");
        excluded.insert(block);
        inner.metrics.blocks_excluded.inc();
        let mut con = inner.db.acquire().await?;
        excluded_blocks::insert(
            &mut con,
            inner.network,
            i64::try_from(block).unwrap_or(i64::MAX),
            reason,
        )
        .await
        .context("record excluded block")?;
        Ok(())
    }

    /// Maps the configured time delay to a block window. The from-block
    /// comes from the explorer's block-by-timestamp lookup, with a
    /// block-time estimate as fallback; the to-block is the current
    /// head.
    async fn select_window(&self) -> Result<(u64, u64)> {
        let inner = &self.inner;
        let to_block = inner.rpc.block_number().await.context("fetch chain head")?;
        let delay_secs = i64::try_from(self.config.time_delay.as_secs()).unwrap_or(i64::MAX);
        let target = unix_now() - delay_secs;
        let from_block = match inner.explorer.block_by_timestamp(target).await {
            Ok(block) => block,
            Err(err) => {
                tracing::warn!(?err, "block-by-timestamp failed, estimating from block time");
                to_block.saturating_sub(inner.chain.blocks_in(self.config.time_delay))
            }
        };
        Ok((from_block.min(to_block), to_block))
    }

    async fn bootstrap_whitelist(&mut self) -> Result<()> {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("whitelist bootstrap runs before any task holds the state");
        let whitelist = token_list::load(&self.token_dir, inner.chain)?;
        if !whitelist.is_empty() {
            let mut con = inner.db.acquire().await?;
            tokens::bootstrap(&mut con, inner.network, &token_list::to_db_tokens(&whitelist))
                .await
                .context("bootstrap token whitelist")?;
        }
        inner.whitelist = whitelist
            .iter()
            .filter_map(|token| token.address.parse().ok())
            .collect();
        Ok(())
    }
}

fn failure_kind(err: &RpcError) -> &'static str {
    match err {
        RpcError::Timeout => "timeout",
        RpcError::TooManyResults { .. } => "too_many_results",
        RpcError::ResponseTooLarge => "response_too_large",
        RpcError::RangeTooWide => "range_too_wide",
        RpcError::Exhausted => "exhausted",
        _ => "other",
    }
}

/// Pulls every address a transfer log touches (the emitting token plus
/// the indexed from/to) and keeps the never-seen ones.
fn extract_new_addresses(
    logs: &[ethrpc::types::Log],
    seen: &mut HashSet<String>,
) -> Vec<String> {
    let mut fresh = Vec::new();
    for log in logs {
        if log.removed {
            continue;
        }
        let mut candidates = vec![format!("{:?}", log.address)];
        // Transfer(from, to, value): both participants are indexed.
        for topic in log.topics.iter().skip(1).take(2) {
            candidates.push(format!("{topic:?}"));
        }
        for candidate in candidates {
            match normalize(&candidate) {
                Ok(address) => {
                    if seen.insert(address.clone()) {
                        fresh.push(address);
                    }
                }
                Err(err) => {
                    tracing::debug!(%candidate, %err, "skipping unusable log participant");
                }
            }
        }
    }
    fresh
}

/// Processes one batch of fresh addresses: DB dedup, classification,
/// balance-first selective verification, persistence.
async fn process_batch(
    inner: Arc<Inner>,
    addresses: Vec<String>,
    deploy: mpsc::UnboundedSender<String>,
) -> Result<()> {
    let mut con = inner.db.acquire().await?;
    let known: HashSet<String> =
        addresses::filter_classified(&mut con, inner.network, &addresses)
            .await
            .context("filter classified addresses")?
            .into_iter()
            .collect();
    drop(con);
    let fresh: Vec<String> = addresses
        .into_iter()
        .filter(|address| !known.contains(address))
        .collect();
    if fresh.is_empty() {
        return Ok(());
    }

    let classifications = classify_batch(&inner.rpc, &inner.db, inner.network, &fresh)
        .await
        .context("classify batch")?;

    let now = unix_now();
    let mut rows: Vec<AddressRow> = Vec::new();
    let mut destroyed: Vec<AddressRow> = Vec::new();
    let mut contracts: Vec<Classification> = Vec::new();
    let mut skipped = 0usize;

    for classification in classifications {
        match &classification.outcome {
            Outcome::Unknown => skipped += 1,
            Outcome::Eoa => rows.push(AddressRow {
                address: classification.address.clone(),
                first_seen: now,
                last_updated: now,
                tags: tag_strings(&[Tag::Eoa]),
                ..Default::default()
            }),
            Outcome::SmartWallet { code_hash } => rows.push(AddressRow {
                address: classification.address.clone(),
                code_hash: Some(code_hash.clone()),
                first_seen: now,
                last_updated: now,
                tags: tag_strings(&[Tag::Eoa, Tag::SmartWallet]),
                ..Default::default()
            }),
            Outcome::SelfDestroyed { code_hash } => destroyed.push(AddressRow {
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
    if skipped > 0 {
        tracing::info!(skipped, "addresses left unclassified, never guessing");
    }

    rows.extend(classify_contracts(&inner, &contracts, &deploy, now).await);

    persist(&inner, &rows, &destroyed).await?;
    inner
        .metrics
        .addresses_persisted
        .inc_by((rows.len() + destroyed.len()) as u64);
    Ok(())
}

/// Balance-first verification: only contracts holding anything are
/// worth explorer calls, the rest are stored unverified.
async fn classify_contracts(
    inner: &Inner,
    contracts: &[Classification],
    deploy: &mpsc::UnboundedSender<String>,
    now: i64,
) -> Vec<AddressRow> {
    let funded = screen_balances(inner, contracts).await;
    let mut rows = Vec::with_capacity(contracts.len());
    for classification in contracts {
        let Outcome::Contract { code_hash } = &classification.outcome else {
            continue;
        };
        let address = &classification.address;

        // Already verified earlier: the stored name is authoritative,
        // skip the explorer.
        let cached = classification
            .stored
            .as_ref()
            .is_some_and(|stored| stored.name_checked.unwrap_or(false));

        let (tags, contract_name, name_checked, name_checked_at) = if cached {
            (vec![Tag::Contract, Tag::Verified], None, Some(true), None)
        } else if funded.contains(address) {
            match verify_contract(inner, address).await {
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
            }
        } else {
            // Zero balance everywhere: not worth an explorer call.
            (vec![Tag::Contract, Tag::Unverified], None, Some(false), Some(0))
        };

        let deployed = classification.stored.as_ref().and_then(|s| s.deployed);
        if deployed.is_none() {
            // Resolved in the background; the row exists immediately.
            let _ = deploy.send(address.clone());
        }

        rows.push(AddressRow {
            address: address.clone(),
            code_hash: Some(code_hash.clone()),
            contract_name,
            deployed,
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

/// Returns the subset of contracts holding any native or whitelisted
/// token balance. Reader failures degrade to "nothing is funded":
/// verification is an optimization, not a correctness requirement.
async fn screen_balances(inner: &Inner, contracts: &[Classification]) -> HashSet<String> {
    let Some(reader) = &inner.reader else {
        return HashSet::new();
    };
    let holders: Vec<Address> = contracts
        .iter()
        .filter_map(|c| c.address.parse().ok())
        .collect();
    if holders.is_empty() {
        return HashSet::new();
    }

    let mut funded = HashSet::new();
    match reader.native_balances(&holders).await {
        Ok(balances) => {
            for (holder, balance) in holders.iter().zip(&balances) {
                if !balance.is_zero() {
                    funded.insert(format!("{holder:?}"));
                }
            }
        }
        Err(err) => tracing::warn!(?err, "native balance screen failed"),
    }
    match reader.erc20_balances(&holders, &inner.whitelist).await {
        Ok(balances) => {
            for (holder, tokens) in balances {
                if tokens.values().any(|balance| !balance.is_zero()) {
                    funded.insert(format!("{holder:?}"));
                }
            }
        }
        Err(err) => tracing::warn!(?err, "token balance screen failed"),
    }
    funded
}

/// One verification attempt. `None` covers both "explorer has no
/// source" and sub-task failures; neither fails the batch.
async fn verify_contract(inner: &Inner, address: &str) -> Option<String> {
    let parsed: Address = address.parse().ok()?;
    match inner.explorer.contract_source(parsed).await {
        Ok(Some(source)) if source.is_verified() => Some(source.contract_name),
        Ok(_) => None,
        Err(err) => {
            tracing::warn!(%address, ?err, "verification failed");
            None
        }
    }
}

/// Commits the batch atomically, retrying once on transient database
/// failure.
async fn persist(inner: &Inner, rows: &[AddressRow], destroyed: &[AddressRow]) -> Result<()> {
    if rows.is_empty() && destroyed.is_empty() {
        return Ok(());
    }
    let mut attempt = 0;
    loop {
        let result = async {
            let mut tx = inner.db.begin().await?;
            addresses::upsert(&mut tx, inner.network, rows).await?;
            // Self-destructed rows rewrite classification outright so
            // the stale deployment time cannot survive the merge.
            addresses::reclassify(&mut tx, inner.network, destroyed).await?;
            tx.commit().await
        }
        .await;
        match result {
            Ok(()) => return Ok(()),
            Err(err) if attempt == 0 => {
                tracing::warn!(?err, "persist failed, retrying once");
                attempt += 1;
            }
            Err(err) => return Err(err).context("persist batch"),
        }
    }
}

/// Background resolution of deployment timestamps, in explorer batches
/// of five. Non-blocking: the address rows already exist by the time
/// their timestamps land.
async fn deployment_fetcher(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<String>) {
    loop {
        let mut batch = Vec::with_capacity(explorer::CREATION_BATCH_LIMIT);
        let received = rx.recv_many(&mut batch, explorer::CREATION_BATCH_LIMIT).await;
        if received == 0 {
            return;
        }
        if let Err(err) = store_deployments(&inner, &batch).await {
            tracing::warn!(?err, "deployment time resolution failed");
        }
    }
}

async fn store_deployments(inner: &Inner, batch: &[String]) -> Result<()> {
    let resolved = deployments::resolve_batch(&inner.explorer, inner.chain, batch).await?;
    if !resolved.is_empty() {
        let mut con = inner.db.acquire().await?;
        addresses::set_deployed(&mut con, inner.network, &resolved)
            .await
            .context("store deployment times")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        ethrpc::types::{Log, U64Hex},
    };

    fn transfer_log(token: &str, from: &str, to: &str) -> Log {
        let pad = |addr: &str| -> B256 {
            let address: Address = addr.parse().unwrap();
            let mut bytes = [0u8; 32];
            bytes[12..].copy_from_slice(address.as_slice());
            B256::from(bytes)
        };
        Log {
            address: token.parse().unwrap(),
            topics: vec![TRANSFER_TOPIC, pad(from), pad(to)],
            data: alloy_primitives::Bytes::new(),
            block_number: U64Hex(1),
            transaction_hash: B256::ZERO,
            removed: false,
        }
    }

    #[test]
    fn extracts_token_and_participants_once() {
        let mut seen = HashSet::new();
        let log = transfer_log(
            "0xdac17f958d2ee523a2206206994597c13d831ec7",
            "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
        );
        let fresh = extract_new_addresses(std::slice::from_ref(&log), &mut seen);
        assert_eq!(fresh.len(), 3);
        assert!(fresh.contains(&"0xdac17f958d2ee523a2206206994597c13d831ec7".to_string()));
        assert!(fresh.contains(&"0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string()));

        // The same log again yields nothing new.
        let again = extract_new_addresses(&[log], &mut seen);
        assert!(again.is_empty());
    }

    #[test]
    fn reorged_logs_are_ignored() {
        let mut seen = HashSet::new();
        let mut log = transfer_log(
            "0xdac17f958d2ee523a2206206994597c13d831ec7",
            "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
        );
        log.removed = true;
        assert!(extract_new_addresses(&[log], &mut seen).is_empty());
    }

    #[test]
    fn failure_kinds_are_stable_label_values() {
        assert_eq!(failure_kind(&RpcError::Timeout), "timeout");
        assert_eq!(
            failure_kind(&RpcError::TooManyResults { suggested: None }),
            "too_many_results"
        );
        assert_eq!(failure_kind(&RpcError::Exhausted), "exhausted");
    }
}
