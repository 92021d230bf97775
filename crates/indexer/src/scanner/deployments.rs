//! Deployment-time resolution through the explorer's creation-tx
//! endpoint, shared by the scanner's background fetcher and the
//! revalidator.

use {
    crate::domain::normalize,
    alloy_primitives::Address,
    anyhow::{Context, Result},
    chain::Chain,
    explorer::ExplorerClient,
};

/// Resolves creation timestamps for one explorer batch (at most
/// [`explorer::CREATION_BATCH_LIMIT`] addresses). Genesis deployments
/// take the chain's genesis timestamp; anything unresolvable is simply
/// absent from the result, never substituted with the current time.
pub async fn resolve_batch(
    explorer: &ExplorerClient,
    chain: Chain,
    addresses: &[String],
) -> Result<Vec<(String, i64)>> {
    let parsed: Vec<Address> = addresses.iter().filter_map(|a| a.parse().ok()).collect();
    if parsed.is_empty() {
        return Ok(Vec::new());
    }
    let creations = explorer
        .contract_creations(&parsed)
        .await
        .context("fetch contract creations")?;

    let mut resolved = Vec::with_capacity(creations.len());
    for creation in creations {
        let Ok(address) = normalize(&creation.contract_address) else {
            continue;
        };
        let timestamp = if creation.is_genesis() {
            Some(chain.genesis_timestamp())
        } else if let Some(raw) = creation.timestamp.as_deref() {
            raw.parse().ok()
        } else {
            via_transaction(explorer, &creation.tx_hash).await
        };
        if let Some(timestamp) = timestamp {
            resolved.push((address, timestamp));
        }
    }
    Ok(resolved)
}

/// Older explorer deployments omit the timestamp field; fall back to
/// resolving the creation transaction's block.
async fn via_transaction(explorer: &ExplorerClient, tx_hash: &str) -> Option<i64> {
    let block = explorer.transaction_block(tx_hash).await.ok()??;
    explorer.block_timestamp(block).await.ok()?
}
