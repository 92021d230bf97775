//! Batched balance collection through the deployed BalanceHelper
//! contract: many native or ERC-20 balance reads collapse into a single
//! `eth_call`. Chunk sizes adapt to what the gateway tolerates; a chunk
//! that keeps failing degrades to per-address calls so valuation can
//! always proceed.

mod chunker;

pub use chunker::AdaptiveChunker;

use {
    alloy_primitives::{Address, Bytes, U256},
    alloy_sol_types::{SolCall, sol},
    ethrpc::RpcClient,
    std::{collections::HashMap, sync::Arc, time::Duration},
};

sol! {
    interface IBalanceHelper {
        function getNativeBalances(address[] calldata holders)
            external view returns (uint256[] memory balances);
        function getTokenBalances(address[] calldata holders, address[] calldata tokens)
            external view returns (uint256[] memory balances);
    }

    interface IERC20 {
        function balanceOf(address holder) external view returns (uint256 balance);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Rpc(#[from] ethrpc::Error),
    #[error("undecodable helper response: {0}")]
    Decode(String),
    #[error("helper returned {got} balances for {expected} queries")]
    ShapeMismatch { expected: usize, got: usize },
}

/// Spacing between calls in the degraded per-address path.
const FALLBACK_SPACING: Duration = Duration::from_millis(100);

pub struct BalanceReader {
    rpc: Arc<RpcClient>,
    helper: Address,
}

impl BalanceReader {
    pub fn new(rpc: Arc<RpcClient>, helper: Address) -> Self {
        Self { rpc, helper }
    }

    /// Native balances in wei, positionally matching `holders`.
    pub async fn native_balances(&self, holders: &[Address]) -> Result<Vec<U256>, Error> {
        let mut chunker = AdaptiveChunker::default();
        let mut balances = Vec::with_capacity(holders.len());
        let mut index = 0;
        while index < holders.len() {
            let size = chunker.size().min(holders.len() - index);
            let chunk = &holders[index..index + size];
            match self.native_chunk(chunk).await {
                Ok(mut values) => {
                    balances.append(&mut values);
                    index += size;
                    chunker.record_success();
                }
                Err(err) if size == 1 || chunker.at_floor() => {
                    tracing::warn!(?err, size, "helper chunk failed, degrading to per-address");
                    balances.extend(self.native_one_by_one(chunk).await);
                    index += size;
                }
                Err(err) => {
                    tracing::debug!(?err, size, "helper chunk failed, shrinking");
                    chunker.record_failure();
                }
            }
        }
        Ok(balances)
    }

    /// ERC-20 balances: holder → token → amount in the token's own
    /// atoms. Zero balances are included so callers can distinguish
    /// "zero" from "not queried".
    pub async fn erc20_balances(
        &self,
        holders: &[Address],
        tokens: &[Address],
    ) -> Result<HashMap<Address, HashMap<Address, U256>>, Error> {
        let mut result: HashMap<Address, HashMap<Address, U256>> = HashMap::new();
        if tokens.is_empty() {
            return Ok(result);
        }
        // The helper flattens the holder × token matrix, so the chunk
        // budget counts matrix cells, not holders.
        let mut chunker = AdaptiveChunker::default();
        let mut index = 0;
        while index < holders.len() {
            let rows = (chunker.size() / tokens.len()).max(1);
            let size = rows.min(holders.len() - index);
            let chunk = &holders[index..index + size];
            match self.token_chunk(chunk, tokens).await {
                Ok(values) => {
                    for (holder_offset, holder) in chunk.iter().enumerate() {
                        let entry = result.entry(*holder).or_default();
                        for (token_offset, token) in tokens.iter().enumerate() {
                            entry.insert(
                                *token,
                                values[holder_offset * tokens.len() + token_offset],
                            );
                        }
                    }
                    index += size;
                    chunker.record_success();
                }
                Err(err) if size == 1 || chunker.at_floor() => {
                    tracing::warn!(?err, size, "token chunk failed, degrading to per-address");
                    for holder in chunk {
                        let entry = result.entry(*holder).or_default();
                        for token in tokens {
                            entry.insert(*token, self.token_one(*holder, *token).await);
                            tokio::time::sleep(FALLBACK_SPACING).await;
                        }
                    }
                    index += size;
                }
                Err(err) => {
                    tracing::debug!(?err, size, "token chunk failed, shrinking");
                    chunker.record_failure();
                }
            }
        }
        Ok(balances_with_all_holders(result, holders, tokens))
    }

    async fn native_chunk(&self, holders: &[Address]) -> Result<Vec<U256>, Error> {
        let call = IBalanceHelper::getNativeBalancesCall {
            holders: holders.to_vec(),
        };
        let data = Bytes::from(call.abi_encode());
        let output = self.rpc.call(self.helper, &data).await?;
        let balances = IBalanceHelper::getNativeBalancesCall::abi_decode_returns(&output)
            .map_err(|err| Error::Decode(err.to_string()))?;
        if balances.len() != holders.len() {
            return Err(Error::ShapeMismatch {
                expected: holders.len(),
                got: balances.len(),
            });
        }
        Ok(balances)
    }

    async fn token_chunk(
        &self,
        holders: &[Address],
        tokens: &[Address],
    ) -> Result<Vec<U256>, Error> {
        let call = IBalanceHelper::getTokenBalancesCall {
            holders: holders.to_vec(),
            tokens: tokens.to_vec(),
        };
        let data = Bytes::from(call.abi_encode());
        let output = self.rpc.call(self.helper, &data).await?;
        let balances = IBalanceHelper::getTokenBalancesCall::abi_decode_returns(&output)
            .map_err(|err| Error::Decode(err.to_string()))?;
        let expected = holders.len() * tokens.len();
        if balances.len() != expected {
            return Err(Error::ShapeMismatch {
                expected,
                got: balances.len(),
            });
        }
        Ok(balances)
    }

    /// Last-resort path: direct `eth_getBalance` per holder, recording
    /// zero when even that fails so valuation can still proceed.
    async fn native_one_by_one(&self, holders: &[Address]) -> Vec<U256> {
        let mut balances = Vec::with_capacity(holders.len());
        for holder in holders {
            match self.rpc.balance(*holder).await {
                Ok(value) => balances.push(value),
                Err(err) => {
                    tracing::warn!(%holder, ?err, "balance unavailable, recording zero");
                    balances.push(U256::ZERO);
                }
            }
            tokio::time::sleep(FALLBACK_SPACING).await;
        }
        balances
    }

    async fn token_one(&self, holder: Address, token: Address) -> U256 {
        let call = IERC20::balanceOfCall { holder };
        let data = Bytes::from(call.abi_encode());
        match self.rpc.call(token, &data).await {
            Ok(output) => IERC20::balanceOfCall::abi_decode_returns(&output)
                .unwrap_or(U256::ZERO),
            Err(err) => {
                tracing::warn!(%holder, %token, ?err, "token balance unavailable, recording zero");
                U256::ZERO
            }
        }
    }
}

/// Guarantees every requested holder has an entry even if a degraded
/// path skipped it.
fn balances_with_all_holders(
    mut result: HashMap<Address, HashMap<Address, U256>>,
    holders: &[Address],
    tokens: &[Address],
) -> HashMap<Address, HashMap<Address, U256>> {
    for holder in holders {
        let entry = result.entry(*holder).or_default();
        for token in tokens {
            entry.entry(*token).or_insert(U256::ZERO);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helper_call_encoding_round_trips() {
        let holders = vec![Address::repeat_byte(0xaa), Address::repeat_byte(0xbb)];
        let call = IBalanceHelper::getNativeBalancesCall {
            holders: holders.clone(),
        };
        let encoded = call.abi_encode();
        let decoded = IBalanceHelper::getNativeBalancesCall::abi_decode(&encoded).unwrap();
        assert_eq!(decoded.holders, holders);
    }

    #[test]
    fn missing_holders_are_filled_with_zero() {
        let holders = vec![Address::repeat_byte(0x01)];
        let tokens = vec![Address::repeat_byte(0x02)];
        let filled = balances_with_all_holders(HashMap::new(), &holders, &tokens);
        assert_eq!(filled[&holders[0]][&tokens[0]], U256::ZERO);
    }
}
