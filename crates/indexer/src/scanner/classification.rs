//! The stateless classification routine shared by the scanner and the
//! revalidator: live code lookups, the pure classifier, and the
//! self-destruct comparison against what the database remembers.

use {
    crate::domain::{AccountKind, classify, code_hash_hex},
    anyhow::{Context, Result},
    database::addresses::{StoredIdentity, stored_identities},
    ethrpc::RpcClient,
    sqlx::PgPool,
    std::collections::HashMap,
};

/// Addresses per `eth_getCode` JSON-RPC batch.
const CODE_BATCH: usize = 50;

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Eoa,
    /// EIP-7702 account: an EOA whose code hash is populated.
    SmartWallet { code_hash: String },
    Contract { code_hash: String },
    /// Had code according to the database, none on chain now. The hash
    /// is the remembered one, kept for audit.
    SelfDestroyed { code_hash: String },
    /// The code lookup failed; the caller must skip the address.
    Unknown,
}

#[derive(Clone, Debug)]
pub struct Classification {
    pub address: String,
    pub outcome: Outcome,
    /// What the database already knew, when anything.
    pub stored: Option<StoredIdentity>,
}

impl Classification {
    pub fn is_contract(&self) -> bool {
        matches!(self.outcome, Outcome::Contract { .. })
    }
}

/// Classifies a batch of canonical addresses against live chain state.
/// Never guesses: lookup failures come back as [`Outcome::Unknown`].
pub async fn classify_batch(
    rpc: &RpcClient,
    db: &PgPool,
    network: &str,
    addresses: &[String],
) -> Result<Vec<Classification>> {
    let mut con = db.acquire().await.context("acquire connection")?;
    let stored: HashMap<String, StoredIdentity> =
        stored_identities(&mut con, network, addresses)
            .await
            .context("load stored identities")?
            .into_iter()
            .map(|identity| (identity.address.clone(), identity))
            .collect();
    drop(con);

    let mut classifications = Vec::with_capacity(addresses.len());
    for chunk in addresses.chunks(CODE_BATCH) {
        let parsed: Vec<Option<alloy_primitives::Address>> = chunk
            .iter()
            .map(|address| address.parse().ok())
            .collect();
        let lookups: Vec<alloy_primitives::Address> =
            parsed.iter().filter_map(|a| *a).collect();
        let mut codes = rpc
            .batch_get_code(&lookups)
            .await
            .context("batch code lookup")?
            .into_iter();

        for (address, parsed) in chunk.iter().zip(&parsed) {
            let code = match parsed {
                Some(_) => codes.next().flatten(),
                None => {
                    tracing::warn!(%address, "unparsable address, skipping");
                    None
                }
            };
            let stored = stored.get(address).cloned();
            let outcome = match classify(code.as_ref().map(|b| b.as_ref())) {
                AccountKind::Unknown => Outcome::Unknown,
                AccountKind::Eoa => {
                    // Live code is gone; if we ever saw a hash this is a
                    // self-destructed contract, not an EOA.
                    match stored.as_ref().and_then(|s| s.code_hash.clone()) {
                        Some(code_hash) => Outcome::SelfDestroyed { code_hash },
                        None => Outcome::Eoa,
                    }
                }
                AccountKind::Eip7702Eoa => Outcome::SmartWallet {
                    code_hash: code_hash_hex(code.as_ref().map(|b| b.as_ref()).unwrap_or(&[]))
                        .unwrap_or_default(),
                },
                AccountKind::SmartContract => Outcome::Contract {
                    code_hash: code_hash_hex(code.as_ref().map(|b| b.as_ref()).unwrap_or(&[]))
                        .unwrap_or_default(),
                },
            };
            classifications.push(Classification {
                address: address.clone(),
                outcome,
                stored,
            });
        }
    }
    Ok(classifications)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_predicate() {
        let classification = Classification {
            address: "0x0".into(),
            outcome: Outcome::Contract {
                code_hash: "0xabc".into(),
            },
            stored: None,
        };
        assert!(classification.is_contract());
        let eoa = Classification {
            address: "0x0".into(),
            outcome: Outcome::Eoa,
            stored: None,
        };
        assert!(!eoa.is_contract());
    }
}
