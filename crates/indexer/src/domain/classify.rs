//! Code-based account classification. Pure: depends only on the bytes
//! handed in, so the scanner and the revalidator share it without
//! sharing any state.

use alloy_primitives::keccak256;

/// EIP-7702 delegation designator: delegated accounts store exactly
/// `0xef0100 || address` as their code.
pub const EIP7702_DELEGATION_PREFIX: [u8; 3] = [0xef, 0x01, 0x00];
const EIP7702_CODE_LEN: usize = 23;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountKind {
    Eoa,
    SmartContract,
    /// A key-owned account with an EIP-7702 delegation installed.
    Eip7702Eoa,
    /// Inputs were insufficient to decide. Callers must skip the
    /// address, never guess.
    Unknown,
}

/// `code` is the account's current on-chain code; `None` means the
/// lookup itself failed.
pub fn classify(code: Option<&[u8]>) -> AccountKind {
    match code {
        None => AccountKind::Unknown,
        Some([]) => AccountKind::Eoa,
        Some(code)
            if code.len() == EIP7702_CODE_LEN
                && code.starts_with(&EIP7702_DELEGATION_PREFIX) =>
        {
            AccountKind::Eip7702Eoa
        }
        Some(_) => AccountKind::SmartContract,
    }
}

/// Lowercase hex keccak hash of the code, `None` for empty code so EOAs
/// keep a NULL hash column.
pub fn code_hash_hex(code: &[u8]) -> Option<String> {
    if code.is_empty() {
        return None;
    }
    Some(format!("{:?}", keccak256(code)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_code_is_eoa() {
        assert_eq!(classify(Some(&[])), AccountKind::Eoa);
    }

    #[test]
    fn missing_code_is_unknown() {
        assert_eq!(classify(None), AccountKind::Unknown);
    }

    #[test]
    fn delegation_designator_is_smart_wallet() {
        let mut code = vec![0xef, 0x01, 0x00];
        code.extend_from_slice(&[0xaa; 20]);
        assert_eq!(classify(Some(&code)), AccountKind::Eip7702Eoa);
    }

    #[test]
    fn designator_with_wrong_length_is_a_contract() {
        // A contract whose code merely begins with the magic bytes but
        // is not a 23-byte delegation.
        let mut code = vec![0xef, 0x01, 0x00];
        code.extend_from_slice(&[0xaa; 40]);
        assert_eq!(classify(Some(&code)), AccountKind::SmartContract);
    }

    #[test]
    fn ordinary_bytecode_is_a_contract() {
        assert_eq!(classify(Some(&[0x60, 0x80, 0x60, 0x40])), AccountKind::SmartContract);
    }

    #[test]
    fn code_hash_matches_keccak() {
        assert_eq!(code_hash_hex(&[]), None);
        let hash = code_hash_hex(&[0x60, 0x80]).unwrap();
        assert!(hash.starts_with("0x"));
        assert_eq!(hash.len(), 66);
        assert_eq!(hash, format!("{:?}", keccak256([0x60, 0x80])));
    }

    #[test]
    fn classification_is_pure() {
        let code = vec![0x60, 0x80];
        assert_eq!(classify(Some(&code)), classify(Some(&code)));
    }
}
