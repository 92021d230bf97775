//! Pure domain helpers: canonical address form, account
//! classification, and the closed tag vocabulary.

pub mod classify;
pub mod normalize;

pub use self::{
    classify::{AccountKind, classify, code_hash_hex},
    normalize::normalize,
};

/// The closed set of labels a row can carry. Tag sets are replaced
/// wholesale on every classifying write, never merged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
pub enum Tag {
    #[strum(serialize = "EOA")]
    Eoa,
    Contract,
    Verified,
    Unverified,
    SelfDestroyed,
    /// An EIP-7702 account: key-owned but carrying delegated code.
    SmartWallet,
}

pub fn tag_strings(tags: &[Tag]) -> Vec<String> {
    tags.iter().map(|tag| tag.to_string()).collect()
}
