//! Wire types for the subset of the Ethereum JSON-RPC surface the
//! indexer uses. Numbers arrive as 0x-prefixed hex strings.

use {
    alloy_primitives::{Address, B256, Bytes, U256},
    chain::Tier,
    serde::{Deserialize, Deserializer, Serialize},
    serde_json::Value,
};

pub fn to_hex(number: u64) -> String {
    format!("0x{number:x}")
}

/// A u64 encoded as a hex quantity string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct U64Hex(pub u64);

impl<'de> Deserialize<'de> for U64Hex {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let digits = s.strip_prefix("0x").unwrap_or(&s);
        u64::from_str_radix(digits, 16)
            .map(U64Hex)
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub id: u64,
    /// A JSON `null` result is legitimate (e.g. an unknown transaction
    /// hash), so this defaults to `Null` rather than using `Option`.
    #[serde(default)]
    pub result: Value,
    pub error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct TierInfo {
    #[serde(deserialize_with = "tier_from_str")]
    pub tier: Tier,
}

fn tier_from_str<'de, D>(deserializer: D) -> Result<Tier, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

/// Filter for `eth_getLogs`. Only the fields the scanner needs.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    #[serde(serialize_with = "as_hex")]
    pub from_block: u64,
    #[serde(serialize_with = "as_hex")]
    pub to_block: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    pub topics: Vec<Option<B256>>,
}

fn as_hex<S>(number: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&to_hex(*number))
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: U64Hex,
    pub transaction_hash: B256,
    #[serde(default)]
    pub removed: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub number: U64Hex,
    pub hash: B256,
    pub timestamp: U64Hex,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: B256,
    pub block_number: Option<U64Hex>,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_filter_serializes_hex_quantities() {
        let filter = LogFilter {
            from_block: 0x10,
            to_block: 0x20,
            address: None,
            topics: vec![Some(B256::ZERO)],
        };
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(json["fromBlock"], "0x10");
        assert_eq!(json["toBlock"], "0x20");
        assert!(json.get("address").is_none());
    }

    #[test]
    fn deserializes_log() {
        let raw = serde_json::json!({
            "address": "0xdac17f958d2ee523a2206206994597c13d831ec7",
            "topics": [
                "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef",
                "0x000000000000000000000000aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                "0x000000000000000000000000bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"
            ],
            "data": "0x0000000000000000000000000000000000000000000000000000000005f5e100",
            "blockNumber": "0x112a880",
            "transactionHash": "0x88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b",
            "logIndex": "0x5"
        });
        let log: Log = serde_json::from_value(raw).unwrap();
        assert_eq!(log.block_number.0, 0x112a880);
        assert_eq!(log.topics.len(), 3);
        assert!(!log.removed);
    }

    #[test]
    fn deserializes_block_timestamp() {
        let raw = serde_json::json!({
            "number": "0x10",
            "hash": "0x88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b",
            "timestamp": "0x64",
        });
        let block: Block = serde_json::from_value(raw).unwrap();
        assert_eq!(block.timestamp.0, 100);
    }

    #[test]
    fn envelope_with_error() {
        let raw = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 7,
            "error": {"code": -32005, "message": "query returned more than 10000 results"}
        });
        let envelope: ResponseEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(envelope.id, 7);
        assert!(envelope.result.is_null());
        assert_eq!(envelope.error.unwrap().code, -32005);
    }
}
