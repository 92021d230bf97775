//! Parsing of the two explorer response dialects.

use serde::de::DeserializeOwned;

/// A successfully parsed non-proxy response.
#[derive(Debug, PartialEq)]
pub enum Outcome<T> {
    Data(T),
    /// `status = "0"` with a "No data found" style message. The address
    /// simply has nothing indexed; callers treat this as a negative
    /// classification signal.
    Empty,
}

impl<T> Outcome<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Data(data) => Some(data),
            Self::Empty => None,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum ParseError {
    RateLimited,
    InvalidKey,
    Malformed(String),
}

const EMPTY_MARKERS: &[&str] = &[
    "no data found",
    "no records found",
    "no transactions found",
    "contract source code not verified",
];

/// Parses the `{status, message, result}` envelope of non-proxy modules.
pub fn parse<T: DeserializeOwned>(body: &serde_json::Value) -> Result<Outcome<T>, ParseError> {
    let status = body
        .get("status")
        .and_then(|s| s.as_str())
        .ok_or_else(|| ParseError::Malformed("missing status field".into()))?;
    let message = body.get("message").and_then(|m| m.as_str()).unwrap_or("");
    let result_text = body.get("result").and_then(|r| r.as_str()).unwrap_or("");

    if status == "1" {
        let result = body
            .get("result")
            .cloned()
            .ok_or_else(|| ParseError::Malformed("status 1 without result".into()))?;
        return serde_json::from_value(result)
            .map(Outcome::Data)
            .map_err(|err| ParseError::Malformed(err.to_string()));
    }

    let combined = format!("{message} {result_text}").to_lowercase();
    if EMPTY_MARKERS.iter().any(|marker| combined.contains(marker)) {
        return Ok(Outcome::Empty);
    }
    if combined.contains("rate limit") {
        return Err(ParseError::RateLimited);
    }
    if combined.contains("invalid api key") || combined.contains("missing/invalid api key") {
        return Err(ParseError::InvalidKey);
    }
    Err(ParseError::Malformed(format!(
        "status {status}: {message} {result_text}"
    )))
}

/// Parses a proxy-module response, which is a plain JSON-RPC envelope
/// without the status wrapper. A JSON `null` result becomes `None`.
pub fn parse_proxy<T: DeserializeOwned>(
    body: &serde_json::Value,
) -> Result<Option<T>, ParseError> {
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown proxy error")
            .to_lowercase();
        if message.contains("rate limit") {
            return Err(ParseError::RateLimited);
        }
        return Err(ParseError::Malformed(message));
    }
    match body.get("result") {
        None => Err(ParseError::Malformed("proxy response without result".into())),
        Some(serde_json::Value::Null) => Ok(None),
        Some(result) => serde_json::from_value(result.clone())
            .map(Some)
            .map_err(|err| ParseError::Malformed(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::ContractCreation, serde_json::json};

    #[test]
    fn parses_data() {
        let body = json!({
            "status": "1",
            "message": "OK",
            "result": [{
                "contractAddress": "0xdac17f958d2ee523a2206206994597c13d831ec7",
                "contractCreator": "0x36928500bc1dcd7af6a2b4008875cc336b927d57",
                "txHash": "0x2f1c5c2b44f771e942a8506148e256f94f1a464babc938ae0690c6e34cd79190"
            }]
        });
        let outcome: Outcome<Vec<ContractCreation>> = parse(&body).unwrap();
        let Outcome::Data(creations) = outcome else {
            panic!("expected data");
        };
        assert_eq!(creations.len(), 1);
        assert!(!creations[0].is_genesis());
    }

    #[test]
    fn no_data_found_is_a_negative_answer() {
        let body = json!({
            "status": "0",
            "message": "No data found",
            "result": []
        });
        let outcome: Outcome<Vec<ContractCreation>> = parse(&body).unwrap();
        assert_eq!(outcome.into_option(), None);
    }

    #[test]
    fn rate_limit_is_an_error() {
        let body = json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Max rate limit reached, please use API Key for higher rate limit"
        });
        let result: Result<Outcome<Vec<ContractCreation>>, _> = parse(&body);
        assert_eq!(result.unwrap_err(), ParseError::RateLimited);
    }

    #[test]
    fn invalid_key_is_detected() {
        let body = json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Missing/Invalid API Key"
        });
        let result: Result<Outcome<Vec<ContractCreation>>, _> = parse(&body);
        assert_eq!(result.unwrap_err(), ParseError::InvalidKey);
    }

    #[test]
    fn proxy_null_result_is_none() {
        let body = json!({"jsonrpc": "2.0", "id": 1, "result": null});
        let parsed: Option<serde_json::Value> = parse_proxy(&body).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn proxy_result_has_no_status_envelope() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"blockNumber": "0x10"}
        });
        #[derive(serde::Deserialize)]
        struct Tx {
            #[serde(rename = "blockNumber")]
            block_number: String,
        }
        let parsed: Option<Tx> = parse_proxy(&body).unwrap();
        assert_eq!(parsed.unwrap().block_number, "0x10");
    }
}
