//! Error taxonomy for gateway failures. `eth_getLogs` failure strings
//! differ per gateway vendor, so classification is substring based over
//! the observed phrasings.

use {rand::Rng, std::time::Duration, thiserror::Error};

#[derive(Debug, Error)]
pub enum Error {
    /// A single attempt exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// The gateway refused because the result set is over its cap. Some
    /// gateways suggest a narrower range in the error payload.
    #[error("query returned too many results")]
    TooManyResults { suggested: Option<(u64, u64)> },

    /// The serialized response exceeds the gateway's message size cap.
    #[error("response too large")]
    ResponseTooLarge,

    /// The requested block span exceeds the gateway's limit.
    #[error("block range too wide")]
    RangeTooWide,

    /// Every configured endpoint failed with a transient error.
    #[error("all endpoints exhausted")]
    Exhausted,

    /// An error the gateway reported that fits no known kind.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl Error {
    /// Whether retrying the identical request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Http(_) | Self::Rpc { .. } | Self::Exhausted => true,
            Self::TooManyResults { .. }
            | Self::ResponseTooLarge
            | Self::RangeTooWide
            | Self::InvalidResponse(_) => false,
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(err)
        }
    }
}

/// Maps a JSON-RPC error onto a kind the scanner can act on.
pub fn classify(code: i64, message: &str, data: Option<&serde_json::Value>) -> Error {
    let lower = message.to_lowercase();
    if lower.contains("returned more than") || lower.contains("too many results") {
        return Error::TooManyResults {
            suggested: suggested_range(message)
                .or_else(|| data.and_then(|d| d.as_str()).and_then(suggested_range)),
        };
    }
    if lower.contains("response too large")
        || lower.contains("max message size")
        || lower.contains("response size exceeded")
    {
        return Error::ResponseTooLarge;
    }
    if lower.contains("block range")
        || lower.contains("range is too wide")
        || lower.contains("exceed maximum block range")
    {
        return Error::RangeTooWide;
    }
    if lower.contains("timeout") || lower.contains("timed out") {
        return Error::Timeout;
    }
    Error::Rpc {
        code,
        message: message.to_string(),
    }
}

/// Some gateways embed the range they are willing to serve, e.g.
/// "... Try with this block range [0x10d4f60, 0x10d4f6f]". Returns the
/// parsed pair when present.
pub fn suggested_range(message: &str) -> Option<(u64, u64)> {
    let open = message.rfind('[')?;
    let close = message[open..].find(']')? + open;
    let inner = &message[open + 1..close];
    let mut parts = inner.split(',').map(str::trim);
    let from = parse_block_number(parts.next()?)?;
    let to = parse_block_number(parts.next()?)?;
    (from <= to).then_some((from, to))
}

fn parse_block_number(s: &str) -> Option<u64> {
    match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

/// Exponential backoff with jitter: 500ms, 1s, 2s, ... plus up to 250ms
/// of noise, capped at 10s.
pub fn backoff(attempt: u32) -> Duration {
    let base = Duration::from_millis(500)
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
    (base + jitter).min(Duration::from_secs(10))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_too_many_results() {
        let err = classify(-32005, "query returned more than 10000 results", None);
        assert!(matches!(err, Error::TooManyResults { suggested: None }));
        assert!(!err.is_transient());
    }

    #[test]
    fn classifies_with_suggested_range() {
        let err = classify(
            -32005,
            "query returned more than 10000 results. Try with this block range \
             [0x10d4f60, 0x10d4f6f]",
            None,
        );
        match err {
            Error::TooManyResults { suggested } => {
                assert_eq!(suggested, Some((0x10d4f60, 0x10d4f6f)));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn classifies_response_size() {
        for message in [
            "response too large",
            "max message size exceeded",
            "Response size exceeded limit",
        ] {
            assert!(matches!(classify(-32000, message, None), Error::ResponseTooLarge));
        }
    }

    #[test]
    fn classifies_range_too_wide() {
        assert!(matches!(
            classify(-32602, "block range is too wide", None),
            Error::RangeTooWide
        ));
        assert!(matches!(
            classify(-32602, "eth_getLogs requests exceed maximum block range: 2000", None),
            Error::RangeTooWide
        ));
    }

    #[test]
    fn classifies_timeout_message() {
        let err = classify(-32000, "query timeout exceeded", None);
        assert!(matches!(err, Error::Timeout));
        assert!(err.is_transient());
    }

    #[test]
    fn unknown_errors_stay_generic_and_transient() {
        let err = classify(-32000, "header not found", None);
        assert!(matches!(err, Error::Rpc { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn suggested_range_rejects_inverted_pairs() {
        assert_eq!(suggested_range("range [0x10, 0x2]"), None);
        assert_eq!(suggested_range("range [12, 20]"), Some((12, 20)));
        assert_eq!(suggested_range("no range here"), None);
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert!(backoff(1) < backoff(3));
        assert!(backoff(30) <= Duration::from_secs(10));
    }
}
