//! Canonical address form: `0x` plus exactly 40 lowercase hex chars.
//! Inputs arrive from logs (32-byte padded topics), explorer payloads
//! (sometimes quoted), and legacy rows (mixed case, missing prefix).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("empty address")]
    Empty,
    #[error("non-hex character in address")]
    InvalidHex,
    #[error("implausible address length {0}")]
    BadLength(usize),
}

/// Normalizes to the canonical form. Trims whitespace and quotes,
/// accepts a missing `0x`, left-pads short values, and unwraps 32-byte
/// topic padding. Idempotent: normalizing a canonical address returns
/// it unchanged.
pub fn normalize(input: &str) -> Result<String, NormalizeError> {
    let trimmed = input
        .trim()
        .trim_matches(|c| c == '"' || c == '\'');
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return Err(NormalizeError::Empty);
    }
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(NormalizeError::InvalidHex);
    }
    let lower = digits.to_lowercase();
    let body = match lower.len() {
        40 => lower,
        // A 32-byte topic carrying an address in its low 20 bytes.
        64 => {
            if !lower[..24].chars().all(|c| c == '0') {
                return Err(NormalizeError::BadLength(64));
            }
            lower[24..].to_string()
        }
        n if n < 40 => format!("{:0>40}", lower),
        n => return Err(NormalizeError::BadLength(n)),
    };
    Ok(format!("0x{body}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_mixed_case_and_prefix() {
        assert_eq!(
            normalize("0xDAC17F958D2ee523a2206206994597C13D831ec7").unwrap(),
            "0xdac17f958d2ee523a2206206994597c13d831ec7"
        );
        assert_eq!(
            normalize("dac17f958d2ee523a2206206994597c13d831ec7").unwrap(),
            "0xdac17f958d2ee523a2206206994597c13d831ec7"
        );
    }

    #[test]
    fn unwraps_topic_padding() {
        assert_eq!(
            normalize("0x000000000000000000000000aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")
                .unwrap(),
            "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        );
        // A 32-byte value with garbage in the high bytes is not an
        // address.
        assert!(
            normalize("0x010000000000000000000000aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")
                .is_err()
        );
    }

    #[test]
    fn trims_noise_and_pads() {
        assert_eq!(
            normalize("  \"0xABC\"  ").unwrap(),
            "0x0000000000000000000000000000000000000abc"
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(normalize(""), Err(NormalizeError::Empty));
        assert_eq!(normalize("0x"), Err(NormalizeError::Empty));
        assert_eq!(normalize("0xzz"), Err(NormalizeError::InvalidHex));
        assert_eq!(normalize(&"a".repeat(65)), Err(NormalizeError::BadLength(65)));
    }

    #[test]
    fn is_idempotent() {
        for input in [
            "0xDAC17F958D2ee523a2206206994597C13D831ec7",
            "abc",
            "0x000000000000000000000000aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        ] {
            let once = normalize(input).unwrap();
            assert_eq!(normalize(&once).unwrap(), once);
        }
    }
}
