//! Quantity parsing for resource amounts.
//!
//! CPU is tracked in millicores (`"500m"`, `"2"`, `"0.5"`); byte amounts
//! accept binary (`Ki`, `Mi`, `Gi`, `Ti`) and decimal (`k`, `M`, `G`, `T`)
//! suffixes. Both forms also deserialize from plain integers, which are
//! taken as already-normalized (millicores / bytes).

use serde::{Deserialize, Deserializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,

    #[error("invalid quantity: {0}")]
    Invalid(String),

    #[error("quantity overflows: {0}")]
    Overflow(String),
}

/// Parse a CPU quantity into millicores.
pub fn parse_cpu(s: &str) -> Result<u64, QuantityError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(QuantityError::Empty);
    }
    if let Some(milli) = s.strip_suffix('m') {
        return milli
            .parse::<u64>()
            .map_err(|_| QuantityError::Invalid(s.to_string()));
    }
    let cores: f64 = s
        .parse()
        .map_err(|_| QuantityError::Invalid(s.to_string()))?;
    if !cores.is_finite() || cores < 0.0 {
        return Err(QuantityError::Invalid(s.to_string()));
    }
    let millis = (cores * 1000.0).round();
    if millis > u64::MAX as f64 {
        return Err(QuantityError::Overflow(s.to_string()));
    }
    Ok(millis as u64)
}

/// Parse a byte quantity such as `"512Mi"` or `"1G"`.
pub fn parse_bytes(s: &str) -> Result<u64, QuantityError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(QuantityError::Empty);
    }

    const SUFFIXES: &[(&str, u64)] = &[
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
    ];

    let (digits, multiplier) = SUFFIXES
        .iter()
        .find_map(|(suffix, mult)| s.strip_suffix(suffix).map(|d| (d, *mult)))
        .unwrap_or((s, 1));

    let value: u64 = digits
        .parse()
        .map_err(|_| QuantityError::Invalid(s.to_string()))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| QuantityError::Overflow(s.to_string()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawQuantity {
    Int(u64),
    Text(String),
}

/// Deserialize a millicore field from an integer or a CPU quantity string.
pub fn deserialize_cpu<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match RawQuantity::deserialize(deserializer)? {
        RawQuantity::Int(v) => Ok(v),
        RawQuantity::Text(s) => parse_cpu(&s).map_err(serde::de::Error::custom),
    }
}

/// Deserialize a byte field from an integer or a byte quantity string.
pub fn deserialize_bytes<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match RawQuantity::deserialize(deserializer)? {
        RawQuantity::Int(v) => Ok(v),
        RawQuantity::Text(s) => parse_bytes(&s).map_err(serde::de::Error::custom),
    }
}
