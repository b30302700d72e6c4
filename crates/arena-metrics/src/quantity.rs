//! Resource quantity parsing.
//!
//! Cluster quantities are a decimal magnitude with an optional unit
//! suffix (`250m`, `24Mi`, `1.5`). CPU values are returned in cores and
//! memory values in bytes.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,

    #[error("malformed quantity: {0:?}")]
    Malformed(String),

    #[error("negative quantity: {0:?}")]
    Negative(String),
}

const CPU_SUFFIXES: &[(&str, f64)] = &[("n", 1e-9), ("u", 1e-6), ("m", 1e-3)];

// Two-letter binary suffixes are checked before the single-letter decimal ones.
const MEMORY_SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1_048_576.0),
    ("Gi", 1_073_741_824.0),
    ("Ti", 1_099_511_627_776.0),
    ("Pi", 1_125_899_906_842_624.0),
    ("Ei", 1_152_921_504_606_846_976.0),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// Parse a CPU quantity into cores.
pub fn parse_cpu(quantity: &str) -> Result<f64, QuantityError> {
    parse_with(quantity, CPU_SUFFIXES)
}

/// Parse a memory quantity into bytes.
pub fn parse_memory(quantity: &str) -> Result<f64, QuantityError> {
    parse_with(quantity, MEMORY_SUFFIXES)
}

fn parse_with(quantity: &str, suffixes: &[(&str, f64)]) -> Result<f64, QuantityError> {
    let trimmed = quantity.trim();
    if trimmed.is_empty() {
        return Err(QuantityError::Empty);
    }

    let (magnitude, scale) = suffixes
        .iter()
        .find_map(|(suffix, scale)| trimmed.strip_suffix(suffix).map(|rest| (rest, *scale)))
        .unwrap_or((trimmed, 1.0));

    let value: f64 = magnitude
        .parse()
        .map_err(|_| QuantityError::Malformed(quantity.to_string()))?;
    if !value.is_finite() {
        return Err(QuantityError::Malformed(quantity.to_string()));
    }
    if value < 0.0 {
        return Err(QuantityError::Negative(quantity.to_string()));
    }
    Ok(value * scale)
}
