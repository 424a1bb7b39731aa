//! Compact duration syntax (`30s`, `5m`, `24h`, `7d`)
//!
//! Used by the command line for intervals and TTLs and by the share API for
//! `expires_in`. A bare number is read as seconds.

use std::time::Duration;
use thiserror::Error;

/// Upper bound accepted for any duration (ten years)
const MAX_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("duration is empty")]
    Empty,

    #[error("invalid duration '{0}': expected a positive number followed by s, m, h or d")]
    Invalid(String),

    #[error("duration '{0}' is out of range")]
    OutOfRange(String),
}

pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DurationParseError::Empty);
    }

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);

    let amount: u64 = digits
        .parse()
        .map_err(|_| DurationParseError::Invalid(input.to_string()))?;
    if amount == 0 {
        return Err(DurationParseError::Invalid(input.to_string()));
    }

    let multiplier = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => return Err(DurationParseError::Invalid(input.to_string())),
    };

    let seconds = amount
        .checked_mul(multiplier)
        .filter(|s| *s <= MAX_SECONDS)
        .ok_or_else(|| DurationParseError::OutOfRange(input.to_string()))?;

    Ok(Duration::from_secs(seconds))
}
