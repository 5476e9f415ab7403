//! Wall-clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
///
/// Returns 0 if the system clock is set before the epoch.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Parse an RFC 3339 timestamp into milliseconds since the Unix epoch.
///
/// Timestamps before the epoch are rejected.
pub fn parse_rfc3339_ms(input: &str) -> Result<u128, String> {
    let parsed = chrono::DateTime::parse_from_rfc3339(input)
        .map_err(|e| format!("invalid timestamp `{input}`: {e}"))?;
    u128::try_from(parsed.timestamp_millis())
        .map_err(|_| format!("timestamp `{input}` is before the epoch"))
}
