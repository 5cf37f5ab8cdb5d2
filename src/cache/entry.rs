//! Cache Entry Module
//!
//! Maps a logical cache key onto its two physical storage rows and decides
//! liveness from the stored expiry instant.

use serde_json::Value;

use crate::cache::{CACHE_PREFIX, TIMESTAMP_PREFIX};

// == Entry Keys ==
/// The physical storage keys backing one logical cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryKeys {
    /// Row holding the cached payload
    pub value: String,
    /// Row holding the absolute expiry instant (Unix milliseconds)
    pub timestamp: String,
}

impl EntryKeys {
    pub fn new(key: &str) -> Self {
        Self {
            value: format!("{CACHE_PREFIX}{key}"),
            timestamp: format!("{TIMESTAMP_PREFIX}{key}"),
        }
    }
}

/// Recovers the logical key from a physical row key owned by the cache.
///
/// Returns `None` for rows outside the cache namespace.
pub fn logical_key(physical: &str) -> Option<&str> {
    physical
        .strip_prefix(CACHE_PREFIX)
        .or_else(|| physical.strip_prefix(TIMESTAMP_PREFIX))
}

// == Expiry Parsing ==
/// Reads an expiry instant from a stored timestamp row.
///
/// JSON numbers are truncated to an integer. Strings are read as an
/// optional sign followed by leading decimal digits, so `"42.9"` is 42 and
/// `"9e15"` is 9. Anything without leading digits is malformed.
pub fn parse_expiry(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => parse_leading_int(s),
        _ => None,
    }
}

/// Saturates instead of failing on overflow.
fn parse_leading_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let digits = rest.bytes().take_while(u8::is_ascii_digit);
    let mut seen = false;
    let mut magnitude: i64 = 0;
    for digit in digits {
        seen = true;
        let digit = i64::from(digit - b'0');
        magnitude = magnitude.saturating_mul(10).saturating_add(digit);
    }

    seen.then(|| if negative { -magnitude } else { magnitude })
}

// == Liveness ==
/// An entry is live only while `now` is strictly before its expiry.
///
/// A missing or malformed expiry is never live.
pub fn is_live(expiry: Option<i64>, now: i64) -> bool {
    matches!(expiry, Some(expires_at) if now < expires_at)
}

/// Remaining lifetime in milliseconds, `0` once expired.
pub fn ttl_remaining_ms(expires_at: i64, now: i64) -> u64 {
    u64::try_from(expires_at.saturating_sub(now)).unwrap_or(0)
}

/// Absolute expiry instant for an entry written at `now` with `ttl_ms`.
pub fn expiry_from(now: i64, ttl_ms: u64) -> i64 {
    now.saturating_add(i64::try_from(ttl_ms).unwrap_or(i64::MAX))
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
