//! Wire-format timestamps shared by every metadata writer.
//!
//! Job documents carry ISO-8601 UTC timestamps with millisecond precision
//! and a `Z` suffix, bit-exact to the JavaScript `toISOString()` convention
//! (`YYYY-MM-DDTHH:mm:ss.sssZ`) so other services can compare them
//! lexicographically.

use chrono::{DateTime, Duration, Utc};

/// How long completed job documents are retained before expiry.
pub const RESULT_RETENTION_DAYS: i64 = 15;

/// Returns the current UTC time in wire format.
#[must_use]
pub fn now_iso8601() -> String {
    to_iso8601(Utc::now())
}

/// Formats a UTC instant in wire format.
#[must_use]
pub fn to_iso8601(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Computes the retention expiry for a terminal timestamp.
///
/// Returns `None` when the input is not a wire-format timestamp; callers
/// treat that as "no expiry" rather than failing the terminal write.
#[must_use]
pub fn expiry_after(completed_at: &str) -> Option<String> {
    let parsed = DateTime::parse_from_rfc3339(completed_at).ok()?;
    let expiry = parsed.with_timezone(&Utc) + Duration::days(RESULT_RETENTION_DAYS);
    Some(to_iso8601(expiry))
}
