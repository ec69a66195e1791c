//! Timestamp helpers.
//!
//! All database writes are RFC-3339 UTC strings with millisecond precision
//! (`2024-03-10T14:30:00.000Z`), which sort lexicographically in time order.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::FulfillmentError;

/// Format a UTC instant the way every timestamp column stores it.
pub fn to_rfc3339_millis(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// RFC-3339 with offset -> UTC.
pub fn parse_ts_to_utc(s: &str) -> Result<DateTime<Utc>, FulfillmentError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FulfillmentError::Corrupt(format!("bad rfc3339 {s:?}: {e}")))
}

/// Optional column variant of [`parse_ts_to_utc`].
pub fn parse_opt(s: Option<&str>) -> Result<Option<DateTime<Utc>>, FulfillmentError> {
    s.map(parse_ts_to_utc).transpose()
}
