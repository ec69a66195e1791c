//! Diesel models and domain types for the three engine tables.
//!
//! Row structs mirror [`crate::schema`] column-for-column; domain structs decode
//! the text columns (status enums, JSON metadata, RFC-3339 timestamps) once, so
//! the rest of the engine never handles raw strings:
//! - [`key`]: `digital_keys` and the key lifecycle enums
//! - [`job`]: `background_jobs`
//! - [`pricing`]: `pricing_rules`

pub mod job;
pub mod key;
pub mod pricing;

pub use job::{BackgroundJob, JobStatus};
pub use key::{DigitalKey, KeySource, KeyStatus};
pub use pricing::{NewPricingRule, PricingRule};

/// A stored enum column held a value this build does not know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value {value:?}")]
pub struct UnknownVariant {
    /// Column family, e.g. "key status".
    pub kind: &'static str,
    /// Offending text.
    pub value: String,
}

impl From<UnknownVariant> for crate::error::FulfillmentError {
    fn from(e: UnknownVariant) -> Self {
        crate::error::FulfillmentError::Corrupt(e.to_string())
    }
}

pub(crate) fn parse_metadata(raw: &str) -> Result<serde_json::Value, crate::error::FulfillmentError> {
    serde_json::from_str(raw)
        .map_err(|e| crate::error::FulfillmentError::Corrupt(format!("bad metadata json: {e}")))
}
