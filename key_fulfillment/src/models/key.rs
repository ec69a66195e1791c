use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::{UnknownVariant, parse_metadata};
use crate::error::FulfillmentError;
use crate::schema::digital_keys;
use crate::tz::{parse_opt, parse_ts_to_utc};

/// Lifecycle state of a key.
///
/// `available -> assigned -> delivered`, and any state may move to `revoked`.
/// Nothing ever returns to `available`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Available,
    Assigned,
    Delivered,
    Revoked,
}

impl KeyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyStatus::Available => "available",
            KeyStatus::Assigned => "assigned",
            KeyStatus::Delivered => "delivered",
            KeyStatus::Revoked => "revoked",
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(KeyStatus::Available),
            "assigned" => Ok(KeyStatus::Assigned),
            "delivered" => Ok(KeyStatus::Delivered),
            "revoked" => Ok(KeyStatus::Revoked),
            other => Err(UnknownVariant {
                kind: "key status",
                value: other.to_string(),
            }),
        }
    }
}

/// Where a key came from: pre-stocked locally or fetched from a wholesaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeySource {
    Local,
    Kinguin,
    #[serde(rename = "codeswholesale")]
    CodesWholesale,
}

impl KeySource {
    pub fn as_str(self) -> &'static str {
        match self {
            KeySource::Local => "local",
            KeySource::Kinguin => "kinguin",
            KeySource::CodesWholesale => "codeswholesale",
        }
    }
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeySource {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(KeySource::Local),
            "kinguin" => Ok(KeySource::Kinguin),
            "codeswholesale" => Ok(KeySource::CodesWholesale),
            other => Err(UnknownVariant {
                kind: "key provider",
                value: other.to_string(),
            }),
        }
    }
}

/// Raw row of [`crate::schema::digital_keys`].
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = digital_keys, check_for_backend(diesel::sqlite::Sqlite))]
pub struct DigitalKeyRow {
    pub id: i32,
    pub key_code: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub provider: String,
    pub sku: String,
    pub status: String,
    pub order_id: Option<String>,
    pub customer_id: Option<String>,
    pub line_item_id: Option<String>,
    pub unit_index: Option<i32>,
    pub platform: String,
    pub region: String,
    pub metadata: String,
    pub assigned_at: Option<String>,
    pub delivered_at: Option<String>,
    pub revoked_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

/// Insertable form used by stock imports and provider-fetched keys.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = digital_keys)]
pub struct NewDigitalKey<'a> {
    pub key_code: &'a str,
    pub product_id: &'a str,
    pub variant_id: Option<&'a str>,
    pub provider: &'a str,
    pub sku: &'a str,
    pub status: &'a str,
    pub order_id: Option<&'a str>,
    pub customer_id: Option<&'a str>,
    pub line_item_id: Option<&'a str>,
    pub unit_index: Option<i32>,
    pub platform: &'a str,
    pub region: &'a str,
    pub metadata: String,
    pub assigned_at: Option<String>,
    pub delivered_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A key with its columns decoded.
///
/// `Debug` never prints `key_code`.
#[derive(Clone, PartialEq)]
pub struct DigitalKey {
    pub id: i32,
    pub key_code: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub provider: KeySource,
    pub sku: String,
    pub status: KeyStatus,
    pub order_id: Option<String>,
    pub customer_id: Option<String>,
    pub line_item_id: Option<String>,
    pub unit_index: Option<i32>,
    pub platform: String,
    pub region: String,
    pub metadata: serde_json::Value,
    pub assigned_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for DigitalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigitalKey")
            .field("id", &self.id)
            .field("key_code", &"<redacted>")
            .field("product_id", &self.product_id)
            .field("provider", &self.provider)
            .field("status", &self.status)
            .field("order_id", &self.order_id)
            .field("line_item_id", &self.line_item_id)
            .field("unit_index", &self.unit_index)
            .finish_non_exhaustive()
    }
}

impl TryFrom<DigitalKeyRow> for DigitalKey {
    type Error = FulfillmentError;

    fn try_from(row: DigitalKeyRow) -> Result<Self, Self::Error> {
        Ok(DigitalKey {
            id: row.id,
            provider: row.provider.parse()?,
            status: row.status.parse()?,
            metadata: parse_metadata(&row.metadata)?,
            assigned_at: parse_opt(row.assigned_at.as_deref())?,
            delivered_at: parse_opt(row.delivered_at.as_deref())?,
            revoked_at: parse_opt(row.revoked_at.as_deref())?,
            created_at: parse_ts_to_utc(&row.created_at)?,
            updated_at: parse_ts_to_utc(&row.updated_at)?,
            key_code: row.key_code,
            product_id: row.product_id,
            variant_id: row.variant_id,
            sku: row.sku,
            order_id: row.order_id,
            customer_id: row.customer_id,
            line_item_id: row.line_item_id,
            unit_index: row.unit_index,
            platform: row.platform,
            region: row.region,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str) -> DigitalKeyRow {
        DigitalKeyRow {
            id: 7,
            key_code: "AAAA-BBBB-CCCC".into(),
            product_id: "p1".into(),
            variant_id: None,
            provider: "local".into(),
            sku: "SKU-1".into(),
            status: status.into(),
            order_id: None,
            customer_id: None,
            line_item_id: None,
            unit_index: None,
            platform: "steam".into(),
            region: "EU".into(),
            metadata: "{}".into(),
            assigned_at: None,
            delivered_at: None,
            revoked_at: None,
            created_at: "2025-01-01T00:00:00.000Z".into(),
            updated_at: "2025-01-01T00:00:00.000Z".into(),
            deleted_at: None,
        }
    }

    #[test]
    fn decodes_row_and_hides_code() {
        let key = DigitalKey::try_from(row("available")).unwrap();
        assert_eq!(key.status, KeyStatus::Available);
        assert_eq!(key.provider, KeySource::Local);
        let dbg = format!("{key:?}");
        assert!(!dbg.contains("AAAA-BBBB-CCCC"));
    }

    #[test]
    fn unknown_status_is_corrupt() {
        let err = DigitalKey::try_from(row("lost")).unwrap_err();
        assert!(matches!(err, FulfillmentError::Corrupt(_)));
    }

    #[test]
    fn source_serde_names_match_columns() {
        for s in [KeySource::Local, KeySource::Kinguin, KeySource::CodesWholesale] {
            let json = serde_json::to_string(&s).unwrap();
            assert_eq!(json, format!("\"{}\"", s.as_str()));
            assert_eq!(s.as_str().parse::<KeySource>().unwrap(), s);
        }
    }
}
