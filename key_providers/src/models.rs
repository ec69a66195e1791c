//! Provider-neutral payloads returned by [`crate::providers::KeyProvider`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// A license key acquired from a wholesaler.
///
/// Acquisition is also delivery: once a provider hands out a code it has been
/// paid for and cannot be returned through this interface.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderKey {
    /// The license code itself. Treat as a secret.
    pub code: String,
    /// Activation platform (e.g. "Steam", "GOG").
    pub platform: String,
    /// Region lock (e.g. "GLOBAL", "EU").
    pub region: String,
}

// Keep codes out of logs and panic messages.
impl fmt::Debug for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderKey")
            .field("code", &"<redacted>")
            .field("platform", &self.platform)
            .field("region", &self.region)
            .finish()
    }
}

/// One product in a wholesaler's catalog, used for browsing only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// The wholesaler's product identifier.
    pub product_id: String,
    /// Display name.
    pub name: String,
    /// Activation platform, when the wholesaler reports one.
    pub platform: Option<String>,
    /// Region lock, when the wholesaler reports one.
    pub region: Option<String>,
    /// Wholesale price in minor currency units.
    pub price: Option<i64>,
    /// Whether the wholesaler currently reports stock.
    pub in_stock: bool,
}

/// Convert a decimal major-unit price (e.g. `12.49`) into minor units.
pub fn to_minor_units(major: f64) -> i64 {
    (major * 100.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_code() {
        let key = ProviderKey {
            code: "AAAAA-BBBBB-CCCCC".into(),
            platform: "Steam".into(),
            region: "GLOBAL".into(),
        };
        let printed = format!("{key:?}");
        assert!(!printed.contains("AAAAA"));
        assert!(printed.contains("Steam"));
    }

    #[test]
    fn minor_units_round_half_away() {
        assert_eq!(to_minor_units(12.49), 1249);
        assert_eq!(to_minor_units(0.005), 1);
        assert_eq!(to_minor_units(3.0), 300);
    }
}
