use serde::{Deserialize, Serialize};

use crate::models::{CatalogEntry, ProviderKey, to_minor_units};

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest<'a> {
    pub product_id: &'a str,
    pub qty: u32,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub dispatch_id: String,
    #[serde(default)]
    pub keys: Vec<KinguinKey>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct KinguinKey {
    pub serial: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub regional_limitations: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct KinguinProduct {
    pub product_id: String,
    pub name: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub regional_limitations: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub qty: u32,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<KinguinProduct>,
    #[serde(default)]
    pub item_count: u32,
}

impl KinguinKey {
    pub fn into_provider_key(self) -> ProviderKey {
        ProviderKey {
            code: self.serial,
            platform: self.platform.unwrap_or_else(|| "unknown".to_string()),
            region: self
                .regional_limitations
                .unwrap_or_else(|| "GLOBAL".to_string()),
        }
    }
}

impl From<KinguinProduct> for CatalogEntry {
    fn from(p: KinguinProduct) -> Self {
        CatalogEntry {
            product_id: p.product_id,
            name: p.name,
            platform: p.platform,
            region: p.regional_limitations,
            price: p.price.map(to_minor_units),
            in_stock: p.qty > 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_response_maps_missing_region_to_global() {
        let body = r#"{
            "dispatchId": "d-77",
            "keys": [{ "serial": "ABCD-EFGH-IJKL", "platform": "Steam" }]
        }"#;
        let parsed: DispatchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.dispatch_id, "d-77");

        let key = parsed.keys.into_iter().next().unwrap().into_provider_key();
        assert_eq!(key.code, "ABCD-EFGH-IJKL");
        assert_eq!(key.platform, "Steam");
        assert_eq!(key.region, "GLOBAL");
    }

    #[test]
    fn search_results_become_catalog_entries() {
        let body = r#"{
            "results": [
                { "productId": "5c9b5f", "name": "Hollow Knight", "platform": "Steam",
                  "regionalLimitations": "REGION FREE", "price": 7.49, "qty": 12 },
                { "productId": "5c9b60", "name": "Celeste", "qty": 0 }
            ],
            "itemCount": 2
        }"#;
        let parsed: SearchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.item_count, 2);

        let entries: Vec<CatalogEntry> = parsed.results.into_iter().map(Into::into).collect();
        assert_eq!(entries[0].price, Some(749));
        assert!(entries[0].in_stock);
        assert_eq!(entries[1].price, None);
        assert!(!entries[1].in_stock);
    }
}
