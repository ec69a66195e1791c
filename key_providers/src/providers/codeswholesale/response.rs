use serde::{Deserialize, Serialize};

use crate::models::{CatalogEntry, ProviderKey, to_minor_units};

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest<'a> {
    pub products: Vec<OrderLine<'a>>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine<'a> {
    pub product_id: &'a str,
    pub quantity: u32,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: String,
    #[serde(default)]
    pub products: Vec<OrderedProduct>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OrderedProduct {
    pub product_id: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub codes: Vec<OrderedCode>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OrderedCode {
    pub code: String,
    /// "CODE_TEXT" for plain keys; image/pre-order codes are not dispensable.
    pub code_type: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CwsProduct {
    pub product_id: String,
    pub name: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub quantity: u32,
    #[serde(default)]
    pub prices: Vec<CwsPrice>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CwsPrice {
    pub value: f64,
    pub from: u32,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProductsPage {
    #[serde(default)]
    pub items: Vec<CwsProduct>,
}

impl OrderResponse {
    /// First plain-text code of the order, with the product's platform/region.
    pub fn first_text_key(self) -> Option<ProviderKey> {
        self.products.into_iter().find_map(|product| {
            let platform = product.platform.unwrap_or_else(|| "unknown".to_string());
            let region = product.region.unwrap_or_else(|| "WORLDWIDE".to_string());
            product
                .codes
                .into_iter()
                .find(|c| c.code_type == "CODE_TEXT")
                .map(|c| ProviderKey {
                    code: c.code,
                    platform,
                    region,
                })
        })
    }
}

impl From<CwsProduct> for CatalogEntry {
    fn from(p: CwsProduct) -> Self {
        // single-unit price tier
        let price = p
            .prices
            .iter()
            .filter(|tier| tier.from <= 1)
            .map(|tier| to_minor_units(tier.value))
            .min();

        CatalogEntry {
            product_id: p.product_id,
            name: p.name,
            platform: p.platform,
            region: p.regions.into_iter().next(),
            price,
            in_stock: p.quantity > 0,
        }
    }
}
