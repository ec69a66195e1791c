use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::pricing_rules;

/// Provider value that matches every provider.
pub const ALL_PROVIDERS: &str = "all";

/// A live row of [`crate::schema::pricing_rules`].
///
/// `category_id = None` is a wildcard; `provider = "all"` matches any provider.
/// Price bounds are inclusive minor units.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize)]
#[diesel(table_name = pricing_rules, check_for_backend(diesel::sqlite::Sqlite))]
pub struct PricingRule {
    pub id: i32,
    pub category_id: Option<String>,
    pub category_name: String,
    pub provider: String,
    pub margin_percentage: i32,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub is_active: bool,
    pub priority: i32,
}

/// Insertable rule, also the shape of a `[[rules]]` entry in a rules file.
#[derive(Debug, Clone, PartialEq, Eq, Insertable, Deserialize)]
#[diesel(table_name = pricing_rules)]
#[serde(deny_unknown_fields)]
pub struct NewPricingRule {
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub category_name: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    pub margin_percentage: i32,
    #[serde(default)]
    pub min_price: Option<i64>,
    #[serde(default)]
    pub max_price: Option<i64>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub priority: i32,
}

fn default_provider() -> String {
    ALL_PROVIDERS.to_string()
}

fn default_active() -> bool {
    true
}
