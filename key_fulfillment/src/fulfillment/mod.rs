//! Fulfillment Orchestrator: turns an order-placed signal into delivered keys.
//!
//! - [`OrderPlaced`] / [`OrderLineItem`]: the signal, JSON on the wire
//! - [`orchestrator`]: per-unit allocation, job tracking, notification
//! - [`consumer`]: drains a channel of signals
//! - [`notifier`]: the delivery notification capability
//! - [`retry`]: bounded exponential backoff for transient provider failures

pub mod consumer;
pub mod notifier;
pub mod orchestrator;
pub mod retry;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{FulfillmentError, Result};
use crate::models::KeySource;

pub use orchestrator::{FULFILLMENT_JOB_TYPE, FulfillmentOrchestrator, FulfillmentRun};

/// One digital line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderLineItem {
    pub product_id: String,
    #[serde(default)]
    pub variant_id: Option<String>,
    pub quantity: u32,
    pub line_item_id: String,
}

/// "Order placed" signal. Items are already filtered to digital products.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderPlaced {
    pub order_id: String,
    pub customer_id: String,
    pub items: Vec<OrderLineItem>,
}

impl OrderPlaced {
    /// Checks ids, quantities and line item uniqueness.
    pub fn validate(&self) -> Result<()> {
        if self.order_id.trim().is_empty() {
            return Err(FulfillmentError::Validation("order_id must not be empty".into()));
        }
        if self.customer_id.trim().is_empty() {
            return Err(FulfillmentError::Validation("customer_id must not be empty".into()));
        }
        let mut seen = HashSet::new();
        for item in &self.items {
            if item.product_id.trim().is_empty() || item.line_item_id.trim().is_empty() {
                return Err(FulfillmentError::Validation(format!(
                    "order {}: line items need product_id and line_item_id",
                    self.order_id
                )));
            }
            if item.quantity == 0 {
                return Err(FulfillmentError::Validation(format!(
                    "line item {}: quantity must be at least 1",
                    item.line_item_id
                )));
            }
            if !seen.insert(item.line_item_id.as_str()) {
                return Err(FulfillmentError::Validation(format!(
                    "line item {} appears twice",
                    item.line_item_id
                )));
            }
        }
        if i32::try_from(self.total_units()).is_err() {
            return Err(FulfillmentError::Validation(format!(
                "order {} has too many units",
                self.order_id
            )));
        }
        Ok(())
    }

    /// Sum of quantities.
    pub fn total_units(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.quantity)).sum()
    }
}

/// Machine-readable failure of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub kind: String,
    pub message: String,
}

impl From<&FulfillmentError> for ItemError {
    fn from(e: &FulfillmentError) -> Self {
        ItemError {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

/// Outcome of one unit of one line item. Never carries the key code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub line_item_id: String,
    pub product_id: String,
    pub unit: u32,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<KeySource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

/// What a fulfillment job stores as its result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentResult {
    pub order_id: String,
    pub items: Vec<ItemOutcome>,
    pub succeeded: usize,
    pub failed: usize,
}

impl FulfillmentResult {
    pub fn new(order_id: &str, items: Vec<ItemOutcome>) -> Self {
        let succeeded = items.iter().filter(|i| i.success).count();
        Self {
            order_id: order_id.to_string(),
            failed: items.len() - succeeded,
            succeeded,
            items,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}
