//! Delivery notification capability.

use std::fmt;

use async_trait::async_trait;
use tracing::info;

use crate::models::DigitalKey;

/// A delivered key as handed to the buyer. `Debug` hides the code.
#[derive(Clone, PartialEq, Eq)]
pub struct DeliveredKey {
    pub key_id: i32,
    pub line_item_id: String,
    pub product_id: String,
    pub code: String,
    pub platform: String,
    pub region: String,
}

impl DeliveredKey {
    pub fn from_key(line_item_id: &str, key: &DigitalKey) -> Self {
        Self {
            key_id: key.id,
            line_item_id: line_item_id.to_string(),
            product_id: key.product_id.clone(),
            code: key.key_code.clone(),
            platform: key.platform.clone(),
            region: key.region.clone(),
        }
    }
}

impl fmt::Debug for DeliveredKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveredKey")
            .field("key_id", &self.key_id)
            .field("line_item_id", &self.line_item_id)
            .field("product_id", &self.product_id)
            .field("code", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// Everything delivered for one order in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub order_id: String,
    pub customer_id: String,
    pub job_id: i32,
    pub keys: Vec<DeliveredKey>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("delivery notification failed: {0}")]
pub struct NotifyError(pub String);

/// Tells the buyer about their keys. Invoked at least once per delivered key.
#[async_trait]
pub trait DeliveryNotifier: Send + Sync {
    async fn notify(&self, delivery: &Delivery) -> Result<(), NotifyError>;
}

/// Notifier that only writes a log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl DeliveryNotifier for LogNotifier {
    async fn notify(&self, delivery: &Delivery) -> Result<(), NotifyError> {
        info!(
            order_id = %delivery.order_id,
            customer_id = %delivery.customer_id,
            job_id = delivery.job_id,
            keys = delivery.keys.len(),
            "keys ready for delivery"
        );
        Ok(())
    }
}
