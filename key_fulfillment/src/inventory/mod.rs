//! Key Inventory Store.
//!
//! Owns the key lifecycle (`available -> assigned -> delivered`, any -> `revoked`)
//! and the allocation protocol. Exclusivity between concurrent reservers, in
//! this process or another one, rests entirely on the conditioned updates in
//! [`repo`]: a reserver that affects zero rows lost the race and moves on to the
//! next candidate.

pub mod repo;

use std::sync::Arc;
use std::time::Duration;

use diesel::SqliteConnection;
use key_providers::models::ProviderKey;
use key_providers::providers::ProviderError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::error::{FulfillmentError, Result, is_unique_violation};
use crate::models::key::{DigitalKeyRow, NewDigitalKey};
use crate::models::{DigitalKey, KeySource, KeyStatus};
use crate::providers::{ProviderSet, Wholesaler};
use crate::tz::to_rfc3339_millis;
use repo::Slot;

/// One unit to allocate for one order line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveRequest {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub order_id: String,
    pub customer_id: String,
    pub line_item_id: String,
    /// 0-based unit within the line's quantity.
    pub unit: u32,
}

impl ReserveRequest {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("product_id", &self.product_id),
            ("order_id", &self.order_id),
            ("customer_id", &self.customer_id),
            ("line_item_id", &self.line_item_id),
        ] {
            if value.trim().is_empty() {
                return Err(FulfillmentError::Validation(format!("{field} must not be empty")));
            }
        }
        if i32::try_from(self.unit).is_err() {
            return Err(FulfillmentError::Validation(format!(
                "unit {} out of range",
                self.unit
            )));
        }
        Ok(())
    }

    fn slot(&self) -> Slot<'_> {
        Slot {
            order_id: &self.order_id,
            customer_id: &self.customer_id,
            line_item_id: &self.line_item_id,
            // checked in validate
            unit: self.unit as i32,
        }
    }
}

/// A pre-stocked key as found in an import file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StockKey {
    pub key_code: String,
    pub product_id: String,
    #[serde(default)]
    pub variant_id: Option<String>,
    #[serde(default = "local_source")]
    pub provider: KeySource,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub region: String,
}

fn local_source() -> KeySource {
    KeySource::Local
}

/// Outcome of [`KeyInventory::import_keys`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    /// Codes already on file for the same provider.
    pub duplicates: usize,
}

/// Persistent key store with provider fallback.
pub struct KeyInventory {
    providers: ProviderSet,
    provider_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl KeyInventory {
    pub fn new(providers: ProviderSet, provider_timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            providers,
            provider_timeout,
            clock,
        }
    }

    fn now(&self) -> String {
        to_rfc3339_millis(self.clock.now())
    }

    /// Returns the key bound to the request's slot, allocating one if needed.
    ///
    /// Repeating a request returns the same key unchanged. Local stock is tried
    /// first; when none is left each provider is asked in order and the fetched
    /// key is stored as `delivered`.
    #[instrument(
        level = "debug",
        skip(self, conn, req),
        fields(order_id = %req.order_id, line_item_id = %req.line_item_id, unit = req.unit, product_id = %req.product_id)
    )]
    pub async fn reserve(
        &self,
        conn: &mut SqliteConnection,
        req: &ReserveRequest,
    ) -> Result<DigitalKey> {
        req.validate()?;

        if let Some(existing) = self.lookup_slot(conn, req)? {
            debug!(key_id = existing.id, "slot already allocated");
            return Ok(existing);
        }

        let slot = req.slot();
        // Terminates: a lost race means the candidate left `available` for good.
        while let Some(candidate) = repo::next_candidate(conn, &req.product_id)? {
            let now = self.now();
            match repo::cas_assign(conn, candidate.id, &slot, &now) {
                Ok(1) => {
                    info!(key_id = candidate.id, "key assigned from local stock");
                    return self.get_key(conn, candidate.id);
                }
                Ok(_) => {
                    debug!(key_id = candidate.id, "lost allocation race; trying next candidate");
                }
                Err(e) if is_unique_violation(&e) => {
                    // A concurrent reserver took this slot first.
                    return self.slot_winner(conn, req);
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.reserve_from_providers(conn, req).await
    }

    /// assigned -> delivered. Delivering an already delivered key is a no-op.
    #[instrument(level = "debug", skip(self, conn))]
    pub fn deliver(&self, conn: &mut SqliteConnection, key_id: i32) -> Result<DigitalKey> {
        let now = self.now();
        let n = repo::cas_deliver(conn, key_id, &now)?;
        let key = self.get_key(conn, key_id)?;
        if n == 1 {
            info!(key_id, order_id = ?key.order_id, "key delivered");
            return Ok(key);
        }
        match key.status {
            KeyStatus::Delivered => Ok(key),
            other => {
                warn!(key_id, from = %other, "rejected delivery");
                Err(FulfillmentError::InvalidTransition {
                    entity: "key",
                    id: key_id,
                    from: other.to_string(),
                    to: KeyStatus::Delivered.to_string(),
                })
            }
        }
    }

    /// Any state -> revoked, recording the reason and time in the key's metadata.
    /// Revoking a revoked key is a no-op. `order_id` is left as it was.
    #[instrument(level = "debug", skip(self, conn))]
    pub fn revoke(&self, conn: &mut SqliteConnection, key_id: i32, reason: &str) -> Result<DigitalKey> {
        if reason.trim().is_empty() {
            return Err(FulfillmentError::Validation(
                "revocation reason must not be empty".into(),
            ));
        }
        loop {
            let key = self.get_key(conn, key_id)?;
            if key.status == KeyStatus::Revoked {
                return Ok(key);
            }
            let now = self.now();
            let metadata = with_revocation(&key.metadata, reason, &now);
            let n = repo::cas_revoke(conn, key_id, key.status.as_str(), &metadata.to_string(), &now)?;
            if n == 1 {
                info!(key_id, from = %key.status, reason, "key revoked");
                return self.get_key(conn, key_id);
            }
            // status moved between read and write; statuses only move forward
            debug!(key_id, "revoke raced with another transition; re-reading");
        }
    }

    /// Stocks keys as `available`. Codes already on file for the same provider
    /// are counted as duplicates and skipped. Nothing is written if any entry is
    /// malformed.
    pub fn import_keys(&self, conn: &mut SqliteConnection, keys: &[StockKey]) -> Result<ImportSummary> {
        for (i, k) in keys.iter().enumerate() {
            if k.key_code.trim().is_empty() || k.product_id.trim().is_empty() {
                return Err(FulfillmentError::Validation(format!(
                    "entry {i}: key_code and product_id are required"
                )));
            }
        }
        let now = self.now();
        let summary = conn.immediate_transaction::<_, FulfillmentError, _>(|conn| {
            let mut summary = ImportSummary::default();
            for k in keys {
                let row = NewDigitalKey {
                    key_code: &k.key_code,
                    product_id: &k.product_id,
                    variant_id: k.variant_id.as_deref(),
                    provider: k.provider.as_str(),
                    sku: k.sku.as_deref().unwrap_or(k.product_id.as_str()),
                    status: KeyStatus::Available.as_str(),
                    order_id: None,
                    customer_id: None,
                    line_item_id: None,
                    unit_index: None,
                    platform: &k.platform,
                    region: &k.region,
                    metadata: "{}".to_string(),
                    assigned_at: None,
                    delivered_at: None,
                    created_at: now.clone(),
                    updated_at: now.clone(),
                };
                match repo::insert_key_if_new(conn, &row)? {
                    0 => summary.duplicates += 1,
                    _ => summary.inserted += 1,
                }
            }
            Ok(summary)
        })?;
        info!(
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            "imported keys"
        );
        Ok(summary)
    }

    /// Live key by id.
    pub fn get_key(&self, conn: &mut SqliteConnection, key_id: i32) -> Result<DigitalKey> {
        repo::find_by_id(conn, key_id)?
            .ok_or(FulfillmentError::NotFound {
                entity: "key",
                id: key_id,
            })?
            .try_into()
    }

    /// Every live key bound to an order, by line item then unit.
    pub fn keys_for_order(&self, conn: &mut SqliteConnection, order_id: &str) -> Result<Vec<DigitalKey>> {
        repo::for_order(conn, order_id)?
            .into_iter()
            .map(DigitalKey::try_from)
            .collect()
    }

    /// Number of live `available` keys of a product.
    pub fn stock_level(&self, conn: &mut SqliteConnection, product_id: &str) -> Result<i64> {
        Ok(repo::count_available(conn, product_id)?)
    }

    /// Hides a key from every live query. A retired key no longer holds its
    /// allocation slot, so reserving that unit again picks a fresh key.
    pub fn retire(&self, conn: &mut SqliteConnection, key_id: i32) -> Result<()> {
        match repo::soft_delete(conn, key_id, &self.now())? {
            0 => Err(FulfillmentError::NotFound {
                entity: "key",
                id: key_id,
            }),
            _ => Ok(()),
        }
    }

    fn lookup_slot(&self, conn: &mut SqliteConnection, req: &ReserveRequest) -> Result<Option<DigitalKey>> {
        let mut rows = repo::find_slot(conn, &req.slot())?;
        match rows.len() {
            0 => Ok(None),
            1 => {
                let row: DigitalKeyRow = rows.remove(0);
                if row.product_id != req.product_id {
                    return Err(FulfillmentError::Validation(format!(
                        "line item {} unit {} of order {} is already bound to product {}",
                        req.line_item_id, req.unit, req.order_id, row.product_id
                    )));
                }
                Ok(Some(row.try_into()?))
            }
            n => {
                let ids: Vec<i32> = rows.iter().map(|r| r.id).collect();
                error!(?ids, "allocation slot holds {n} keys");
                Err(FulfillmentError::DuplicateAssignment {
                    detail: format!(
                        "order {} line item {} unit {} holds {n} keys {ids:?}",
                        req.order_id, req.line_item_id, req.unit
                    ),
                })
            }
        }
    }

    fn slot_winner(&self, conn: &mut SqliteConnection, req: &ReserveRequest) -> Result<DigitalKey> {
        match self.lookup_slot(conn, req)? {
            Some(winner) => {
                debug!(key_id = winner.id, "concurrent reservation won the slot");
                Ok(winner)
            }
            None => {
                error!("slot constraint fired but no holder is visible");
                Err(FulfillmentError::DuplicateAssignment {
                    detail: format!(
                        "order {} line item {} unit {} conflicted without a visible holder",
                        req.order_id, req.line_item_id, req.unit
                    ),
                })
            }
        }
    }

    async fn reserve_from_providers(
        &self,
        conn: &mut SqliteConnection,
        req: &ReserveRequest,
    ) -> Result<DigitalKey> {
        let mut failures: Vec<String> = Vec::new();
        let mut retryable = false;

        for (id, provider) in self.providers.iter() {
            let fetched =
                tokio::time::timeout(self.provider_timeout, provider.fetch_key(&req.product_id)).await;
            match fetched {
                Ok(Ok(key)) => return self.store_fetched(conn, req, id, key),
                Ok(Err(ProviderError::OutOfStock { .. })) => {
                    debug!(provider = %id, "provider out of stock");
                }
                Ok(Err(e)) => {
                    warn!(provider = %id, error = %e, transient = e.is_transient(), "provider fetch failed");
                    retryable |= e.is_transient();
                    failures.push(format!("{id}: {e}"));
                }
                Err(_) => {
                    warn!(provider = %id, timeout_ms = self.provider_timeout.as_millis() as u64, "provider fetch timed out");
                    retryable = true;
                    failures.push(format!(
                        "{id}: timed out after {}ms",
                        self.provider_timeout.as_millis()
                    ));
                }
            }
        }

        if failures.is_empty() {
            info!("no local stock and no provider could supply a key");
            Err(FulfillmentError::NoKeysAvailable {
                product_id: req.product_id.clone(),
            })
        } else {
            Err(FulfillmentError::ProviderUnavailable {
                product_id: req.product_id.clone(),
                reason: failures.join("; "),
                retryable,
            })
        }
    }

    fn store_fetched(
        &self,
        conn: &mut SqliteConnection,
        req: &ReserveRequest,
        id: Wholesaler,
        key: ProviderKey,
    ) -> Result<DigitalKey> {
        let now = self.now();
        let slot = req.slot();
        let source = KeySource::from(id);
        let row = NewDigitalKey {
            key_code: &key.code,
            product_id: &req.product_id,
            variant_id: req.variant_id.as_deref(),
            provider: source.as_str(),
            sku: &req.product_id,
            status: KeyStatus::Delivered.as_str(),
            order_id: Some(slot.order_id),
            customer_id: Some(slot.customer_id),
            line_item_id: Some(slot.line_item_id),
            unit_index: Some(slot.unit),
            platform: &key.platform,
            region: &key.region,
            metadata: json!({ "fetched_from": source.as_str() }).to_string(),
            assigned_at: Some(now.clone()),
            delivered_at: Some(now.clone()),
            created_at: now.clone(),
            updated_at: now,
        };
        match repo::insert_key(conn, &row) {
            Ok(stored) => {
                info!(key_id = stored.id, provider = %id, "key fetched from provider");
                stored.try_into()
            }
            Err(e) if is_unique_violation(&e) => {
                if let Some(winner) = self.lookup_slot(conn, req)? {
                    // Keep the purchased key: stock it for the next buyer.
                    let spare = NewDigitalKey {
                        status: KeyStatus::Available.as_str(),
                        order_id: None,
                        customer_id: None,
                        line_item_id: None,
                        unit_index: None,
                        metadata: "{}".to_string(),
                        assigned_at: None,
                        delivered_at: None,
                        ..row
                    };
                    let stocked = repo::insert_key_if_new(conn, &spare)?;
                    info!(key_id = winner.id, stocked, provider = %id, "slot won concurrently; fetched key restocked");
                    return Ok(winner);
                }
                error!(provider = %id, "provider returned a key code already on file");
                Err(FulfillmentError::DuplicateAssignment {
                    detail: format!(
                        "{id} returned a key code already on file for product {}",
                        req.product_id
                    ),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn with_revocation(metadata: &Value, reason: &str, now: &str) -> Value {
    let mut map = match metadata {
        Value::Object(m) => m.clone(),
        Value::Null => Map::new(),
        other => {
            let mut m = Map::new();
            m.insert("previous".into(), other.clone());
            m
        }
    };
    map.insert("revocation_reason".into(), Value::String(reason.to_string()));
    map.insert("revoked_at".into(), Value::String(now.to_string()));
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> ReserveRequest {
        ReserveRequest {
            product_id: "p1".into(),
            variant_id: None,
            order_id: "o1".into(),
            customer_id: "c1".into(),
            line_item_id: "li1".into(),
            unit: 0,
        }
    }

    #[test]
    fn validate_rejects_blank_ids() {
        assert!(req().validate().is_ok());
        let mut r = req();
        r.customer_id = "  ".into();
        let err = r.validate().unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(m) if m.contains("customer_id")));
    }

    #[test]
    fn revocation_metadata_keeps_existing_fields() {
        let merged = with_revocation(
            &json!({"batch": "2024-q1"}),
            "refund",
            "2025-01-01T00:00:00.000Z",
        );
        assert_eq!(merged["batch"], "2024-q1");
        assert_eq!(merged["revocation_reason"], "refund");
        assert_eq!(merged["revoked_at"], "2025-01-01T00:00:00.000Z");
    }

    #[test]
    fn stock_key_defaults_to_local() {
        let k: StockKey = serde_json::from_str(r#"{"key_code":"A-B","product_id":"p1"}"#).unwrap();
        assert_eq!(k.provider, KeySource::Local);
        assert!(k.sku.is_none());
    }
}
