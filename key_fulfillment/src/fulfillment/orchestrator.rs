use std::sync::Arc;

use diesel::SqliteConnection;
use serde_json::json;
use tracing::{error, info, instrument, warn};

use super::notifier::{DeliveredKey, Delivery, DeliveryNotifier};
use super::retry::RetryPolicy;
use super::{FulfillmentResult, ItemError, ItemOutcome, OrderPlaced};
use crate::error::{FulfillmentError, Result};
use crate::inventory::{KeyInventory, ReserveRequest};
use crate::jobs::JobTracker;
use crate::models::{BackgroundJob, DigitalKey};

/// Job type of every fulfillment run.
pub const FULFILLMENT_JOB_TYPE: &str = "fulfillment";

/// Final job row plus the per-unit outcomes.
#[derive(Debug, Clone)]
pub struct FulfillmentRun {
    pub job: BackgroundJob,
    pub result: FulfillmentResult,
}

/// Drives one order through allocation, delivery and notification.
///
/// Units are processed one by one; a failed unit is recorded and the run moves
/// on. Already delivered keys stay delivered whatever happens later in the run.
pub struct FulfillmentOrchestrator {
    inventory: KeyInventory,
    jobs: JobTracker,
    notifier: Arc<dyn DeliveryNotifier>,
    retry: RetryPolicy,
}

impl FulfillmentOrchestrator {
    pub fn new(
        inventory: KeyInventory,
        jobs: JobTracker,
        notifier: Arc<dyn DeliveryNotifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inventory,
            jobs,
            notifier,
            retry,
        }
    }

    pub fn inventory(&self) -> &KeyInventory {
        &self.inventory
    }

    pub fn jobs(&self) -> &JobTracker {
        &self.jobs
    }

    /// Validates the signal, records a job carrying it, and runs it.
    #[instrument(level = "info", skip_all, fields(order_id = %signal.order_id))]
    pub async fn fulfill(&self, conn: &mut SqliteConnection, signal: &OrderPlaced) -> Result<FulfillmentRun> {
        signal.validate()?;
        let metadata = json!({
            "order_id": signal.order_id,
            "customer_id": signal.customer_id,
            "signal": signal,
        });
        let job = self.jobs.create(conn, FULFILLMENT_JOB_TYPE, &metadata)?;
        self.run(conn, job.id, signal).await
    }

    /// Runs the order of an earlier fulfillment job again under a new job.
    ///
    /// Units that already hold a key get the same key back; only the missing
    /// ones are allocated. The notifier sees every key again.
    #[instrument(level = "info", skip(self, conn))]
    pub async fn rerun_job(&self, conn: &mut SqliteConnection, job_id: i32) -> Result<FulfillmentRun> {
        let previous = self.jobs.get(conn, job_id)?;
        if previous.job_type != FULFILLMENT_JOB_TYPE {
            return Err(FulfillmentError::Validation(format!(
                "job {job_id} is a {} job, not {FULFILLMENT_JOB_TYPE}",
                previous.job_type
            )));
        }
        let signal: OrderPlaced = serde_json::from_value(previous.metadata["signal"].clone())
            .map_err(|e| FulfillmentError::Corrupt(format!("job {job_id} signal: {e}")))?;
        signal.validate()?;
        let metadata = json!({
            "order_id": signal.order_id,
            "customer_id": signal.customer_id,
            "signal": signal,
            "rerun_of": job_id,
        });
        let job = self.jobs.create(conn, FULFILLMENT_JOB_TYPE, &metadata)?;
        info!(job_id = job.id, rerun_of = job_id, "re-running fulfillment");
        self.run(conn, job.id, &signal).await
    }

    /// Processes `signal` under the existing job `job_id`.
    ///
    /// The job ends `completed` only if every unit got a key and the notifier
    /// accepted the delivery; otherwise `failed` with the partial result.
    pub async fn run(
        &self,
        conn: &mut SqliteConnection,
        job_id: i32,
        signal: &OrderPlaced,
    ) -> Result<FulfillmentRun> {
        let total = i32::try_from(signal.total_units())
            .map_err(|_| FulfillmentError::Validation("too many units".into()))?;

        if let Err(e) = self
            .jobs
            .start(conn, job_id)
            .and_then(|_| self.jobs.update_progress(conn, job_id, 0, total))
        {
            return Err(self.tracker_failure(conn, job_id, e, None));
        }

        let mut items = Vec::with_capacity(total as usize);
        let mut delivered = Vec::new();
        let mut processed = 0;

        for item in &signal.items {
            for unit in 0..item.quantity {
                let req = ReserveRequest {
                    product_id: item.product_id.clone(),
                    variant_id: item.variant_id.clone(),
                    order_id: signal.order_id.clone(),
                    customer_id: signal.customer_id.clone(),
                    line_item_id: item.line_item_id.clone(),
                    unit,
                };
                match self.allocate_unit(conn, &req).await {
                    Ok(key) => {
                        items.push(ItemOutcome {
                            line_item_id: item.line_item_id.clone(),
                            product_id: item.product_id.clone(),
                            unit,
                            success: true,
                            key_id: Some(key.id),
                            provider: Some(key.provider),
                            error: None,
                        });
                        delivered.push(DeliveredKey::from_key(&item.line_item_id, &key));
                    }
                    Err(e) if e.is_fatal() => {
                        error!(job_id, line_item_id = %item.line_item_id, unit, error = %e, "aborting fulfillment run");
                        let partial = FulfillmentResult::new(&signal.order_id, items);
                        if let Err(fail_err) = self.fail_job(conn, job_id, &e.to_string(), &partial) {
                            error!(job_id, error = %fail_err, "could not mark aborted job failed");
                        }
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(job_id, line_item_id = %item.line_item_id, unit, kind = e.kind(), error = %e, "unit not fulfilled");
                        items.push(ItemOutcome {
                            line_item_id: item.line_item_id.clone(),
                            product_id: item.product_id.clone(),
                            unit,
                            success: false,
                            key_id: None,
                            provider: None,
                            error: Some(ItemError::from(&e)),
                        });
                    }
                }
                processed += 1;
                if let Err(e) = self.jobs.update_progress(conn, job_id, processed, total) {
                    let partial = FulfillmentResult::new(&signal.order_id, items);
                    return Err(self.tracker_failure(conn, job_id, e, Some(&partial)));
                }
            }
        }

        let result = FulfillmentResult::new(&signal.order_id, items);
        let mut failure = (!result.all_succeeded())
            .then(|| format!("{} of {} units could not be fulfilled", result.failed, total));

        if !delivered.is_empty() {
            let delivery = Delivery {
                order_id: signal.order_id.clone(),
                customer_id: signal.customer_id.clone(),
                job_id,
                keys: delivered,
            };
            if let Err(e) = self.notifier.notify(&delivery).await {
                warn!(job_id, error = %e, "delivery notification failed; keys stay delivered");
                failure = Some(match failure {
                    Some(f) => format!("{f}; {e}"),
                    None => e.to_string(),
                });
            }
        }

        let finished = match &failure {
            None => self.complete_job(conn, job_id, &result),
            Some(msg) => self.fail_job(conn, job_id, msg, &result),
        };
        let job = finished.map_err(|e| FulfillmentError::Tracker {
            job_id,
            source: Box::new(e),
        })?;
        info!(
            job_id,
            status = %job.status,
            succeeded = result.succeeded,
            failed = result.failed,
            "fulfillment run finished"
        );
        Ok(FulfillmentRun { job, result })
    }

    async fn allocate_unit(&self, conn: &mut SqliteConnection, req: &ReserveRequest) -> Result<DigitalKey> {
        let mut attempt = 1;
        let key = loop {
            match self.inventory.reserve(conn, req).await {
                Ok(key) => break key,
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient allocation failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };
        // no-op for provider keys, which are stored delivered
        self.inventory.deliver(conn, key.id)
    }

    fn complete_job(&self, conn: &mut SqliteConnection, job_id: i32, result: &FulfillmentResult) -> Result<BackgroundJob> {
        let value = serde_json::to_value(result)
            .map_err(|e| FulfillmentError::Corrupt(format!("encoding job result: {e}")))?;
        self.jobs.complete(conn, job_id, &value)
    }

    fn fail_job(
        &self,
        conn: &mut SqliteConnection,
        job_id: i32,
        error: &str,
        result: &FulfillmentResult,
    ) -> Result<BackgroundJob> {
        let value = serde_json::to_value(result)
            .map_err(|e| FulfillmentError::Corrupt(format!("encoding job result: {e}")))?;
        self.jobs.fail(conn, job_id, error, Some(&value))
    }

    fn tracker_failure(
        &self,
        conn: &mut SqliteConnection,
        job_id: i32,
        cause: FulfillmentError,
        partial: Option<&FulfillmentResult>,
    ) -> FulfillmentError {
        error!(job_id, error = %cause, "job tracker write failed; aborting run");
        let message = format!("job tracking failed: {cause}");
        let marked = match partial {
            Some(result) => self.fail_job(conn, job_id, &message, result),
            None => self.jobs.fail(conn, job_id, &message, None),
        };
        if let Err(e) = marked {
            error!(job_id, error = %e, "could not mark job failed");
        }
        FulfillmentError::Tracker {
            job_id,
            source: Box::new(cause),
        }
    }
}
