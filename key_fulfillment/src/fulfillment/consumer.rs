//! Order-signal consumption over a typed channel.
//!
//! Signals may arrive more than once; reservation is idempotent per unit, so a
//! redelivered signal re-uses the keys already bound to its order.

use diesel::SqliteConnection;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info};

use super::{FulfillmentOrchestrator, OrderPlaced};
use crate::models::JobStatus;

/// Counters for one consumer session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub received: usize,
    pub completed: usize,
    /// Runs that finished with a failed job.
    pub failed: usize,
    /// Signals that never produced a finished run (invalid, or aborted).
    pub errored: usize,
}

/// Fulfills every signal received until all senders are dropped.
pub async fn run(
    orchestrator: &FulfillmentOrchestrator,
    conn: &mut SqliteConnection,
    mut signals: mpsc::Receiver<OrderPlaced>,
) -> ConsumerStats {
    let mut stats = ConsumerStats::default();
    while let Some(signal) = signals.recv().await {
        stats.received += 1;
        match orchestrator.fulfill(conn, &signal).await {
            Ok(run) if run.job.status == JobStatus::Completed => stats.completed += 1,
            Ok(_) => stats.failed += 1,
            Err(e) => {
                error!(order_id = %signal.order_id, kind = e.kind(), error = %e, "order signal not processed");
                stats.errored += 1;
            }
        }
    }
    info!(
        received = stats.received,
        completed = stats.completed,
        failed = stats.failed,
        errored = stats.errored,
        "order signal channel closed"
    );
    stats
}
