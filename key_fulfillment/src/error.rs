//! Error taxonomy shared by the inventory store, job tracker and orchestrator.

use diesel::result::{DatabaseErrorKind, Error as DieselError};

/// Errors surfaced by the fulfillment engine.
///
/// Expected outcomes such as an empty stock are ordinary variants; only
/// [`FulfillmentError::DuplicateAssignment`] and tracker write failures end an
/// orchestration run.
#[derive(Debug, thiserror::Error)]
pub enum FulfillmentError {
    /// No local stock and no provider could supply a key.
    #[error("no keys available for product {product_id}")]
    NoKeysAvailable {
        /// Product that ran dry.
        product_id: String,
    },

    /// Every provider that could have supplied a key failed to answer.
    #[error("provider unavailable for product {product_id}: {reason}")]
    ProviderUnavailable {
        /// Product being fetched.
        product_id: String,
        /// Per-provider failure summary.
        reason: String,
        /// Whether at least one failure was transient (network, timeout, 5xx).
        retryable: bool,
    },

    /// A state change the entity lifecycle does not allow.
    #[error("invalid {entity} transition for id {id}: {from} -> {to}")]
    InvalidTransition {
        /// "key" or "job".
        entity: &'static str,
        /// Row id.
        id: i32,
        /// State observed in the store.
        from: String,
        /// Requested state.
        to: String,
    },

    /// Malformed input, rejected before any store mutation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// One allocation slot resolved to more than one key, or one physical code
    /// was about to be handed out twice. Indicates a store-layer bug.
    #[error("duplicate assignment detected: {detail}")]
    DuplicateAssignment {
        /// What was observed.
        detail: String,
    },

    /// Row does not exist (or is soft-deleted).
    #[error("{entity} {id} not found")]
    NotFound {
        /// "key" or "job".
        entity: &'static str,
        /// Row id.
        id: i32,
    },

    /// A stored value could not be decoded (unknown enum text, bad JSON or timestamp).
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// The job tracker could not record progress; the run was aborted.
    #[error("job tracker write failed for job {job_id}: {source}")]
    Tracker {
        /// Job being tracked.
        job_id: i32,
        /// Underlying tracker error.
        #[source]
        source: Box<FulfillmentError>,
    },

    /// Any other Diesel/SQLite failure.
    #[error(transparent)]
    Database(#[from] DieselError),
}

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, FulfillmentError>;

impl FulfillmentError {
    /// Whether the orchestrator may retry the failed call.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FulfillmentError::ProviderUnavailable {
                retryable: true,
                ..
            }
        )
    }

    /// Whether the error must end the whole orchestration run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FulfillmentError::DuplicateAssignment { .. } | FulfillmentError::Tracker { .. }
        )
    }

    /// Short machine-readable tag, stored in job results.
    pub fn kind(&self) -> &'static str {
        match self {
            FulfillmentError::NoKeysAvailable { .. } => "no_keys_available",
            FulfillmentError::ProviderUnavailable { .. } => "provider_unavailable",
            FulfillmentError::InvalidTransition { .. } => "invalid_transition",
            FulfillmentError::Validation(_) => "validation_error",
            FulfillmentError::DuplicateAssignment { .. } => "duplicate_assignment_violation",
            FulfillmentError::NotFound { .. } => "not_found",
            FulfillmentError::Corrupt(_) => "corrupt_row",
            FulfillmentError::Tracker { .. } => "tracker_failure",
            FulfillmentError::Database(_) => "database_error",
        }
    }
}

/// True when a Diesel error is a UNIQUE constraint violation.
pub(crate) fn is_unique_violation(err: &DieselError) -> bool {
    matches!(
        err,
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_retryable_provider_failures_are_transient() {
        let flaky = FulfillmentError::ProviderUnavailable {
            product_id: "p".into(),
            reason: "kinguin: timed out".into(),
            retryable: true,
        };
        let denied = FulfillmentError::ProviderUnavailable {
            product_id: "p".into(),
            reason: "kinguin: API error (401)".into(),
            retryable: false,
        };
        assert!(flaky.is_transient());
        assert!(!denied.is_transient());
        assert!(
            !FulfillmentError::NoKeysAvailable {
                product_id: "p".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn duplicate_assignment_is_fatal() {
        let dup = FulfillmentError::DuplicateAssignment {
            detail: "slot o-1/li-1/0 has 2 keys".into(),
        };
        assert!(dup.is_fatal());
        assert_eq!(dup.kind(), "duplicate_assignment_violation");
        assert!(!FulfillmentError::Validation("x".into()).is_fatal());
    }
}
