//! Domain error model for the costing engine.

use thiserror::Error;

use crate::id::AggregateId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every engine operation either returns a new snapshot or fails with one of
/// these, leaving the caller's snapshot untouched. None of them are transient;
/// only `Conflict` is worth retrying, and only after reloading.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Malformed or out-of-range input (negative quantity, NaN rate, unknown stage number).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated (e.g. tenant mismatch).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Outgoing quantity exceeds the stock on hand.
    #[error("insufficient inventory for item {item_id}: required {required}, available {available}")]
    InsufficientInventory {
        item_id: AggregateId,
        required: f64,
        available: f64,
    },

    /// A product's batch queue no longer reconciles with its quantity/value totals.
    #[error("batch queue integrity violated: {0}")]
    QueueIntegrity(String),

    /// No stage record exists for `(mo_id, stage_no)`.
    #[error("stage {stage_no} not found for manufacturing order {mo_id}")]
    StageNotFound { mo_id: AggregateId, stage_no: u16 },

    /// Illegal stage lifecycle move or a posting the stage cannot accept.
    #[error("invalid stage transition: {0}")]
    InvalidStageTransition(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested snapshot was not found.
    #[error("not found")]
    NotFound,

    /// Stale snapshot version (optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn insufficient_inventory(item_id: AggregateId, required: f64, available: f64) -> Self {
        Self::InsufficientInventory {
            item_id,
            required,
            available,
        }
    }

    pub fn queue_integrity(msg: impl Into<String>) -> Self {
        Self::QueueIntegrity(msg.into())
    }

    pub fn stage_not_found(mo_id: AggregateId, stage_no: u16) -> Self {
        Self::StageNotFound { mo_id, stage_no }
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidStageTransition(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// Whether a retry after reloading the snapshot could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Reject NaN/infinite and negative values with a validation error naming `field`.
pub fn ensure_non_negative(field: &str, value: f64) -> DomainResult<()> {
    if !value.is_finite() {
        return Err(DomainError::validation(format!("{field} must be a finite number")));
    }
    if value < 0.0 {
        return Err(DomainError::validation(format!("{field} cannot be negative")));
    }
    Ok(())
}

/// Like [`ensure_non_negative`] but also rejects zero.
pub fn ensure_positive(field: &str, value: f64) -> DomainResult<()> {
    ensure_non_negative(field, value)?;
    if value == 0.0 {
        return Err(DomainError::validation(format!("{field} must be greater than zero")));
    }
    Ok(())
}
