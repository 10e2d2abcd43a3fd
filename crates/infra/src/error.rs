//! Infrastructure error model.
//!
//! These are **infrastructure errors** (storage, serialization, cancellation)
//! as opposed to domain errors (validation, invariants), plus the repository
//! error that wraps both for callers.

use thiserror::Error;

use eventstore_core::{AggregateId, DomainError, ValidationErrors};
use eventstore_events::BusError;

/// Failure of a persistence context operation.
///
/// ## Error Categories
///
/// - **Conflict**: a unique key already exists (e.g. an aggregate row
///   inserted twice, or a duplicate log entry id)
/// - **Rejected**: the store refused the batch for another reason (e.g. an
///   update or delete of a row that no longer exists)
/// - **Database**: connectivity or engine failure
/// - **Serialization**: a stored row could not be decoded
/// - **Cancelled**: the caller's cancellation signal fired first
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("batch rejected: {0}")]
    Rejected(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("stored data could not be decoded: {0}")]
    Serialization(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Repository operation error.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The aggregate still carries deferred validation failures; nothing
    /// was staged.
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("{kind} `{id}` not found")]
    NotFound { kind: &'static str, id: AggregateId },

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Changes were committed but an integration event could not be
    /// published; it stays queued for the next `save`.
    #[error("integration event publication failed: {0}")]
    Publish(#[from] BusError),
}

impl RepositoryError {
    pub(crate) fn serialization(err: impl core::fmt::Display) -> Self {
        Self::Serialization(err.to_string())
    }

    /// `true` when the store refused the batch because of a conflicting write.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Persistence(PersistenceError::Conflict(_)))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Persistence(PersistenceError::Cancelled))
    }
}
