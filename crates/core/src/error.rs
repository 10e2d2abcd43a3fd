//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. operation not allowed in the current state).
    #[error("conflict: {0}")]
    Conflict(String),

    /// An event was recorded on an aggregate that never registered a handler
    /// for its kind. This is a wiring bug, not a business condition.
    #[error("there are no handlers registered on `{aggregate}` for event `{kind}`")]
    UnhandledEvent {
        aggregate: &'static str,
        kind: &'static str,
    },
}

impl DomainError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
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

    pub fn unhandled(aggregate: &'static str, kind: &'static str) -> Self {
        Self::UnhandledEvent { aggregate, kind }
    }
}

/// A single business-rule violation.
///
/// Aggregates collect these while a business operation runs and the
/// repository refuses to stage an aggregate that still carries any.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{}", render(.field, .message))]
pub struct ValidationError {
    field: Option<String>,
    message: String,
}

fn render(field: &Option<String>, message: &str) -> String {
    match field {
        Some(field) => format!("{field}: {message}"),
        None => message.to_string(),
    }
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }

    /// A violation attributed to one named member of the aggregate.
    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Every deferred violation carried by an aggregate, surfaced as one error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{} validation error(s): {}", .0.len(), join(.0))]
pub struct ValidationErrors(pub Vec<ValidationError>);

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<ValidationError> {
        self.0
    }
}

impl From<Vec<ValidationError>> for ValidationErrors {
    fn from(value: Vec<ValidationError>) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_renders_field_prefix() {
        let err = ValidationError::for_field("quantity", "must be positive");
        assert_eq!(err.to_string(), "quantity: must be positive");
        assert_eq!(ValidationError::new("no lines").to_string(), "no lines");
    }

    #[test]
    fn aggregated_errors_list_every_violation() {
        let errors = ValidationErrors::from(vec![
            ValidationError::new("first"),
            ValidationError::for_field("second", "broken"),
        ]);

        let rendered = errors.to_string();
        assert!(rendered.starts_with("2 validation error(s)"));
        assert!(rendered.contains("first"));
        assert!(rendered.contains("second: broken"));
    }
}
