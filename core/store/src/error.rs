//! Typed failures returned by every store operation
//!
//! NotFound, Validation, PermissionDenied and ConfirmationRejected are
//! expected outcomes a caller acts on. Migration is fatal at startup.
//! Operation wraps an unexpected failure raised inside a guarded body.

use memory_vault_schemas::{PermissionLevel, UnknownVariant};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Kinds of record the store hands out, used in errors and guard prompts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Container,
    Knowledge,
    WorkItem,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Container => "container",
            EntityKind::Knowledge => "knowledge item",
            EntityKind::WorkItem => "work item",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// Never carries the record's title or content
    #[error("permission denied: {kind} {id} is {level} and cannot be {action}")]
    PermissionDenied {
        kind: EntityKind,
        id: String,
        level: PermissionLevel,
        action: &'static str,
    },

    #[error("{action} of {kind} {id} was not confirmed: {reason}")]
    ConfirmationRejected {
        kind: EntityKind,
        id: String,
        action: &'static str,
        reason: String,
    },

    #[error("invalid {field}: {message}")]
    Validation {
        field: String,
        message: String,
        accepted: Vec<String>,
    },

    #[error("schema migration failed during {step}: {source}")]
    Migration {
        step: &'static str,
        #[source]
        source: Box<StoreError>,
    },

    #[error("{action} of {kind} {id} failed: {source}")]
    Operation {
        kind: EntityKind,
        id: String,
        action: &'static str,
        #[source]
        source: Box<StoreError>,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// A required text field was empty
    pub fn required(field: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: "must not be empty".to_string(),
            accepted: Vec::new(),
        }
    }

    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.into(),
            accepted: Vec::new(),
        }
    }

    /// Machine-readable code for the command layer
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::ConfirmationRejected { .. } => "CONFIRMATION_REJECTED",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Migration { .. } => "MIGRATION_ERROR",
            Self::Operation { .. } => "OPERATION_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Outcomes a caller is expected to handle rather than report as a fault
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::PermissionDenied { .. }
                | Self::ConfirmationRejected { .. }
                | Self::Validation { .. }
        )
    }

    pub(crate) fn migration(step: &'static str) -> impl FnOnce(StoreError) -> StoreError {
        move |source| match source {
            already @ StoreError::Migration { .. } => already,
            other => StoreError::Migration {
                step,
                source: Box::new(other),
            },
        }
    }
}

impl From<UnknownVariant> for StoreError {
    fn from(err: UnknownVariant) -> Self {
        Self::Validation {
            field: err.field.to_string(),
            message: format!(
                "'{}' is not one of: {}",
                err.value,
                err.accepted.join(", ")
            ),
            accepted: err.accepted.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_vault_schemas::Priority;

    #[test]
    fn test_validation_from_unknown_variant() {
        let err: StoreError = "urgent".parse::<Priority>().unwrap_err().into();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(err.is_expected());
        match err {
            StoreError::Validation {
                field, accepted, ..
            } => {
                assert_eq!(field, "priority");
                assert_eq!(accepted, vec!["low", "medium", "high"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_permission_denied_message_has_no_content() {
        let err = StoreError::PermissionDenied {
            kind: EntityKind::Knowledge,
            id: "mem_1".into(),
            level: PermissionLevel::Locked,
            action: "deleted",
        };
        assert_eq!(
            err.to_string(),
            "permission denied: knowledge item mem_1 is locked and cannot be deleted"
        );
    }

    #[test]
    fn test_migration_wrapping_is_not_nested() {
        let inner = StoreError::migration("identity")(StoreError::required("title"));
        let outer = StoreError::migration("profile")(inner);
        match outer {
            StoreError::Migration { step, .. } => assert_eq!(step, "identity"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!StoreError::migration("x")(StoreError::required("y")).is_expected());
    }
}
