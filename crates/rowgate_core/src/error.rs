//! Error types for rowgate core.

use crate::operation::OperationKind;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type for validation and construction in core.
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type for calls into the storage collaborator.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised while validating identifiers or building operations.
///
/// Every variant is a validation failure: none of them is ever retried and
/// none of them is produced after a storage call has been made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A table or column name failed identifier validation.
    #[error("invalid identifier {name:?}: {reason}")]
    InvalidIdentifier {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A mutating operation was requested without any condition.
    #[error("where required: {kind} must be scoped by at least one condition")]
    WhereRequired {
        /// The operation kind that was refused.
        kind: OperationKind,
    },

    /// An operation that writes values was requested without any.
    #[error("{kind} requires at least one column value")]
    ValuesRequired {
        /// The operation kind that was refused.
        kind: OperationKind,
    },

    /// A clause was supplied to a kind that does not take it.
    #[error("{kind} does not accept a {clause} clause")]
    UnexpectedClause {
        /// The operation kind.
        kind: OperationKind,
        /// The clause that was supplied (`values` or `where`).
        clause: &'static str,
    },

    /// The same column appeared twice in one clause.
    #[error("duplicate column {column:?} in {clause}")]
    DuplicateColumn {
        /// The repeated column.
        column: String,
        /// The clause it was repeated in.
        clause: &'static str,
    },

    /// A column value could not be represented as a scalar.
    #[error("unsupported value for column {column:?}: {reason}")]
    UnsupportedValue {
        /// The column the value was given for.
        column: String,
        /// Description of the problem.
        reason: String,
    },

    /// A retry schedule was malformed.
    #[error("invalid retry schedule: {0}")]
    InvalidSchedule(String),
}

/// Classified failures reported by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The storage call did not complete in time.
    #[error("storage call timed out")]
    Timeout,

    /// Storage could not be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The addressed table does not exist.
    #[error("table not found: {table}")]
    TableNotFound {
        /// Name of the missing table.
        table: String,
    },

    /// A uniqueness or not-null constraint refused the statement.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The statement was semantically invalid for the target table.
    #[error("statement rejected: {0}")]
    Rejected(String),

    /// Anything the collaborator could not classify.
    #[error("storage failure: {0}")]
    Other(String),
}

impl StorageError {
    /// Returns true if the call may succeed when attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Timeout | StorageError::Unavailable(_))
    }

    /// Maps this error onto the caller-facing failure taxonomy.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            StorageError::Timeout => FailureKind::Timeout,
            StorageError::Unavailable(_) => FailureKind::Unavailable,
            StorageError::TableNotFound { .. } => FailureKind::NotFound,
            StorageError::ConstraintViolation(_) | StorageError::Rejected(_) => {
                FailureKind::Rejected
            }
            StorageError::Other(_) => FailureKind::Unexpected,
        }
    }
}

/// Caller-facing failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Bad identifier, missing condition, or other builder refusal.
    Validation,
    /// The table does not exist.
    NotFound,
    /// Storage refused the statement (constraint or semantic error).
    Rejected,
    /// Storage was unreachable before any attempt started.
    Unavailable,
    /// Every attempt in the schedule failed transiently.
    Timeout,
    /// The caller went away.
    Cancelled,
    /// Anything else.
    Unexpected,
}

impl FailureKind {
    /// HTTP-like status code for transport layers.
    pub fn status_code(self) -> u16 {
        match self {
            FailureKind::Validation | FailureKind::Rejected => 400,
            FailureKind::NotFound => 404,
            FailureKind::Cancelled => 499,
            FailureKind::Unexpected => 500,
            FailureKind::Unavailable => 503,
            FailureKind::Timeout => 504,
        }
    }

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::NotFound => "not_found",
            FailureKind::Rejected => "rejected",
            FailureKind::Unavailable => "unavailable",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified, terminal failure as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{kind}: {message}")]
pub struct Failure {
    /// Failure category.
    pub kind: FailureKind,
    /// Human-readable message, free of internal detail for `Unexpected`.
    pub message: String,
}

impl Failure {
    /// Creates a failure of the given kind.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The caller cancelled the operation.
    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "operation cancelled")
    }

    /// The table does not exist.
    pub fn not_found(table: &str) -> Self {
        Self::new(FailureKind::NotFound, format!("table '{table}' does not exist"))
    }

    /// Classifies a storage error.
    ///
    /// Unclassified errors are reported with a generic message; their detail
    /// only goes to the log.
    pub fn from_storage(err: &StorageError) -> Self {
        match err {
            StorageError::Other(_) => {
                Self::new(FailureKind::Unexpected, "unexpected storage failure")
            }
            other => Self::new(other.failure_kind(), other.to_string()),
        }
    }

    /// Returns true if this is a validation failure.
    pub fn is_validation(&self) -> bool {
        self.kind == FailureKind::Validation
    }
}

impl From<CoreError> for Failure {
    fn from(err: CoreError) -> Self {
        Self::new(FailureKind::Validation, err.to_string())
    }
}
