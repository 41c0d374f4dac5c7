//! Error types for batch import and export.

use rowgate_core::{CoreError, Failure, FailureKind};
use thiserror::Error;

/// Result type for batch operations.
pub type BatchResult<T> = Result<T, BatchError>;

/// Errors raised while reading CSV input.
#[derive(Debug, Error)]
pub enum CsvError {
    /// Reading the source failed.
    #[error("failed to read CSV input: {0}")]
    Io(#[from] std::io::Error),

    /// A quoted field was still open at the end of input.
    #[error("unterminated quoted field starting on line {line}")]
    UnterminatedQuote {
        /// Line the record started on.
        line: usize,
    },

    /// A record exceeded the configured size limit.
    #[error("record starting on line {line} exceeds {limit} bytes")]
    RecordTooLarge {
        /// Line the record started on.
        line: usize,
        /// The limit in bytes.
        limit: usize,
    },
}

/// Errors that fail a whole import or export.
///
/// Per-row import failures are not errors; they are collected in the
/// import result.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The upload's file name does not end in `.csv`.
    #[error("not a CSV file: {0:?}")]
    NotCsv(String),

    /// The table name is not a valid identifier.
    #[error("invalid table name: {0}")]
    InvalidTable(#[source] CoreError),

    /// The input has no header line.
    #[error("CSV file is empty")]
    EmptyInput,

    /// The input has a header but no data rows.
    #[error("CSV file has no data rows")]
    NoDataRows,

    /// The header line names an invalid or repeated column.
    #[error("invalid CSV header: {0}")]
    InvalidHeader(String),

    /// The target table does not exist.
    #[error("table '{0}' does not exist")]
    TableNotFound(String),

    /// A storage call failed terminally.
    #[error("{context} failed: {failure}")]
    Storage {
        /// What was being done.
        context: &'static str,
        /// The classified failure.
        failure: Failure,
        /// Attempts the failing call consumed.
        attempts_used: u32,
    },

    /// The CSV input was malformed.
    #[error(transparent)]
    Csv(#[from] CsvError),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Writing export output failed.
    #[error("failed to write export: {0}")]
    Write(#[from] std::io::Error),
}

impl BatchError {
    /// Maps this error onto the caller-facing failure taxonomy.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            BatchError::NotCsv(_)
            | BatchError::InvalidTable(_)
            | BatchError::EmptyInput
            | BatchError::NoDataRows
            | BatchError::InvalidHeader(_)
            | BatchError::Csv(_) => FailureKind::Validation,
            BatchError::TableNotFound(_) => FailureKind::NotFound,
            BatchError::Storage { failure, .. } => failure.kind,
            BatchError::Cancelled => FailureKind::Cancelled,
            BatchError::Write(_) => FailureKind::Unexpected,
        }
    }

    /// Wraps a terminal storage failure; cancellation gets its own variant.
    pub(crate) fn storage(context: &'static str, failure: Failure, attempts_used: u32) -> Self {
        if failure.kind == FailureKind::Cancelled {
            BatchError::Cancelled
        } else {
            BatchError::Storage {
                context,
                failure,
                attempts_used,
            }
        }
    }
}
