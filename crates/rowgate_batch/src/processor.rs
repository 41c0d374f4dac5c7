//! The batch processor and its shared plumbing.

use crate::csv::DEFAULT_MAX_RECORD_LEN;
use crate::error::{BatchError, BatchResult};
use rowgate_core::{
    CancelToken, Identifier, OperationBuilder, RetryExecutor, ServiceConfig, Store,
};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Options for CSV import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    /// Import empty fields as `Null` instead of empty text.
    pub empty_as_null: bool,
    /// Largest accepted record, in bytes; a bigger one aborts the import.
    pub max_record_len: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            empty_as_null: false,
            max_record_len: DEFAULT_MAX_RECORD_LEN,
        }
    }
}

impl ImportOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether empty fields import as `Null`.
    #[must_use]
    pub fn with_empty_as_null(mut self, empty_as_null: bool) -> Self {
        self.empty_as_null = empty_as_null;
        self
    }

    /// Sets the record size limit.
    #[must_use]
    pub fn with_max_record_len(mut self, limit: usize) -> Self {
        self.max_record_len = limit;
        self
    }
}

/// Derives a table name from an upload's file name.
///
/// The last path component must end in `.csv` (any case); the table name is
/// what precedes the extension. The result still has to pass identifier
/// validation.
pub fn derive_table_name(file_name: &str) -> BatchResult<String> {
    let path = Path::new(file_name);
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if !is_csv {
        return Err(BatchError::NotCsv(file_name.to_string()));
    }
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
        .ok_or_else(|| BatchError::NotCsv(file_name.to_string()))
}

/// Bulk CSV import and streaming CSV export over a shared store.
pub struct BatchProcessor<S: ?Sized> {
    pub(crate) store: Arc<S>,
    pub(crate) executor: RetryExecutor,
    pub(crate) builder: OperationBuilder,
}

impl<S: Store + ?Sized> BatchProcessor<S> {
    /// Creates a processor over `store`.
    pub fn new(store: Arc<S>, config: &ServiceConfig) -> Self {
        Self {
            store,
            executor: RetryExecutor::new(config.retry.clone()),
            builder: config.builder(),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The retry executor in use.
    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    pub(crate) fn table(&self, name: &str) -> BatchResult<Identifier> {
        self.builder.identifier(name).map_err(BatchError::InvalidTable)
    }

    /// Probes that `table` exists, through the retry schedule.
    pub(crate) async fn require_table(
        &self,
        table: &Identifier,
        cancel: &CancelToken,
    ) -> BatchResult<()> {
        let store = &*self.store;
        let outcome = self
            .executor
            .run(store, "table_exists", cancel, |conn| {
                store.table_exists(conn, table)
            })
            .await;
        let attempts = outcome.attempts_used;
        match outcome.into_result() {
            Ok(true) => Ok(()),
            Ok(false) => {
                debug!(table = %table, "table does not exist");
                Err(BatchError::TableNotFound(table.as_str().to_string()))
            }
            Err(failure) => Err(BatchError::storage("table lookup", failure, attempts)),
        }
    }

    /// Lists the columns of `table`, through the retry schedule.
    pub(crate) async fn columns(
        &self,
        table: &Identifier,
        cancel: &CancelToken,
    ) -> BatchResult<Vec<String>> {
        let store = &*self.store;
        let outcome = self
            .executor
            .run(store, "list_columns", cancel, |conn| {
                store.list_columns(conn, table)
            })
            .await;
        let attempts = outcome.attempts_used;
        outcome
            .into_result()
            .map_err(|failure| BatchError::storage("column lookup", failure, attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_from_file_names() {
        assert_eq!(derive_table_name("users.csv").unwrap(), "users");
        assert_eq!(derive_table_name("uploads/people.CSV").unwrap(), "people");
        assert_eq!(derive_table_name("order_items.v2.csv").unwrap(), "order_items.v2");
        assert!(matches!(
            derive_table_name("users.txt"),
            Err(BatchError::NotCsv(_))
        ));
        assert!(matches!(derive_table_name("users"), Err(BatchError::NotCsv(_))));
        assert!(matches!(derive_table_name(".csv"), Err(BatchError::NotCsv(_))));
    }

    #[test]
    fn options_builder() {
        assert!(!ImportOptions::default().empty_as_null);
        assert!(ImportOptions::new().with_empty_as_null(true).empty_as_null);
        assert_eq!(ImportOptions::default().max_record_len, DEFAULT_MAX_RECORD_LEN);
        assert_eq!(ImportOptions::new().with_max_record_len(16).max_record_len, 16);
    }
}
