//! Bulk CSV import.
//!
//! Each data record becomes one `Insert`, executed through the retry
//! executor on its own. A row that fails terminally is recorded with its
//! 1-based row index and the import moves on; there is no all-or-nothing
//! mode. A timed-out attempt may still have committed, so rows that needed
//! more than one attempt are flagged rather than assumed written once.

use crate::csv::CsvReader;
use crate::error::{BatchError, BatchResult};
use crate::processor::{derive_table_name, BatchProcessor, ImportOptions};
use rowgate_core::{CancelToken, FailureKind, Identifier, Store, Value};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{debug, info, warn};

/// A row that could not be imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    /// 1-based index of the data row (the header is not counted).
    pub row_index: usize,
    /// Why the row failed.
    pub message: String,
}

/// Summary of an import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportResult {
    /// Target table.
    pub table_name: String,
    /// Data rows processed.
    pub total_records: usize,
    /// Rows inserted.
    pub inserted: usize,
    /// Rows that failed.
    pub failed: usize,
    /// One entry per failed row, in input order.
    pub errors: Vec<RowError>,
    /// Inserted rows whose earlier attempts timed out or lost the
    /// connection. Inserts are not idempotent, so these rows may have been
    /// written more than once.
    pub possibly_duplicated: Vec<usize>,
    /// True if the import stopped early because it was cancelled.
    pub cancelled: bool,
}

impl ImportResult {
    fn new(table_name: &Identifier) -> Self {
        Self {
            table_name: table_name.as_str().to_string(),
            total_records: 0,
            inserted: 0,
            failed: 0,
            errors: Vec::new(),
            possibly_duplicated: Vec::new(),
            cancelled: false,
        }
    }

    fn record_failure(&mut self, row_index: usize, message: String) {
        self.failed += 1;
        self.errors.push(RowError { row_index, message });
    }
}

impl<S: Store + ?Sized> BatchProcessor<S> {
    /// Imports CSV records into `table`.
    pub async fn import_csv<R>(
        &self,
        source: R,
        table: &str,
        options: &ImportOptions,
    ) -> BatchResult<ImportResult>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        self.import_csv_cancellable(source, table, options, &CancelToken::new())
            .await
    }

    /// Imports an upload, deriving the table name from its file name.
    pub async fn import_upload<R>(
        &self,
        source: R,
        file_name: &str,
        options: &ImportOptions,
    ) -> BatchResult<ImportResult>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let table = derive_table_name(file_name)?;
        self.import_csv(source, &table, options).await
    }

    /// Imports a CSV file, deriving the table name from its file name.
    pub async fn import_file(
        &self,
        path: impl AsRef<Path>,
        options: &ImportOptions,
    ) -> BatchResult<ImportResult> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| BatchError::NotCsv(path.display().to_string()))?;
        let table = derive_table_name(file_name)?;
        let file = tokio::fs::File::open(path).await.map_err(|err| BatchError::Csv(err.into()))?;
        self.import_csv(BufReader::new(file), &table, options).await
    }

    /// Imports CSV records into `table`, observing `cancel`.
    ///
    /// Whole-import failures (bad table, missing table, empty input, bad
    /// header, malformed CSV) are errors. Row failures are collected in the
    /// result. On cancellation the partial result comes back with
    /// `cancelled` set.
    pub async fn import_csv_cancellable<R>(
        &self,
        source: R,
        table: &str,
        options: &ImportOptions,
        cancel: &CancelToken,
    ) -> BatchResult<ImportResult>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let table = self.table(table)?;
        self.require_table(&table, cancel).await?;

        let mut reader = CsvReader::new(source).with_max_record_len(options.max_record_len);
        let header = reader.next_record().await?.ok_or(BatchError::EmptyInput)?;
        let columns = self.header_columns(header.fields)?;
        debug!(table = %table, columns = columns.len(), "read CSV header");

        let store = &*self.store;
        let mut result = ImportResult::new(&table);
        let mut row_index = 0usize;

        while let Some(record) = reader.next_record().await? {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            row_index += 1;

            if record.fields.len() != columns.len() {
                result.total_records += 1;
                result.record_failure(
                    row_index,
                    format!(
                        "expected {} fields, found {} (line {})",
                        columns.len(),
                        record.fields.len(),
                        record.line
                    ),
                );
                continue;
            }

            let values = columns
                .iter()
                .cloned()
                .zip(record.fields)
                .map(|(column, field)| {
                    let value = if options.empty_as_null && field.is_empty() {
                        Value::Null
                    } else {
                        Value::Text(field)
                    };
                    (column, value)
                });
            let op = match self.builder.insert(table.as_str(), values) {
                Ok(op) => op,
                Err(err) => {
                    result.total_records += 1;
                    result.record_failure(row_index, err.to_string());
                    continue;
                }
            };

            let outcome = self.executor.execute(store, &op, cancel).await;
            let transient = outcome.transient_failures;
            match outcome.into_result() {
                Ok(_) => {
                    result.total_records += 1;
                    result.inserted += 1;
                    if transient > 0 {
                        warn!(
                            table = %table,
                            row = row_index,
                            transient,
                            "row inserted after an incomplete attempt; it may be duplicated"
                        );
                        result.possibly_duplicated.push(row_index);
                    }
                }
                Err(failure) if failure.kind == FailureKind::Cancelled => {
                    result.cancelled = true;
                    break;
                }
                Err(failure) => {
                    result.total_records += 1;
                    let mut message = failure.message;
                    if transient > 0 {
                        message.push_str(
                            " (an earlier attempt did not complete; the row may have been written)",
                        );
                    }
                    warn!(table = %table, row = row_index, kind = %failure.kind, "row import failed");
                    result.record_failure(row_index, message);
                }
            }
        }

        if result.total_records == 0 && !result.cancelled {
            return Err(BatchError::NoDataRows);
        }

        info!(
            table = %table,
            total = result.total_records,
            inserted = result.inserted,
            failed = result.failed,
            possibly_duplicated = result.possibly_duplicated.len(),
            cancelled = result.cancelled,
            "CSV import finished"
        );
        Ok(result)
    }

    fn header_columns(&self, fields: Vec<String>) -> BatchResult<Vec<String>> {
        let mut seen = HashSet::new();
        fields
            .into_iter()
            .map(|field| {
                let name = field.trim();
                let column = self
                    .builder
                    .identifier(name)
                    .map_err(|err| BatchError::InvalidHeader(err.to_string()))?;
                if !seen.insert(column.as_str().to_string()) {
                    return Err(BatchError::InvalidHeader(format!(
                        "column {name:?} appears more than once"
                    )));
                }
                Ok(column.into_string())
            })
            .collect()
    }
}
