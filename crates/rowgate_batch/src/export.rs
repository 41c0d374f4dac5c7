//! Streaming CSV export.
//!
//! Opening an export takes three calls through the retry executor, each with
//! its own schedule: the table probe, the column listing and the `SelectAll`
//! cursor. With the default schedule opening can therefore take up to three
//! times the single-operation worst case. Rows are never retried one by one;
//! they are pulled from the cursor as the consumer polls, so memory use does
//! not grow with the table.

use crate::csv::{format_record, format_values};
use crate::error::{BatchError, BatchResult};
use crate::processor::BatchProcessor;
use rowgate_core::{CancelToken, Failure, Row, RowStream, StorageResult, Store, Value};
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info};

/// A lazy, single-pass sequence of CSV lines: the header, then one line per
/// row. Lines carry no terminator.
pub struct ExportStream {
    table: String,
    columns: Vec<String>,
    rows: RowStream,
    attempts_used: u32,
    cancel: CancelToken,
    header_sent: bool,
    rows_sent: u64,
    finished: bool,
}

impl ExportStream {
    /// The exported table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Column names, in output order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The header line.
    pub fn header(&self) -> String {
        format_record(&self.columns)
    }

    /// Attempts the opening SELECT consumed.
    pub fn attempts_used(&self) -> u32 {
        self.attempts_used
    }

    /// Data rows yielded so far.
    pub fn rows_sent(&self) -> u64 {
        self.rows_sent
    }

    /// Ends the stream and drops the cursor, returning its connection.
    fn finish(&mut self) {
        self.finished = true;
        self.rows = Box::pin(tokio_stream::empty::<StorageResult<Row>>());
    }

    fn line(&self, row: &Row) -> String {
        format_values(
            self.columns
                .iter()
                .map(|column| row.get(column).unwrap_or(&Value::Null)),
        )
    }

    /// Writes every remaining line to `writer`, each followed by `\n`.
    ///
    /// Returns the number of data rows written.
    pub async fn write_to<W>(mut self, writer: &mut W) -> BatchResult<u64>
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(line) = self.next().await {
            let line = line?;
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        writer.flush().await?;
        debug!(table = %self.table, rows = self.rows_sent, "export written");
        Ok(self.rows_sent)
    }
}

impl Stream for ExportStream {
    type Item = BatchResult<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        if this.cancel.is_cancelled() {
            debug!(table = %this.table, rows = this.rows_sent, "export cancelled");
            this.finish();
            return Poll::Ready(Some(Err(BatchError::Cancelled)));
        }
        if !this.header_sent {
            this.header_sent = true;
            return Poll::Ready(Some(Ok(this.header())));
        }

        match this.rows.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(row))) => {
                this.rows_sent += 1;
                Poll::Ready(Some(Ok(this.line(&row))))
            }
            Poll::Ready(Some(Err(err))) => {
                this.finish();
                Poll::Ready(Some(Err(BatchError::Storage {
                    context: "export",
                    failure: Failure::from_storage(&err),
                    attempts_used: this.attempts_used,
                })))
            }
            Poll::Ready(None) => {
                this.finish();
                info!(table = %this.table, rows = this.rows_sent, "CSV export finished");
                Poll::Ready(None)
            }
        }
    }
}

impl<S: Store + ?Sized> BatchProcessor<S> {
    /// Opens a streaming export of `table`.
    pub async fn export_csv(&self, table: &str) -> BatchResult<ExportStream> {
        self.export_csv_cancellable(table, &CancelToken::new()).await
    }

    /// Opens a streaming export of `table`, observing `cancel` while opening
    /// and between lines.
    pub async fn export_csv_cancellable(
        &self,
        table: &str,
        cancel: &CancelToken,
    ) -> BatchResult<ExportStream> {
        let table = self.table(table)?;
        self.require_table(&table, cancel).await?;
        let columns = self.columns(&table, cancel).await?;
        let op = self
            .builder
            .select_all(table.as_str())
            .map_err(BatchError::InvalidTable)?;

        let store = &*self.store;
        let outcome = self
            .executor
            .run(store, "export", cancel, |conn| store.open_cursor(conn, &op))
            .await;
        let attempts_used = outcome.attempts_used;
        let rows = outcome
            .into_result()
            .map_err(|failure| BatchError::storage("export", failure, attempts_used))?;

        debug!(table = %table, attempts = attempts_used, "export cursor opened");
        Ok(ExportStream {
            table: table.into_string(),
            columns,
            rows,
            attempts_used,
            cancel: cancel.clone(),
            header_sent: false,
            rows_sent: 0,
            finished: false,
        })
    }

    /// Exports `table` into a file at `path`.
    ///
    /// Returns the number of data rows written.
    pub async fn export_file(&self, table: &str, path: impl AsRef<Path>) -> BatchResult<u64> {
        let stream = self.export_csv(table).await?;
        let file = tokio::fs::File::create(path).await?;
        let mut writer = BufWriter::new(file);
        stream.write_to(&mut writer).await
    }
}
