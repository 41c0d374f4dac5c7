//! # Rowgate Batch
//!
//! Bulk CSV import and streaming CSV export on top of `rowgate_core`.
//!
//! This crate provides:
//! - An incremental RFC 4180 CSV reader and field quoting
//! - Row-by-row import where each row is its own retried insert and failures
//!   are collected rather than aborting the import
//! - Export as a lazy stream of CSV lines backed by a storage cursor
//!
//! ## Example
//!
//! ```rust,ignore
//! use rowgate_batch::{BatchProcessor, ImportOptions};
//!
//! let processor = BatchProcessor::new(store, &ServiceConfig::default());
//! let result = processor.import_file("users.csv", &ImportOptions::default()).await?;
//! println!("{} of {} rows inserted", result.inserted, result.total_records);
//!
//! let export = processor.export_csv("users").await?;
//! export.write_to(&mut tokio::io::stdout()).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod csv;
mod error;
mod export;
mod import;
mod processor;

pub use csv::{
    format_record, format_values, quote_field, CsvReader, CsvRecord, DEFAULT_MAX_RECORD_LEN,
};
pub use error::{BatchError, BatchResult, CsvError};
pub use export::ExportStream;
pub use import::{ImportResult, RowError};
pub use processor::{derive_table_name, BatchProcessor, ImportOptions};
