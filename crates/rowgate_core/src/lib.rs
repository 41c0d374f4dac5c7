//! # Rowgate Core
//!
//! Safe single-record access to a relational store.
//!
//! This crate provides:
//! - Identifier validation for table and column names
//! - A closed set of operation kinds with a builder that refuses unscoped
//!   updates and deletes
//! - Parameterized statement rendering for MySQL and PostgreSQL dialects
//! - A fixed-schedule retry executor with per-attempt timeouts and
//!   cooperative cancellation
//! - Storage contracts (`ConnectionPool`, `SchemaService`, `StorageExecutor`)
//!   and an in-memory reference store
//! - A data service that wraps outcomes in serializable responses
//!
//! ## Example
//!
//! ```rust
//! use rowgate_core::{ColumnDef, ColumnType, DataService, MemoryStore, ServiceConfig, TableSchema, Value};
//! use std::sync::Arc;
//!
//! # tokio_test_block(async {
//! let store = MemoryStore::new();
//! store.create_table(
//!     TableSchema::new("users").unwrap()
//!         .column(ColumnDef::id("id").unwrap())
//!         .column(ColumnDef::new("name", ColumnType::Text).unwrap()),
//! ).unwrap();
//!
//! let service = DataService::new(Arc::new(store), &ServiceConfig::default());
//! let response = service
//!     .create("users", vec![("name".to_string(), Value::from("John"))])
//!     .await;
//! assert!(response.is_success());
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f);
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod config;
mod error;
mod ident;
mod memory;
mod operation;
mod retry;
mod service;
mod statement;
mod storage;
mod value;

pub use cancel::CancelToken;
pub use config::{Attempt, RetryConfig, ServiceConfig, DEFAULT_POOL_SIZE, DEFAULT_SCHEDULE_MS};
pub use error::{CoreError, CoreResult, Failure, FailureKind, StorageError, StorageResult};
pub use ident::{validate_identifier, Identifier, DEFAULT_MAX_IDENTIFIER_LEN};
pub use memory::{ColumnDef, ColumnType, MemoryConnection, MemoryStore, TableSchema};
pub use operation::{Operation, OperationBuilder, OperationKind};
pub use retry::{RetryExecutor, RetryOutcome};
pub use service::{DataService, Response, Status};
pub use statement::{Dialect, Statement};
pub use storage::{
    ConnectionPool, Payload, Row, RowStream, SchemaService, StorageExecutor, Store,
};
pub use value::{columns_from_json, Value};
