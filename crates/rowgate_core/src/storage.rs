//! Contracts for the schema service, the storage executor and their pool.
//!
//! Every storage call takes an owned connection. The retry executor acquires
//! one per attempt and hands it over; the call drops it when it finishes, and
//! a timed-out or cancelled call drops it with its future. A connection is
//! never shared between attempts.

use crate::error::StorageResult;
use crate::ident::Identifier;
use crate::operation::{Operation, OperationKind};
use crate::value::Value;
use async_trait::async_trait;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::pin::Pin;
use tokio_stream::Stream;

/// One result row: `(column, value)` pairs in schema column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    entries: Vec<(String, Value)>,
}

impl Row {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column.
    pub fn push(&mut self, column: impl Into<String>, value: Value) {
        self.entries.push((column.into(), value));
    }

    /// Looks up a column by name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Iterates over `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consumes the row, returning its pairs.
    pub fn into_entries(self) -> Vec<(String, Value)> {
        self.entries
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (column, value) in &self.entries {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// A lazy, forward-only stream of rows.
pub type RowStream = Pin<Box<dyn Stream<Item = StorageResult<Row>> + Send>>;

/// What a successful operation produced.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Rows written or removed.
    Affected {
        /// Number of rows affected.
        rows_affected: u64,
    },
    /// Rows read.
    Rows(Vec<Row>),
}

impl Payload {
    /// Creates an `Affected` payload.
    pub fn affected(rows_affected: u64) -> Self {
        Payload::Affected { rows_affected }
    }

    /// Rows affected, if this is a write result.
    pub fn rows_affected(&self) -> Option<u64> {
        match self {
            Payload::Affected { rows_affected } => Some(*rows_affected),
            Payload::Rows(_) => None,
        }
    }

    /// Rows read, if this is a read result.
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            Payload::Rows(rows) => Some(rows),
            Payload::Affected { .. } => None,
        }
    }
}

/// A shared pool of storage connections.
///
/// The pool has an explicit lifecycle: it is constructed by the embedding
/// application, passed by reference to the executor and batch processor, and
/// torn down by the application. Once torn down, `preflight` fails with
/// `Unavailable`.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// A checked-out connection; dropping it returns it to the pool.
    type Connection: Send + 'static;

    /// Checks that storage can be used at all before any attempt starts.
    async fn preflight(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Checks out a connection for one attempt.
    async fn acquire(&self) -> StorageResult<Self::Connection>;
}

/// Table metadata lookups.
#[async_trait]
pub trait SchemaService: ConnectionPool {
    /// Returns true if the table exists.
    async fn table_exists(&self, conn: Self::Connection, table: &Identifier)
        -> StorageResult<bool>;

    /// Returns the table's column names in schema order.
    async fn list_columns(
        &self,
        conn: Self::Connection,
        table: &Identifier,
    ) -> StorageResult<Vec<String>>;
}

/// Executes single statements.
#[async_trait]
pub trait StorageExecutor: ConnectionPool {
    /// Inserts one row; returns rows affected.
    async fn insert(&self, conn: Self::Connection, op: &Operation) -> StorageResult<u64>;

    /// Reads matching rows into memory.
    async fn select(&self, conn: Self::Connection, op: &Operation) -> StorageResult<Vec<Row>>;

    /// Updates matching rows; returns rows affected.
    async fn update(&self, conn: Self::Connection, op: &Operation) -> StorageResult<u64>;

    /// Deletes matching rows; returns rows affected.
    async fn delete(&self, conn: Self::Connection, op: &Operation) -> StorageResult<u64>;

    /// Opens a lazy cursor over a select. The stream owns the connection
    /// until it is dropped.
    async fn open_cursor(&self, conn: Self::Connection, op: &Operation)
        -> StorageResult<RowStream>;

    /// Dispatches on the operation kind.
    async fn perform(&self, conn: Self::Connection, op: &Operation) -> StorageResult<Payload> {
        match op.kind() {
            OperationKind::Insert => self.insert(conn, op).await.map(Payload::affected),
            OperationKind::SelectAll | OperationKind::SelectFiltered => {
                self.select(conn, op).await.map(Payload::Rows)
            }
            OperationKind::Update => self.update(conn, op).await.map(Payload::affected),
            OperationKind::Delete => self.delete(conn, op).await.map(Payload::affected),
        }
    }
}

/// Everything the data service and batch processor need from storage.
pub trait Store: SchemaService + StorageExecutor {}

impl<T: SchemaService + StorageExecutor + ?Sized> Store for T {}
