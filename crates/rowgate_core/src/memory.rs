//! In-memory reference store.
//!
//! `MemoryStore` implements the pool, the schema service and the storage
//! executor with MySQL-like semantics: values are coerced to the column type,
//! unique and not-null constraints are enforced, and an auto-increment
//! integer key is assigned on insert. Connections are semaphore permits, so
//! the pool size bounds concurrent calls.

use crate::config::DEFAULT_POOL_SIZE;
use crate::error::{CoreResult, StorageError, StorageResult};
use crate::ident::Identifier;
use crate::operation::{Operation, OperationKind};
use crate::storage::{ConnectionPool, Row, RowStream, SchemaService, StorageExecutor};
use crate::value::Value;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_stream::Stream;
use tracing::{debug, info};

/// Column storage types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Float,
    /// UTF-8 text.
    Text,
    /// Boolean.
    Bool,
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name.
    pub name: Identifier,
    /// Storage type.
    pub ty: ColumnType,
    /// Whether NULL is accepted.
    pub nullable: bool,
    /// Whether values must be unique (NULLs excepted).
    pub unique: bool,
    /// Whether the store assigns the value on insert.
    pub auto_increment: bool,
}

impl ColumnDef {
    /// Creates a nullable, non-unique column.
    pub fn new(name: &str, ty: ColumnType) -> CoreResult<Self> {
        Ok(Self {
            name: Identifier::parse(name)?,
            ty,
            nullable: true,
            unique: false,
            auto_increment: false,
        })
    }

    /// Creates an auto-increment integer primary key.
    pub fn id(name: &str) -> CoreResult<Self> {
        Ok(Self {
            name: Identifier::parse(name)?,
            ty: ColumnType::Integer,
            nullable: false,
            unique: true,
            auto_increment: true,
        })
    }

    /// Marks the column NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Marks the column UNIQUE.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A table definition: a name and ordered columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub name: Identifier,
    /// Columns in schema order.
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Creates a table with no columns.
    pub fn new(name: &str) -> CoreResult<Self> {
        Ok(Self {
            name: Identifier::parse(name)?,
            columns: Vec::new(),
        })
    }

    /// Appends a column.
    #[must_use]
    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Column names in schema order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| c.name.as_str().to_string())
            .collect()
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.as_str() == column)
    }
}

struct MemoryTable {
    schema: TableSchema,
    rows: BTreeMap<u64, Vec<Value>>,
    next_row_id: u64,
    next_auto: i64,
}

impl MemoryTable {
    fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            next_row_id: 0,
            next_auto: 1,
        }
    }

    fn to_row(&self, values: &[Value]) -> Row {
        self.schema
            .columns
            .iter()
            .zip(values)
            .map(|(column, value)| (column.name.as_str(), value.clone()))
            .collect()
    }

    fn column(&self, name: &Identifier) -> StorageResult<(usize, &ColumnDef)> {
        self.schema
            .position(name.as_str())
            .map(|pos| (pos, &self.schema.columns[pos]))
            .ok_or_else(|| {
                StorageError::Rejected(format!(
                    "unknown column '{}' in table '{}'",
                    name, self.schema.name
                ))
            })
    }

    /// Resolves and coerces `(column, value)` pairs to `(position, value)`.
    fn resolve(&self, entries: &[(Identifier, Value)]) -> StorageResult<Vec<(usize, Value)>> {
        entries
            .iter()
            .map(|(name, value)| {
                let (pos, column) = self.column(name)?;
                Ok((pos, coerce(column, value)?))
            })
            .collect()
    }

    fn resolve_filter(&self, filter: &[(Identifier, Value)]) -> StorageResult<Vec<(usize, Value)>> {
        filter
            .iter()
            .map(|(name, value)| {
                let (pos, column) = self.column(name)?;
                if value.is_null() {
                    Ok((pos, Value::Null))
                } else {
                    Ok((pos, coerce(column, value)?))
                }
            })
            .collect()
    }

    fn matching_ids(&self, filter: &[(usize, Value)]) -> Vec<u64> {
        self.rows
            .iter()
            .filter(|(_, row)| matches(row, filter))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Checks unique columns of `candidate` against every row not in `skip`.
    fn check_unique(&self, candidate: &[Value], skip: &[u64]) -> StorageResult<()> {
        for (pos, column) in self.schema.columns.iter().enumerate() {
            if !column.unique || candidate[pos].is_null() {
                continue;
            }
            let clash = self
                .rows
                .iter()
                .filter(|(id, _)| !skip.contains(id))
                .any(|(_, row)| row[pos] == candidate[pos]);
            if clash {
                return Err(duplicate(column, &candidate[pos]));
            }
        }
        Ok(())
    }
}

fn matches(row: &[Value], filter: &[(usize, Value)]) -> bool {
    filter.iter().all(|(pos, value)| &row[*pos] == value)
}

fn duplicate(column: &ColumnDef, value: &Value) -> StorageError {
    StorageError::ConstraintViolation(format!(
        "duplicate entry '{value}' for key '{}'",
        column.name
    ))
}

/// `i64::MIN` as a float, exactly.
const I64_MIN_F: f64 = -9_223_372_036_854_775_808.0;
/// `2^63`, the first float above `i64::MAX`.
const I64_MAX_EXCLUSIVE_F: f64 = 9_223_372_036_854_775_808.0;

/// Coerces a value to the column type.
///
/// Empty text in a non-text column reads as `Null`, so CSV round trips keep
/// their NULLs.
fn coerce(column: &ColumnDef, value: &Value) -> StorageResult<Value> {
    let rejected = || {
        StorageError::Rejected(format!(
            "incorrect {:?} value '{value}' for column '{}'",
            column.ty, column.name
        ))
    };

    match (column.ty, value) {
        (ColumnType::Integer | ColumnType::Float | ColumnType::Bool, Value::Text(s))
            if s.is_empty() =>
        {
            coerce(column, &Value::Null)
        }
        (_, Value::Null) => {
            if column.nullable || column.auto_increment {
                Ok(Value::Null)
            } else {
                Err(StorageError::ConstraintViolation(format!(
                    "column '{}' cannot be null",
                    column.name
                )))
            }
        }
        (ColumnType::Integer, Value::Integer(i)) => Ok(Value::Integer(*i)),
        (ColumnType::Integer, Value::Bool(b)) => Ok(Value::Integer(i64::from(*b))),
        (ColumnType::Integer, Value::Float(f))
            if f.fract() == 0.0 && *f >= I64_MIN_F && *f < I64_MAX_EXCLUSIVE_F =>
        {
            Ok(Value::Integer(*f as i64))
        }
        (ColumnType::Integer, Value::Text(s)) => {
            s.trim().parse().map(Value::Integer).map_err(|_| rejected())
        }
        (ColumnType::Float, Value::Float(f)) => Ok(Value::Float(*f)),
        (ColumnType::Float, Value::Integer(i)) => Ok(Value::Float(*i as f64)),
        (ColumnType::Float, Value::Text(s)) => {
            s.trim().parse().map(Value::Float).map_err(|_| rejected())
        }
        (ColumnType::Text, Value::Text(s)) => Ok(Value::Text(s.clone())),
        (ColumnType::Text, other) => Ok(Value::Text(other.to_string())),
        (ColumnType::Bool, Value::Bool(b)) => Ok(Value::Bool(*b)),
        (ColumnType::Bool, Value::Integer(0)) => Ok(Value::Bool(false)),
        (ColumnType::Bool, Value::Integer(1)) => Ok(Value::Bool(true)),
        (ColumnType::Bool, Value::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(rejected()),
        },
        _ => Err(rejected()),
    }
}

type Tables = Arc<RwLock<BTreeMap<String, MemoryTable>>>;

/// A checked-out connection; dropping it returns the permit to the pool.
#[derive(Debug)]
pub struct MemoryConnection {
    _permit: OwnedSemaphorePermit,
}

/// In-memory implementation of every storage collaborator.
pub struct MemoryStore {
    tables: Tables,
    permits: Arc<Semaphore>,
    pool_size: usize,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Creates a store with the default pool size.
    pub fn new() -> Self {
        Self::with_pool_size(DEFAULT_POOL_SIZE)
    }

    /// Creates a store with `pool_size` connections.
    pub fn with_pool_size(pool_size: usize) -> Self {
        Self {
            tables: Arc::new(RwLock::new(BTreeMap::new())),
            permits: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            closed: AtomicBool::new(false),
        }
    }

    /// Creates a table.
    pub fn create_table(&self, schema: TableSchema) -> StorageResult<()> {
        let mut tables = self.tables.write();
        let name = schema.name.as_str().to_string();
        if tables.contains_key(&name) {
            return Err(StorageError::Rejected(format!(
                "table '{name}' already exists"
            )));
        }
        info!(table = %name, columns = schema.columns.len(), "created table");
        tables.insert(name, MemoryTable::new(schema));
        Ok(())
    }

    /// Drops a table.
    pub fn drop_table(&self, name: &str) -> StorageResult<()> {
        self.tables
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::TableNotFound {
                table: name.to_string(),
            })
    }

    /// Names of every table.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    /// The schema of a table.
    pub fn schema(&self, name: &str) -> Option<TableSchema> {
        self.tables.read().get(name).map(|t| t.schema.clone())
    }

    /// Number of rows in a table.
    pub fn row_count(&self, name: &str) -> StorageResult<usize> {
        self.tables
            .read()
            .get(name)
            .map(|t| t.rows.len())
            .ok_or_else(|| StorageError::TableNotFound {
                table: name.to_string(),
            })
    }

    /// Every row of a table, in insertion order.
    pub fn rows(&self, name: &str) -> StorageResult<Vec<Row>> {
        let tables = self.tables.read();
        let table = tables.get(name).ok_or_else(|| StorageError::TableNotFound {
            table: name.to_string(),
        })?;
        Ok(table.rows.values().map(|r| table.to_row(r)).collect())
    }

    /// Configured pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Connections currently free.
    pub fn available_connections(&self) -> usize {
        self.permits.available_permits()
    }

    /// Tears the pool down. Later preflights and acquires fail with
    /// `Unavailable`; connections already out stay valid until dropped.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.permits.close();
            info!("memory store closed");
        }
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn with_table<T>(
        &self,
        name: &Identifier,
        f: impl FnOnce(&mut MemoryTable) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(name.as_str())
            .ok_or_else(|| StorageError::TableNotFound {
                table: name.as_str().to_string(),
            })?;
        f(table)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn expect_kind(op: &Operation, kinds: &[OperationKind]) -> StorageResult<()> {
    if kinds.contains(&op.kind()) {
        Ok(())
    } else {
        Err(StorageError::Rejected(format!(
            "{} cannot be executed here",
            op.kind()
        )))
    }
}

#[async_trait]
impl ConnectionPool for MemoryStore {
    type Connection = MemoryConnection;

    async fn preflight(&self) -> StorageResult<()> {
        if self.is_closed() {
            return Err(StorageError::Unavailable("connection pool is closed".into()));
        }
        if self.permits.available_permits() == 0 {
            return Err(StorageError::Unavailable("connection pool exhausted".into()));
        }
        Ok(())
    }

    async fn acquire(&self) -> StorageResult<MemoryConnection> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StorageError::Unavailable("connection pool is closed".into()))?;
        Ok(MemoryConnection { _permit: permit })
    }
}

#[async_trait]
impl SchemaService for MemoryStore {
    async fn table_exists(&self, _conn: MemoryConnection, table: &Identifier) -> StorageResult<bool> {
        Ok(self.tables.read().contains_key(table.as_str()))
    }

    async fn list_columns(
        &self,
        _conn: MemoryConnection,
        table: &Identifier,
    ) -> StorageResult<Vec<String>> {
        self.tables
            .read()
            .get(table.as_str())
            .map(|t| t.schema.column_names())
            .ok_or_else(|| StorageError::TableNotFound {
                table: table.as_str().to_string(),
            })
    }
}

#[async_trait]
impl StorageExecutor for MemoryStore {
    async fn insert(&self, _conn: MemoryConnection, op: &Operation) -> StorageResult<u64> {
        expect_kind(op, &[OperationKind::Insert])?;
        self.with_table(op.table(), |table| {
            let mut row = vec![Value::Null; table.schema.columns.len()];
            let mut provided = vec![false; row.len()];
            for (pos, value) in table.resolve(op.values())? {
                row[pos] = value;
                provided[pos] = true;
            }

            let overflow = || StorageError::Rejected("auto-increment overflow".into());
            let mut next_auto = table.next_auto;
            for (pos, column) in table.schema.columns.iter().enumerate() {
                if column.auto_increment {
                    match row[pos].as_integer() {
                        Some(explicit) => {
                            let after = explicit.checked_add(1).ok_or_else(overflow)?;
                            next_auto = next_auto.max(after);
                        }
                        None => {
                            row[pos] = Value::Integer(next_auto);
                            next_auto = next_auto.checked_add(1).ok_or_else(overflow)?;
                        }
                    }
                } else if !provided[pos] && !column.nullable {
                    return Err(StorageError::ConstraintViolation(format!(
                        "field '{}' doesn't have a default value",
                        column.name
                    )));
                }
            }

            table.check_unique(&row, &[])?;
            table.next_auto = next_auto;
            let id = table.next_row_id;
            table.next_row_id += 1;
            table.rows.insert(id, row);
            debug!(table = %op.table(), "inserted 1 row");
            Ok(1)
        })
    }

    async fn select(&self, _conn: MemoryConnection, op: &Operation) -> StorageResult<Vec<Row>> {
        expect_kind(op, &[OperationKind::SelectAll, OperationKind::SelectFiltered])?;
        let tables = self.tables.read();
        let table = tables
            .get(op.table().as_str())
            .ok_or_else(|| StorageError::TableNotFound {
                table: op.table().as_str().to_string(),
            })?;
        let filter = table.resolve_filter(op.filter())?;
        let rows: Vec<Row> = table
            .rows
            .values()
            .filter(|row| matches(row, &filter))
            .map(|row| table.to_row(row))
            .collect();
        debug!(table = %op.table(), rows = rows.len(), "selected rows");
        Ok(rows)
    }

    async fn update(&self, _conn: MemoryConnection, op: &Operation) -> StorageResult<u64> {
        expect_kind(op, &[OperationKind::Update])?;
        self.with_table(op.table(), |table| {
            let assignments = table.resolve(op.values())?;
            let filter = table.resolve_filter(op.filter())?;
            let ids = table.matching_ids(&filter);

            let mut updated = Vec::with_capacity(ids.len());
            for id in &ids {
                let mut row = table.rows[id].clone();
                for (pos, value) in &assignments {
                    row[*pos] = value.clone();
                }
                table.check_unique(&row, &ids)?;
                updated.push((*id, row));
            }
            for (pos, column) in table.schema.columns.iter().enumerate() {
                if !column.unique {
                    continue;
                }
                for (i, (_, a)) in updated.iter().enumerate() {
                    if a[pos].is_null() {
                        continue;
                    }
                    if updated[i + 1..].iter().any(|(_, b)| b[pos] == a[pos]) {
                        return Err(duplicate(column, &a[pos]));
                    }
                }
            }

            let count = updated.len() as u64;
            for (id, row) in updated {
                table.rows.insert(id, row);
            }
            debug!(table = %op.table(), rows = count, "updated rows");
            Ok(count)
        })
    }

    async fn delete(&self, _conn: MemoryConnection, op: &Operation) -> StorageResult<u64> {
        expect_kind(op, &[OperationKind::Delete])?;
        self.with_table(op.table(), |table| {
            let filter = table.resolve_filter(op.filter())?;
            let ids = table.matching_ids(&filter);
            for id in &ids {
                table.rows.remove(id);
            }
            debug!(table = %op.table(), rows = ids.len(), "deleted rows");
            Ok(ids.len() as u64)
        })
    }

    async fn open_cursor(&self, conn: MemoryConnection, op: &Operation) -> StorageResult<RowStream> {
        expect_kind(op, &[OperationKind::SelectAll, OperationKind::SelectFiltered])?;
        let filter = {
            let tables = self.tables.read();
            let table = tables
                .get(op.table().as_str())
                .ok_or_else(|| StorageError::TableNotFound {
                    table: op.table().as_str().to_string(),
                })?;
            table.resolve_filter(op.filter())?
        };
        Ok(Box::pin(MemoryCursor {
            tables: self.tables.clone(),
            table: op.table().as_str().to_string(),
            filter,
            last_row_id: None,
            done: false,
            _conn: conn,
        }))
    }
}

/// Walks a table one row at a time, taking the read lock per step.
struct MemoryCursor {
    tables: Tables,
    table: String,
    filter: Vec<(usize, Value)>,
    last_row_id: Option<u64>,
    done: bool,
    _conn: MemoryConnection,
}

impl Stream for MemoryCursor {
    type Item = StorageResult<Row>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        let tables = this.tables.read();
        let Some(table) = tables.get(&this.table) else {
            this.done = true;
            return Poll::Ready(Some(Err(StorageError::TableNotFound {
                table: this.table.clone(),
            })));
        };

        let lower = match this.last_row_id {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        let next = table
            .rows
            .range((lower, Bound::Unbounded))
            .find(|(_, row)| matches(row, &this.filter));

        match next {
            Some((id, row)) => {
                this.last_row_id = Some(*id);
                Poll::Ready(Some(Ok(table.to_row(row))))
            }
            None => {
                this.done = true;
                Poll::Ready(None)
            }
        }
    }
}
