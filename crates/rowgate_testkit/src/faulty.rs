//! Fault-injecting store wrapper.
//!
//! `FaultyStore` wraps any [`Store`] and consults a script before each call:
//! the next scripted [`Fault`] decides whether the call hangs, is delayed,
//! fails with a classified error, or passes through to the inner store.
//! Data calls (insert/select/update/delete/cursor) and schema calls
//! (table_exists/list_columns) have separate scripts.

use async_trait::async_trait;
use parking_lot::Mutex;
use rowgate_core::{
    ConnectionPool, Identifier, Operation, Row, RowStream, SchemaService, StorageError,
    StorageExecutor, StorageResult, Store,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;

/// What happens to one storage call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Delegate to the inner store.
    Pass,
    /// Never complete.
    Hang,
    /// Sleep, then delegate.
    Delay(Duration),
    /// Fail with `StorageError::Timeout`.
    Timeout,
    /// Fail with `StorageError::Unavailable`.
    Unavailable,
    /// Fail with `StorageError::ConstraintViolation`.
    Constraint,
    /// Fail with `StorageError::Other`.
    Other,
}

/// Counts connections that have been acquired and not yet dropped.
#[derive(Debug)]
struct Outstanding {
    gauge: Arc<AtomicUsize>,
}

impl Drop for Outstanding {
    fn drop(&mut self) {
        self.gauge.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A connection checked out of a [`FaultyStore`].
#[derive(Debug)]
pub struct FaultyConnection<C> {
    inner: C,
    _outstanding: Outstanding,
}

/// A store wrapper with scripted faults and call accounting.
pub struct FaultyStore<S> {
    inner: S,
    data_script: Mutex<VecDeque<Fault>>,
    schema_script: Mutex<VecDeque<Fault>>,
    data_default: Mutex<Fault>,
    preflight_down: AtomicBool,
    cursor_fail_after: Mutex<Option<usize>>,
    data_calls: AtomicU32,
    schema_calls: AtomicU32,
    acquired: AtomicU32,
    outstanding: Arc<AtomicUsize>,
}

impl<S: Store> FaultyStore<S> {
    /// Wraps `inner`; every call passes until a script is set.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            data_script: Mutex::new(VecDeque::new()),
            schema_script: Mutex::new(VecDeque::new()),
            data_default: Mutex::new(Fault::Pass),
            preflight_down: AtomicBool::new(false),
            cursor_fail_after: Mutex::new(None),
            data_calls: AtomicU32::new(0),
            schema_calls: AtomicU32::new(0),
            acquired: AtomicU32::new(0),
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Queues faults for the next data calls.
    pub fn script<I: IntoIterator<Item = Fault>>(&self, faults: I) {
        self.data_script.lock().extend(faults);
    }

    /// Queues faults for the next schema calls.
    pub fn script_schema<I: IntoIterator<Item = Fault>>(&self, faults: I) {
        self.schema_script.lock().extend(faults);
    }

    /// Fault applied to data calls once the script runs out.
    pub fn set_default(&self, fault: Fault) {
        *self.data_default.lock() = fault;
    }

    /// Makes `preflight` fail with `Unavailable`.
    pub fn fail_preflight(&self, down: bool) {
        self.preflight_down.store(down, Ordering::SeqCst);
    }

    /// Makes cursors fail after yielding `rows` rows.
    pub fn fail_cursor_after(&self, rows: usize) {
        *self.cursor_fail_after.lock() = Some(rows);
    }

    /// Data calls started, including faulted ones.
    pub fn data_calls(&self) -> u32 {
        self.data_calls.load(Ordering::SeqCst)
    }

    /// Schema calls started, including faulted ones.
    pub fn schema_calls(&self) -> u32 {
        self.schema_calls.load(Ordering::SeqCst)
    }

    /// Connections acquired so far.
    pub fn acquired(&self) -> u32 {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Connections acquired and not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    fn next_data_fault(&self) -> Fault {
        self.data_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.data_script.lock().pop_front();
        scripted.unwrap_or_else(|| self.data_default.lock().clone())
    }

    fn next_schema_fault(&self) -> Fault {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        self.schema_script.lock().pop_front().unwrap_or(Fault::Pass)
    }
}

async fn apply(fault: Fault) -> StorageResult<()> {
    match fault {
        Fault::Pass => Ok(()),
        Fault::Hang => std::future::pending().await,
        Fault::Delay(delay) => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
        Fault::Timeout => Err(StorageError::Timeout),
        Fault::Unavailable => Err(StorageError::Unavailable("connection reset".into())),
        Fault::Constraint => Err(StorageError::ConstraintViolation(
            "injected constraint violation".into(),
        )),
        Fault::Other => Err(StorageError::Other("injected failure: secret detail".into())),
    }
}

#[async_trait]
impl<S: Store> ConnectionPool for FaultyStore<S> {
    type Connection = FaultyConnection<S::Connection>;

    async fn preflight(&self) -> StorageResult<()> {
        if self.preflight_down.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected outage".into()));
        }
        self.inner.preflight().await
    }

    async fn acquire(&self) -> StorageResult<Self::Connection> {
        let inner = self.inner.acquire().await?;
        self.acquired.fetch_add(1, Ordering::SeqCst);
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        Ok(FaultyConnection {
            inner,
            _outstanding: Outstanding {
                gauge: self.outstanding.clone(),
            },
        })
    }
}

#[async_trait]
impl<S: Store> SchemaService for FaultyStore<S> {
    async fn table_exists(
        &self,
        conn: Self::Connection,
        table: &Identifier,
    ) -> StorageResult<bool> {
        apply(self.next_schema_fault()).await?;
        let FaultyConnection { inner, _outstanding } = conn;
        self.inner.table_exists(inner, table).await
    }

    async fn list_columns(
        &self,
        conn: Self::Connection,
        table: &Identifier,
    ) -> StorageResult<Vec<String>> {
        apply(self.next_schema_fault()).await?;
        let FaultyConnection { inner, _outstanding } = conn;
        self.inner.list_columns(inner, table).await
    }
}

#[async_trait]
impl<S: Store> StorageExecutor for FaultyStore<S> {
    async fn insert(&self, conn: Self::Connection, op: &Operation) -> StorageResult<u64> {
        apply(self.next_data_fault()).await?;
        let FaultyConnection { inner, _outstanding } = conn;
        self.inner.insert(inner, op).await
    }

    async fn select(&self, conn: Self::Connection, op: &Operation) -> StorageResult<Vec<Row>> {
        apply(self.next_data_fault()).await?;
        let FaultyConnection { inner, _outstanding } = conn;
        self.inner.select(inner, op).await
    }

    async fn update(&self, conn: Self::Connection, op: &Operation) -> StorageResult<u64> {
        apply(self.next_data_fault()).await?;
        let FaultyConnection { inner, _outstanding } = conn;
        self.inner.update(inner, op).await
    }

    async fn delete(&self, conn: Self::Connection, op: &Operation) -> StorageResult<u64> {
        apply(self.next_data_fault()).await?;
        let FaultyConnection { inner, _outstanding } = conn;
        self.inner.delete(inner, op).await
    }

    async fn open_cursor(&self, conn: Self::Connection, op: &Operation) -> StorageResult<RowStream> {
        apply(self.next_data_fault()).await?;
        let FaultyConnection { inner, _outstanding } = conn;
        let rows = self.inner.open_cursor(inner, op).await?;
        let fail_after = *self.cursor_fail_after.lock();
        let mut yielded = 0usize;
        // The closure owns the gauge guard so the connection counts as
        // outstanding until the stream is dropped.
        let guarded = rows.map(move |item| {
            let _held = &_outstanding;
            yielded += 1;
            match fail_after {
                Some(limit) if yielded > limit => {
                    Err(StorageError::Unavailable("cursor interrupted".into()))
                }
                _ => item,
            }
        });
        Ok(Box::pin(guarded))
    }
}
