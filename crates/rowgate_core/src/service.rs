//! Single-record data service.
//!
//! `DataService` is what a transport layer calls: it builds operations from
//! raw column maps, checks the table exists, runs the operation through the
//! retry executor and wraps the outcome in a serializable [`Response`].

use crate::cancel::CancelToken;
use crate::config::ServiceConfig;
use crate::error::{Failure, FailureKind};
use crate::operation::{Operation, OperationBuilder, OperationKind};
use crate::retry::RetryExecutor;
use crate::storage::{Payload, Store};
use crate::value::Value;
use serde::Serialize;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info};

/// Outcome of one data service call.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    /// UTC time the response was produced, RFC 3339.
    pub timestamp: String,
    /// Attempts consumed by the operation (0 if it never reached storage).
    pub attempts_used: u32,
    /// Success payload or failure detail.
    #[serde(flatten)]
    pub status: Status,
}

/// Success or failure body of a [`Response`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Status {
    /// The operation completed.
    Success {
        /// Summary for humans.
        message: String,
        /// Rows read or the affected count.
        data: Payload,
    },
    /// The operation failed terminally.
    Failure {
        /// HTTP-like status code for the failure kind.
        error_code: u16,
        /// Failure category.
        kind: FailureKind,
        /// Failure message.
        message: String,
    },
}

impl Response {
    fn success(attempts_used: u32, message: String, data: Payload) -> Self {
        Self {
            timestamp: now_rfc3339(),
            attempts_used,
            status: Status::Success { message, data },
        }
    }

    fn failure(attempts_used: u32, failure: Failure) -> Self {
        Self {
            timestamp: now_rfc3339(),
            attempts_used,
            status: Status::Failure {
                error_code: failure.kind.status_code(),
                kind: failure.kind,
                message: failure.message,
            },
        }
    }

    /// Returns true if the operation succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self.status, Status::Success { .. })
    }

    /// The failure kind, if the operation failed.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.status {
            Status::Failure { kind, .. } => Some(*kind),
            Status::Success { .. } => None,
        }
    }

    /// The payload, if the operation succeeded.
    pub fn data(&self) -> Option<&Payload> {
        match &self.status {
            Status::Success { data, .. } => Some(data),
            Status::Failure { .. } => None,
        }
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        match &self.status {
            Status::Success { message, .. } | Status::Failure { message, .. } => message,
        }
    }

    /// 200 on success, the failure kind's code otherwise.
    pub fn status_code(&self) -> u16 {
        match &self.status {
            Status::Success { .. } => 200,
            Status::Failure { error_code, .. } => *error_code,
        }
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

fn success_message(kind: OperationKind, payload: &Payload) -> String {
    match (kind, payload) {
        (OperationKind::Insert, _) => "Record inserted successfully".to_string(),
        (_, Payload::Rows(rows)) => format!("Retrieved {} record(s)", rows.len()),
        (OperationKind::Update, Payload::Affected { rows_affected }) => {
            format!("Updated {rows_affected} record(s)")
        }
        (_, Payload::Affected { rows_affected }) => format!("Deleted {rows_affected} record(s)"),
    }
}

/// Builds and executes single operations against a shared store.
pub struct DataService<S: ?Sized> {
    store: Arc<S>,
    executor: RetryExecutor,
    builder: OperationBuilder,
}

impl<S: Store + ?Sized> DataService<S> {
    /// Creates a service over `store`.
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

    /// Executes a built operation.
    pub async fn execute(&self, op: &Operation) -> Response {
        self.execute_cancellable(op, &CancelToken::new()).await
    }

    /// Executes a built operation, observing `cancel`.
    ///
    /// The table is probed first; a missing table fails with `NotFound`
    /// without running the operation. `attempts_used` counts the attempts of
    /// whichever call produced the response.
    pub async fn execute_cancellable(&self, op: &Operation, cancel: &CancelToken) -> Response {
        let store = &*self.store;
        let probe = self
            .executor
            .run(store, "table_exists", cancel, |conn| {
                store.table_exists(conn, op.table())
            })
            .await;

        match probe.result {
            Ok(true) => {}
            Ok(false) => {
                debug!(table = %op.table(), "table does not exist");
                return Response::failure(probe.attempts_used, Failure::not_found(op.table().as_str()));
            }
            Err(failure) => return Response::failure(probe.attempts_used, failure),
        }

        let outcome = self.executor.execute(store, op, cancel).await;
        let attempts = outcome.attempts_used;
        match outcome.result {
            Ok(payload) => {
                let message = success_message(op.kind(), &payload);
                info!(operation = %op.kind(), table = %op.table(), attempts, "{message}");
                Response::success(attempts, message, payload)
            }
            Err(failure) => {
                info!(
                    operation = %op.kind(),
                    table = %op.table(),
                    attempts,
                    kind = %failure.kind,
                    "operation failed"
                );
                Response::failure(attempts, failure)
            }
        }
    }

    /// Inserts one record.
    pub async fn create(&self, table: &str, values: Vec<(String, Value)>) -> Response {
        match self.builder.insert(table, values) {
            Ok(op) => self.execute(&op).await,
            Err(err) => Response::failure(0, err.into()),
        }
    }

    /// Reads records; an empty filter reads the whole table.
    pub async fn retrieve(&self, table: &str, filter: Vec<(String, Value)>) -> Response {
        let op = if filter.is_empty() {
            self.builder.select_all(table)
        } else {
            self.builder.select_filtered(table, filter)
        };
        match op {
            Ok(op) => self.execute(&op).await,
            Err(err) => Response::failure(0, err.into()),
        }
    }

    /// Updates the records matching `filter`.
    pub async fn update(
        &self,
        table: &str,
        values: Vec<(String, Value)>,
        filter: Vec<(String, Value)>,
    ) -> Response {
        match self.builder.update(table, values, filter) {
            Ok(op) => self.execute(&op).await,
            Err(err) => Response::failure(0, err.into()),
        }
    }

    /// Deletes the records matching `filter`.
    pub async fn delete(&self, table: &str, filter: Vec<(String, Value)>) -> Response {
        match self.builder.delete(table, filter) {
            Ok(op) => self.execute(&op).await,
            Err(err) => Response::failure(0, err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ColumnDef, ColumnType, MemoryStore, TableSchema};

    fn service() -> DataService<MemoryStore> {
        let store = MemoryStore::new();
        store
            .create_table(
                TableSchema::new("users")
                    .unwrap()
                    .column(ColumnDef::id("id").unwrap())
                    .column(ColumnDef::new("name", ColumnType::Text).unwrap().not_null())
                    .column(ColumnDef::new("email", ColumnType::Text).unwrap().unique()),
            )
            .unwrap();
        DataService::new(Arc::new(store), &ServiceConfig::default())
    }

    fn cols(pairs: &[(&str, &str)]) -> Vec<(String, Value)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect()
    }

    #[tokio::test]
    async fn crud_round() {
        let service = service();

        let created = service
            .create("users", cols(&[("name", "John"), ("email", "j@x.io")]))
            .await;
        assert!(created.is_success());
        assert_eq!(created.attempts_used, 1);
        assert_eq!(created.message(), "Record inserted successfully");

        let all = service.retrieve("users", vec![]).await;
        assert_eq!(all.data().and_then(Payload::rows).map(<[_]>::len), Some(1));
        assert_eq!(all.message(), "Retrieved 1 record(s)");

        let updated = service
            .update("users", cols(&[("name", "Johnny")]), cols(&[("email", "j@x.io")]))
            .await;
        assert_eq!(updated.data().and_then(Payload::rows_affected), Some(1));

        let deleted = service.delete("users", cols(&[("name", "Johnny")])).await;
        assert_eq!(deleted.data().and_then(Payload::rows_affected), Some(1));
        assert_eq!(service.store().row_count("users").unwrap(), 0);
    }

    #[tokio::test]
    async fn validation_failures_never_reach_storage() {
        let service = service();

        let response = service.delete("users", vec![]).await;
        assert_eq!(response.failure_kind(), Some(FailureKind::Validation));
        assert_eq!(response.attempts_used, 0);
        assert!(response.message().starts_with("where required"));

        let response = service.create("users; DROP TABLE x", cols(&[("name", "a")])).await;
        assert_eq!(response.status_code(), 400);
        assert_eq!(response.attempts_used, 0);
    }

    #[tokio::test]
    async fn missing_table_is_not_found() {
        let service = service();
        let response = service.retrieve("orders", vec![]).await;
        assert_eq!(response.failure_kind(), Some(FailureKind::NotFound));
        assert_eq!(response.status_code(), 404);
    }

    #[tokio::test]
    async fn constraint_violation_is_rejected() {
        let service = service();
        let values = cols(&[("name", "A"), ("email", "a@x.io")]);
        assert!(service.create("users", values.clone()).await.is_success());
        let response = service.create("users", values).await;
        assert_eq!(response.failure_kind(), Some(FailureKind::Rejected));
        assert_eq!(response.attempts_used, 1);
    }

    #[tokio::test]
    async fn closed_store_is_unavailable() {
        let service = service();
        service.store().close();
        let response = service.retrieve("users", vec![]).await;
        assert_eq!(response.failure_kind(), Some(FailureKind::Unavailable));
        assert_eq!(response.attempts_used, 0);
        assert_eq!(response.status_code(), 503);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let service = service();
        let cancel = CancelToken::new();
        cancel.cancel();
        let op = Operation::select_all("users").unwrap();
        let response = service.execute_cancellable(&op, &cancel).await;
        assert_eq!(response.failure_kind(), Some(FailureKind::Cancelled));
        assert_eq!(response.attempts_used, 0);
    }

    #[tokio::test]
    async fn response_json_shape() {
        let service = service();
        let response = service.create("users", cols(&[("name", "A")])).await;
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["attempts_used"], 1);
        assert_eq!(json["data"]["rows_affected"], 1);
        assert!(json["timestamp"].as_str().unwrap().contains('T'));

        let response = service.retrieve("missing", vec![]).await;
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["kind"], "not_found");
        assert_eq!(json["error_code"], 404);
    }
}
