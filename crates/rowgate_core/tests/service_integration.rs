//! Integration tests for the data service under storage faults.

use proptest::prelude::*;
use rowgate_core::{
    CancelToken, ConnectionPool, DataService, FailureKind, MemoryStore, Operation,
    OperationBuilder, OperationKind, ServiceConfig, Value,
};
use rowgate_testkit::{
    columns_strategy, identifier_strategy, invalid_identifier_strategy, people_schema,
    users_store, Fault, FaultyStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn service() -> (Arc<FaultyStore<MemoryStore>>, DataService<FaultyStore<MemoryStore>>) {
    let store = Arc::new(FaultyStore::new(users_store()));
    let service = DataService::new(store.clone(), &ServiceConfig::default());
    (store, service)
}

fn name(value: &str) -> Vec<(String, Value)> {
    vec![("name".to_string(), Value::from(value))]
}

#[tokio::test(start_paused = true)]
async fn always_timing_out_uses_whole_schedule() {
    let (store, service) = service();
    store.set_default(Fault::Hang);

    let started = Instant::now();
    let response = service.create("users", name("A")).await;

    assert_eq!(response.failure_kind(), Some(FailureKind::Timeout));
    assert_eq!(response.attempts_used, 4);
    assert_eq!(response.status_code(), 504);
    assert_eq!(started.elapsed(), Duration::from_millis(5800));
    assert_eq!(store.data_calls(), 4);
    assert_eq!(store.outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn success_on_attempt_k_stops_there() {
    for k in 1..=4u32 {
        let (store, service) = service();
        store.script((1..k).map(|_| Fault::Hang));

        let response = service.create("users", name("A")).await;

        assert!(response.is_success(), "attempt {k}");
        assert_eq!(response.attempts_used, k);
        assert_eq!(store.data_calls(), k);
        assert_eq!(store.inner().row_count("users").unwrap(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn schema_probe_is_retried() {
    let (store, service) = service();
    store.script_schema([Fault::Unavailable, Fault::Timeout]);

    let response = service.retrieve("users", vec![]).await;

    assert!(response.is_success());
    assert_eq!(store.schema_calls(), 3);
    assert_eq!(response.attempts_used, 1);
}

#[tokio::test]
async fn preflight_outage_consumes_no_attempt() {
    let (store, service) = service();
    store.fail_preflight(true);

    let response = service.create("users", name("A")).await;

    assert_eq!(response.failure_kind(), Some(FailureKind::Unavailable));
    assert_eq!(response.attempts_used, 0);
    assert_eq!(store.acquired(), 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_pool_fails_fast_without_attempts() {
    let store = Arc::new(MemoryStore::with_pool_size(1));
    store.create_table(people_schema()).unwrap();
    let service = DataService::new(store.clone(), &ServiceConfig::default());
    let held = store.acquire().await.unwrap();

    let started = Instant::now();
    let response = service.retrieve("people", vec![]).await;

    assert_eq!(response.failure_kind(), Some(FailureKind::Unavailable));
    assert_eq!(response.status_code(), 503);
    assert_eq!(response.attempts_used, 0);
    assert_eq!(started.elapsed(), Duration::ZERO);

    drop(held);
    assert!(service.retrieve("people", vec![]).await.is_success());
}

#[tokio::test]
async fn terminal_faults_are_not_retried() {
    let (store, service) = service();
    store.script([Fault::Constraint]);

    let response = service.create("users", name("A")).await;

    assert_eq!(response.failure_kind(), Some(FailureKind::Rejected));
    assert_eq!(response.attempts_used, 1);
    assert_eq!(store.data_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_releases_connection() {
    let (store, service) = service();
    store.set_default(Fault::Hang);
    let service = Arc::new(service);
    let cancel = CancelToken::new();
    let op = Operation::select_all("users").unwrap();

    let task = {
        let service = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { service.execute_cancellable(&op, &cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.outstanding(), 1);
    cancel.cancel();
    let response = task.await.unwrap();

    assert_eq!(response.failure_kind(), Some(FailureKind::Cancelled));
    assert_eq!(response.attempts_used, 1);
    assert_eq!(store.outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_but_in_time_calls_succeed() {
    let (store, service) = service();
    store.script([Fault::Delay(Duration::from_millis(150))]);

    let response = service.create("users", name("A")).await;

    assert!(response.is_success());
    assert_eq!(response.attempts_used, 1);
}

proptest! {
    #[test]
    fn unscoped_mutations_are_always_refused(
        table in identifier_strategy(),
        values in columns_strategy(),
        delete in any::<bool>(),
    ) {
        let kind = if delete { OperationKind::Delete } else { OperationKind::Update };
        let values = if delete { Vec::new() } else { values };
        let err = OperationBuilder::default()
            .build(kind, &table, values, Vec::new())
            .unwrap_err();
        prop_assert!(err.to_string().starts_with("where required"));
    }

    #[test]
    fn bad_table_names_never_reach_storage(table in invalid_identifier_strategy()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (store, service) = service();
        let response = runtime.block_on(service.retrieve(&table, vec![]));
        prop_assert_eq!(response.failure_kind(), Some(FailureKind::Validation));
        prop_assert_eq!(response.attempts_used, 0);
        prop_assert_eq!(store.acquired(), 0);
    }
}
