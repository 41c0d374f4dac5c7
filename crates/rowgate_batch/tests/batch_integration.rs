//! Integration tests for CSV import and export under storage faults.

use proptest::prelude::*;
use rowgate_batch::{BatchError, BatchProcessor, ImportOptions};
use rowgate_core::{CancelToken, FailureKind, MemoryStore, ServiceConfig, Value};
use rowgate_testkit::{
    people_schema, people_schema_named, person_rows_strategy, seeded_people_store, temp_csv,
    users_store, Fault, FaultyStore, PEOPLE_CSV, USERS_CSV_WITH_DUPLICATE,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;

fn faulty_users() -> Arc<FaultyStore<MemoryStore>> {
    Arc::new(FaultyStore::new(users_store()))
}

async fn collect_lines(processor: &BatchProcessor<impl rowgate_core::Store>, table: &str) -> Vec<String> {
    processor
        .export_csv(table)
        .await
        .unwrap()
        .map(|line| line.unwrap())
        .collect()
        .await
}

#[tokio::test(start_paused = true)]
async fn import_recovers_from_transient_faults() {
    let store = faulty_users();
    // Row 1: one timeout then success. Row 2: duplicate. Row 3: unavailable then success.
    store.script([Fault::Timeout, Fault::Pass, Fault::Pass, Fault::Unavailable, Fault::Pass]);
    let processor = BatchProcessor::new(store.clone(), &ServiceConfig::default());

    let result = processor
        .import_csv(USERS_CSV_WITH_DUPLICATE.as_bytes(), "users", &ImportOptions::default())
        .await
        .unwrap();

    assert_eq!(result.total_records, 3);
    assert_eq!(result.inserted, 2);
    assert_eq!(result.failed, 1);
    assert_eq!(result.errors[0].row_index, 2);
    assert_eq!(result.possibly_duplicated, vec![1, 3]);
    assert_eq!(store.data_calls(), 5);
    assert_eq!(store.outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn a_row_that_always_times_out_is_one_error() {
    let store = faulty_users();
    store.script([Fault::Pass, Fault::Hang, Fault::Hang, Fault::Hang, Fault::Hang]);
    let processor = BatchProcessor::new(store.clone(), &ServiceConfig::default());

    let csv = "name,email\nA,a@x.io\nB,b@x.io\nC,c@x.io\n";
    let result = processor
        .import_csv(csv.as_bytes(), "users", &ImportOptions::default())
        .await
        .unwrap();

    assert_eq!(result.inserted, 2);
    assert_eq!(result.failed, 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].row_index, 2);
    assert!(result.errors[0].message.contains("timed out after 4 attempts"));
    assert!(result.errors[0].message.ends_with("the row may have been written)"));
    assert!(result.possibly_duplicated.is_empty());
    assert_eq!(store.outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn rejection_after_a_timeout_is_flagged() {
    let store = faulty_users();
    store.script([Fault::Timeout, Fault::Constraint]);
    let processor = BatchProcessor::new(store.clone(), &ServiceConfig::default());

    let result = processor
        .import_csv("name
A
".as_bytes(), "users", &ImportOptions::default())
        .await
        .unwrap();

    assert_eq!(result.failed, 1);
    assert!(result.errors[0].message.ends_with("the row may have been written)"));
}

#[tokio::test]
async fn first_try_failures_are_not_flagged() {
    let store = faulty_users();
    store.script([Fault::Constraint]);
    let processor = BatchProcessor::new(store, &ServiceConfig::default());
    let result = processor
        .import_csv("name
A
".as_bytes(), "users", &ImportOptions::default())
        .await
        .unwrap();
    assert!(!result.errors[0].message.contains("may have been written"));
    assert!(result.possibly_duplicated.is_empty());
}

#[tokio::test]
async fn unexpected_row_failures_hide_detail() {
    let store = faulty_users();
    store.script([Fault::Other]);
    let processor = BatchProcessor::new(store, &ServiceConfig::default());
    let result = processor
        .import_csv("name\nA\nB\n".as_bytes(), "users", &ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(result.failed, 1);
    assert!(!result.errors[0].message.contains("secret"));
}

#[tokio::test]
async fn import_with_storage_down_fails_before_any_row() {
    let store = faulty_users();
    store.fail_preflight(true);
    let processor = BatchProcessor::new(store.clone(), &ServiceConfig::default());
    let err = processor
        .import_csv("name\nA\n".as_bytes(), "users", &ImportOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.failure_kind(), FailureKind::Unavailable);
    assert!(matches!(err, BatchError::Storage { attempts_used: 0, .. }));
    assert_eq!(store.data_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_import_keeps_partial_result() {
    let store = faulty_users();
    store.script([Fault::Pass, Fault::Hang]);
    let processor = Arc::new(BatchProcessor::new(store.clone(), &ServiceConfig::default()));
    let cancel = CancelToken::new();

    let task = {
        let processor = processor.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            processor
                .import_csv_cancellable(
                    "name\nA\nB\nC\n".as_bytes(),
                    "users",
                    &ImportOptions::default(),
                    &cancel,
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    let result = task.await.unwrap().unwrap();

    assert!(result.cancelled);
    assert_eq!(result.inserted, 1);
    assert_eq!(result.failed, 0);
    assert_eq!(store.inner().row_count("users").unwrap(), 1);
    assert_eq!(store.outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn export_open_is_retried() {
    let store = Arc::new(FaultyStore::new(seeded_people_store().await));
    store.script([Fault::Timeout, Fault::Timeout]);
    let processor = BatchProcessor::new(store.clone(), &ServiceConfig::default());

    let stream = processor.export_csv("people").await.unwrap();
    assert_eq!(stream.attempts_used(), 3);
    let lines: Vec<String> = stream.map(|l| l.unwrap()).collect().await;
    assert_eq!(lines, vec!["id,name,age", "1,John,30", "2,Jane,28"]);
    assert_eq!(store.outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn export_gives_up_after_schedule() {
    let store = Arc::new(FaultyStore::new(seeded_people_store().await));
    store.set_default(Fault::Hang);
    let processor = BatchProcessor::new(store.clone(), &ServiceConfig::default());
    let err = processor.export_csv("people").await.err().unwrap();
    assert_eq!(err.failure_kind(), FailureKind::Timeout);
    assert!(matches!(err, BatchError::Storage { attempts_used: 4, .. }));
    assert_eq!(store.outstanding(), 0);
}

#[tokio::test]
async fn export_failure_mid_stream_ends_with_error() {
    let store = Arc::new(FaultyStore::new(seeded_people_store().await));
    store.fail_cursor_after(1);
    let processor = BatchProcessor::new(store.clone(), &ServiceConfig::default());

    let mut stream = processor.export_csv("people").await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "id,name,age");
    assert_eq!(stream.next().await.unwrap().unwrap(), "1,John,30");
    assert_eq!(store.outstanding(), 1);
    assert!(matches!(stream.next().await, Some(Err(BatchError::Storage { .. }))));
    assert_eq!(store.outstanding(), 0);
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn cancelled_export_releases_its_connection() {
    let store = Arc::new(FaultyStore::new(seeded_people_store().await));
    let processor = BatchProcessor::new(store.clone(), &ServiceConfig::default());
    let cancel = CancelToken::new();

    let mut stream = processor.export_csv_cancellable("people", &cancel).await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "id,name,age");
    assert_eq!(store.outstanding(), 1);

    cancel.cancel();
    assert!(matches!(stream.next().await, Some(Err(BatchError::Cancelled))));
    assert_eq!(store.outstanding(), 0);
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn export_then_import_round_trip() {
    let source = seeded_people_store().await;
    let target = MemoryStore::new();
    target.create_table(people_schema()).unwrap();

    let exporter = BatchProcessor::new(Arc::new(source), &ServiceConfig::default());
    let mut csv = Vec::new();
    exporter
        .export_csv("people")
        .await
        .unwrap()
        .write_to(&mut csv)
        .await
        .unwrap();

    let importer = BatchProcessor::new(Arc::new(target), &ServiceConfig::default());
    let result = importer
        .import_csv(csv.as_slice(), "people", &ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(result.inserted, 2);

    assert_eq!(
        collect_lines(&importer, "people").await,
        collect_lines(&exporter, "people").await
    );
}

#[tokio::test]
async fn round_trip_keeps_nulls_in_typed_columns() {
    let source = MemoryStore::new();
    source.create_table(people_schema()).unwrap();
    for (id, name, age) in [
        (Value::from(1), "John", Value::Null),
        (Value::Null, "Jane", Value::from(28)),
    ] {
        rowgate_testkit::insert_row(
            &source,
            "people",
            vec![
                ("id".to_string(), id),
                ("name".to_string(), Value::from(name)),
                ("age".to_string(), age),
            ],
        )
        .await;
    }
    let target = MemoryStore::new();
    target.create_table(people_schema()).unwrap();

    let exporter = BatchProcessor::new(Arc::new(source), &ServiceConfig::default());
    let mut csv = Vec::new();
    exporter.export_csv("people").await.unwrap().write_to(&mut csv).await.unwrap();
    assert_eq!(String::from_utf8(csv.clone()).unwrap(), "id,name,age\n1,John,\n,Jane,28\n");

    let importer = BatchProcessor::new(Arc::new(target), &ServiceConfig::default());
    let result = importer
        .import_csv(csv.as_slice(), "people", &ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(result.inserted, 2);
    assert!(result.errors.is_empty());
    assert_eq!(
        importer.store().rows("people").unwrap(),
        exporter.store().rows("people").unwrap()
    );
}

#[tokio::test]
async fn file_import_and_export() {
    let store = MemoryStore::new();
    store.create_table(people_schema()).unwrap();
    let processor = BatchProcessor::new(Arc::new(store), &ServiceConfig::default());

    let input = temp_csv("people.csv", PEOPLE_CSV);
    let result = processor
        .import_file(&input.path, &ImportOptions::new().with_empty_as_null(true))
        .await
        .unwrap();
    assert_eq!(result.table_name, "people");
    assert_eq!(result.inserted, 2);

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("people_export.csv");
    let rows = processor.export_file("people", &out).await.unwrap();
    assert_eq!(rows, 2);
    let written = std::fs::read_to_string(&out).unwrap();
    assert_eq!(written, "id,name,age\n,John,30\n,Jane,28\n");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn round_trip_preserves_arbitrary_text(rows in person_rows_strategy()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let source = MemoryStore::new();
            source.create_table(people_schema()).unwrap();
            let target = MemoryStore::new();
            target.create_table(people_schema_named("people")).unwrap();

            let exporter = BatchProcessor::new(Arc::new(source), &ServiceConfig::default());
            for (i, (name, age)) in rows.iter().enumerate() {
                rowgate_testkit::insert_row(
                    exporter.store(),
                    "people",
                    vec![
                        ("id".to_string(), Value::from(i as i64 + 1)),
                        ("name".to_string(), Value::from(name.as_str())),
                        ("age".to_string(), Value::from(*age)),
                    ],
                )
                .await;
            }

            let mut csv = Vec::new();
            exporter.export_csv("people").await.unwrap().write_to(&mut csv).await.unwrap();

            let importer = BatchProcessor::new(Arc::new(target), &ServiceConfig::default());
            let result = importer
                .import_csv(csv.as_slice(), "people", &ImportOptions::default())
                .await
                .unwrap();
            assert_eq!(result.inserted, rows.len());
            assert_eq!(
                importer.store().rows("people").unwrap(),
                exporter.store().rows("people").unwrap()
            );
        });
    }
}
