//! Test fixtures: schemas, seeded stores and CSV inputs.

use rowgate_core::{
    ColumnDef, ColumnType, MemoryStore, Operation, RetryConfig, ServiceConfig, StorageExecutor,
    ConnectionPool, TableSchema, Value,
};
use std::path::PathBuf;
use tempfile::TempDir;

/// Users CSV whose second data row repeats the first row's email.
pub const USERS_CSV_WITH_DUPLICATE: &str = "\
name,email,age
Alice,alice@example.com,30
Bob,alice@example.com,25
Carol,carol@example.com,41
";

/// People CSV matching [`people_schema`], without ids.
pub const PEOPLE_CSV: &str = "name,age\nJohn,30\nJane,28\n";

/// `users(id auto, name NOT NULL, email UNIQUE, age INTEGER)`.
pub fn users_schema() -> TableSchema {
    TableSchema::new("users")
        .and_then(|t| {
            Ok(t.column(ColumnDef::id("id")?)
                .column(ColumnDef::new("name", ColumnType::Text)?.not_null())
                .column(ColumnDef::new("email", ColumnType::Text)?.unique())
                .column(ColumnDef::new("age", ColumnType::Integer)?))
        })
        .expect("users schema is valid")
}

/// `people(id INTEGER, name TEXT, age INTEGER)`, all nullable.
pub fn people_schema() -> TableSchema {
    people_schema_named("people")
}

/// The people shape under another table name.
pub fn people_schema_named(table: &str) -> TableSchema {
    TableSchema::new(table)
        .and_then(|t| {
            Ok(t.column(ColumnDef::new("id", ColumnType::Integer)?)
                .column(ColumnDef::new("name", ColumnType::Text)?)
                .column(ColumnDef::new("age", ColumnType::Integer)?))
        })
        .expect("people schema is valid")
}

/// A store holding an empty `users` table.
pub fn users_store() -> MemoryStore {
    let store = MemoryStore::new();
    store
        .create_table(users_schema())
        .expect("fresh store accepts users table");
    store
}

/// A store holding `people` with `(1, John, 30)` and `(2, Jane, 28)`.
pub async fn seeded_people_store() -> MemoryStore {
    let store = MemoryStore::new();
    store
        .create_table(people_schema())
        .expect("fresh store accepts people table");
    for (id, name, age) in [(1i64, "John", 30i64), (2, "Jane", 28)] {
        insert_row(
            &store,
            "people",
            vec![
                ("id".to_string(), Value::from(id)),
                ("name".to_string(), Value::from(name)),
                ("age".to_string(), Value::from(age)),
            ],
        )
        .await;
    }
    store
}

/// Inserts one row directly, bypassing the retry executor.
pub async fn insert_row(store: &MemoryStore, table: &str, values: Vec<(String, Value)>) {
    let op = Operation::insert(table, values).expect("valid insert");
    let conn = store.acquire().await.expect("connection available");
    store.insert(conn, &op).await.expect("insert succeeds");
}

/// A short schedule for tests that run on the real clock.
pub fn fast_retry() -> RetryConfig {
    RetryConfig::from_millis(&[(50, 0), (50, 10), (50, 10), (50, 10)]).expect("valid schedule")
}

/// Service configuration using [`fast_retry`].
pub fn fast_config() -> ServiceConfig {
    ServiceConfig::new().with_retry(fast_retry())
}

/// A temporary CSV file that is removed when dropped.
pub struct TempCsv {
    /// Path to the file.
    pub path: PathBuf,
    _dir: TempDir,
}

/// Writes `contents` to `<tempdir>/<file_name>`.
pub fn temp_csv(file_name: &str, contents: &str) -> TempCsv {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let path = dir.path().join(file_name);
    std::fs::write(&path, contents).expect("Failed to write CSV");
    TempCsv { path, _dir: dir }
}
