//! Rehearse command implementation.
//!
//! Runs a CSV import against an in-memory store whose table is created from
//! the file's header (every column `TEXT`), reports the per-row outcome, and
//! optionally exports the imported table again.

use rowgate_batch::{derive_table_name, BatchProcessor, CsvReader, ImportOptions, ImportResult};
use rowgate_core::{ColumnDef, ColumnType, MemoryStore, RetryConfig, ServiceConfig, TableSchema};
use std::path::Path;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::info;

/// Creates a store holding an all-text table shaped like the CSV header.
async fn store_for(
    path: &Path,
    table: &str,
    pool_size: usize,
    max_record_len: usize,
) -> Result<MemoryStore, Box<dyn std::error::Error>> {
    let file = tokio::fs::File::open(path).await?;
    let mut reader = CsvReader::new(BufReader::new(file)).with_max_record_len(max_record_len);
    let header = reader
        .next_record()
        .await?
        .ok_or_else(|| format!("{} is empty", path.display()))?;

    let mut schema = TableSchema::new(table)?;
    for column in &header.fields {
        schema = schema.column(ColumnDef::new(column.trim(), ColumnType::Text)?);
    }
    let store = MemoryStore::with_pool_size(pool_size);
    store.create_table(schema)?;
    Ok(store)
}

fn print_result(result: &ImportResult, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    println!("table:    {}", result.table_name);
    println!("records:  {}", result.total_records);
    println!("inserted: {}", result.inserted);
    println!("failed:   {}", result.failed);
    for error in &result.errors {
        println!("  row {}: {}", error.row_index, error.message);
    }
    if !result.possibly_duplicated.is_empty() {
        let rows: Vec<String> = result.possibly_duplicated.iter().map(|r| r.to_string()).collect();
        println!("retried inserts (check for duplicates): rows {}", rows.join(", "));
    }
    Ok(())
}

/// Runs the rehearse command.
pub fn run(
    file: &Path,
    export: Option<&Path>,
    options: &ImportOptions,
    retry: RetryConfig,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let file_name = file
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| format!("not a file: {}", file.display()))?;
        let table = derive_table_name(file_name)?;
        let config = ServiceConfig::new().with_retry(retry);
        let store = store_for(file, &table, config.pool_size, options.max_record_len).await?;
        let processor = BatchProcessor::new(Arc::new(store), &config);
        let result = processor.import_file(file, options).await?;
        print_result(&result, format)?;

        if let Some(out) = export {
            let rows = processor.export_file(&table, out).await?;
            info!(rows, path = %out.display(), "exported table");
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
