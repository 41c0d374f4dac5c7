//! Plan command implementation.
//!
//! Builds an operation from command-line input and prints the parameterized
//! statement it would execute, without touching any storage.

use rowgate_core::{
    columns_from_json, Dialect, OperationBuilder, OperationKind, Statement, Value,
};
use serde::Serialize;

/// Plan output.
#[derive(Debug, Serialize)]
pub struct PlanResult {
    /// Operation kind.
    pub kind: OperationKind,
    /// Target table.
    pub table: String,
    /// Rendered statement.
    pub statement: Statement,
}

fn parse_columns(
    json: Option<&str>,
    flag: &str,
) -> Result<Vec<(String, Value)>, Box<dyn std::error::Error>> {
    let Some(json) = json else {
        return Ok(Vec::new());
    };
    match serde_json::from_str::<serde_json::Value>(json)? {
        serde_json::Value::Object(map) => Ok(columns_from_json(map)?),
        _ => Err(format!("{flag} must be a JSON object").into()),
    }
}

/// Builds the plan without printing it.
pub fn build(
    kind: &str,
    table: &str,
    values: Option<&str>,
    filter: Option<&str>,
    dialect: &str,
    max_identifier_len: usize,
) -> Result<PlanResult, Box<dyn std::error::Error>> {
    let kind: OperationKind = kind.parse()?;
    let dialect: Dialect = dialect.parse()?;
    let values = parse_columns(values, "--values")?;
    let filter = parse_columns(filter, "--where")?;

    let op = OperationBuilder::new(max_identifier_len).build(kind, table, values, filter)?;
    Ok(PlanResult {
        kind,
        table: op.table().to_string(),
        statement: op.to_statement(dialect),
    })
}

/// Runs the plan command.
pub fn run(
    kind: &str,
    table: &str,
    values: Option<&str>,
    filter: Option<&str>,
    dialect: &str,
    max_identifier_len: usize,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let plan = build(kind, table, values, filter, dialect, max_identifier_len)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        println!("{} on {}", plan.kind, plan.table);
        println!("  sql:    {}", plan.statement.sql);
        let params: Vec<String> = plan
            .statement
            .params
            .iter()
            .map(|v| v.to_json().to_string())
            .collect();
        println!("  params: [{}]", params.join(", "));
    }
    Ok(())
}
