//! Parameterized SQL rendering for SQL-backed storage executors.
//!
//! Only quoted identifiers and placeholders are written into the SQL text.
//! Values travel in [`Statement::params`].

use crate::ident::Identifier;
use crate::operation::{Operation, OperationKind};
use crate::value::Value;
use serde::Serialize;

/// Target SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Backtick identifiers, `?` placeholders.
    #[default]
    MySql,
    /// Double-quoted identifiers, `$n` placeholders.
    Postgres,
}

impl Dialect {
    fn quote(self, ident: &Identifier) -> String {
        match self {
            Dialect::MySql => format!("`{}`", ident.as_str().replace('`', "``")),
            Dialect::Postgres => format!("\"{}\"", ident.as_str().replace('"', "\"\"")),
        }
    }

    fn placeholder(self, position: usize) -> String {
        match self {
            Dialect::MySql => "?".to_string(),
            Dialect::Postgres => format!("${position}"),
        }
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" => Ok(Dialect::MySql),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            other => Err(format!("unknown dialect: {other}")),
        }
    }
}

/// SQL text plus the values bound to its placeholders, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    /// SQL text containing only identifiers and placeholders.
    pub sql: String,
    /// Bound parameters.
    pub params: Vec<Value>,
}

impl Operation {
    /// Renders the operation as a parameterized statement.
    ///
    /// Written values bind first, then filter values. A `Null` filter value
    /// renders as `IS NULL` and binds nothing.
    pub fn to_statement(&self, dialect: Dialect) -> Statement {
        let mut params = Vec::new();
        let table = dialect.quote(self.table());

        let sql = match self.kind() {
            OperationKind::Insert => {
                let columns: Vec<String> = self
                    .values()
                    .iter()
                    .map(|(column, _)| dialect.quote(column))
                    .collect();
                let placeholders: Vec<String> = self
                    .values()
                    .iter()
                    .map(|(_, value)| bind(dialect, &mut params, value))
                    .collect();
                format!(
                    "INSERT INTO {table} ({}) VALUES ({})",
                    columns.join(", "),
                    placeholders.join(", ")
                )
            }
            OperationKind::SelectAll => format!("SELECT * FROM {table}"),
            OperationKind::SelectFiltered => {
                let filter = where_clause(dialect, self.filter(), &mut params);
                format!("SELECT * FROM {table} WHERE {filter}")
            }
            OperationKind::Update => {
                let assignments: Vec<String> = self
                    .values()
                    .iter()
                    .map(|(column, value)| {
                        format!(
                            "{} = {}",
                            dialect.quote(column),
                            bind(dialect, &mut params, value)
                        )
                    })
                    .collect();
                let filter = where_clause(dialect, self.filter(), &mut params);
                format!(
                    "UPDATE {table} SET {} WHERE {filter}",
                    assignments.join(", ")
                )
            }
            OperationKind::Delete => {
                let filter = where_clause(dialect, self.filter(), &mut params);
                format!("DELETE FROM {table} WHERE {filter}")
            }
        };

        Statement { sql, params }
    }
}

fn bind(dialect: Dialect, params: &mut Vec<Value>, value: &Value) -> String {
    params.push(value.clone());
    dialect.placeholder(params.len())
}

fn where_clause(
    dialect: Dialect,
    filter: &[(Identifier, Value)],
    params: &mut Vec<Value>,
) -> String {
    filter
        .iter()
        .map(|(column, value)| {
            if value.is_null() {
                format!("{} IS NULL", dialect.quote(column))
            } else {
                format!("{} = {}", dialect.quote(column), bind(dialect, params, value))
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}
