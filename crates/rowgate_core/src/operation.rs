//! Validated data-access operations and the builder that produces them.
//!
//! An [`Operation`] can only be created through [`OperationBuilder`] (or the
//! shorthand constructors on `Operation`, which use the default builder), so
//! every operation in flight has:
//!
//! - a validated table name and validated column names,
//! - no duplicate column within a clause,
//! - a non-empty `where` clause if it is an `Update` or `Delete`.

use crate::error::{CoreError, CoreResult};
use crate::ident::{Identifier, DEFAULT_MAX_IDENTIFIER_LEN};
use crate::value::Value;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// The closed set of operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Insert one row.
    Insert,
    /// Select every row of a table.
    SelectAll,
    /// Select rows matching every equality condition.
    SelectFiltered,
    /// Update rows matching every equality condition.
    Update,
    /// Delete rows matching every equality condition.
    Delete,
}

impl OperationKind {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::SelectAll => "select_all",
            OperationKind::SelectFiltered => "select_filtered",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    /// Returns true if the kind modifies stored rows.
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            OperationKind::Insert | OperationKind::Update | OperationKind::Delete
        )
    }

    /// Returns true if the kind must never run without a condition.
    pub fn requires_where(self) -> bool {
        matches!(self, OperationKind::Update | OperationKind::Delete)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "insert" => Ok(OperationKind::Insert),
            "select_all" => Ok(OperationKind::SelectAll),
            "select_filtered" | "select" => Ok(OperationKind::SelectFiltered),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => Err(format!("unknown operation kind: {other}")),
        }
    }
}

/// A validated, parameterized description of one data-access request.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    kind: OperationKind,
    table: Identifier,
    values: Vec<(Identifier, Value)>,
    filter: Vec<(Identifier, Value)>,
}

impl Operation {
    /// Builds an operation of any kind with the default builder.
    pub fn build<V, W>(kind: OperationKind, table: &str, values: V, filter: W) -> CoreResult<Self>
    where
        V: IntoIterator<Item = (String, Value)>,
        W: IntoIterator<Item = (String, Value)>,
    {
        OperationBuilder::default().build(kind, table, values, filter)
    }

    /// Builds an `Insert`.
    pub fn insert<V>(table: &str, values: V) -> CoreResult<Self>
    where
        V: IntoIterator<Item = (String, Value)>,
    {
        OperationBuilder::default().insert(table, values)
    }

    /// Builds a `SelectAll`.
    pub fn select_all(table: &str) -> CoreResult<Self> {
        OperationBuilder::default().select_all(table)
    }

    /// Builds a `SelectFiltered`.
    pub fn select_filtered<W>(table: &str, filter: W) -> CoreResult<Self>
    where
        W: IntoIterator<Item = (String, Value)>,
    {
        OperationBuilder::default().select_filtered(table, filter)
    }

    /// Builds an `Update`.
    pub fn update<V, W>(table: &str, values: V, filter: W) -> CoreResult<Self>
    where
        V: IntoIterator<Item = (String, Value)>,
        W: IntoIterator<Item = (String, Value)>,
    {
        OperationBuilder::default().update(table, values, filter)
    }

    /// Builds a `Delete`.
    pub fn delete<W>(table: &str, filter: W) -> CoreResult<Self>
    where
        W: IntoIterator<Item = (String, Value)>,
    {
        OperationBuilder::default().delete(table, filter)
    }

    /// The operation kind.
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// The target table.
    pub fn table(&self) -> &Identifier {
        &self.table
    }

    /// Column values to write, in caller order.
    pub fn values(&self) -> &[(Identifier, Value)] {
        &self.values
    }

    /// Equality conditions, combined with AND.
    pub fn filter(&self) -> &[(Identifier, Value)] {
        &self.filter
    }
}

/// Builds operations, enforcing identifier rules and the WHERE guard.
#[derive(Debug, Clone, Copy)]
pub struct OperationBuilder {
    max_identifier_len: usize,
}

impl Default for OperationBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDENTIFIER_LEN)
    }
}

impl OperationBuilder {
    /// Creates a builder with the given identifier length limit.
    pub fn new(max_identifier_len: usize) -> Self {
        Self { max_identifier_len }
    }

    /// The identifier length limit.
    pub fn max_identifier_len(&self) -> usize {
        self.max_identifier_len
    }

    /// Validates a single name.
    pub fn identifier(&self, name: &str) -> CoreResult<Identifier> {
        Identifier::parse_with_limit(name, self.max_identifier_len)
    }

    /// Builds an operation of any kind.
    ///
    /// The WHERE guard for `Update` and `Delete` is checked before anything
    /// else, so an unscoped mutation is refused regardless of its other
    /// arguments.
    pub fn build<V, W>(
        &self,
        kind: OperationKind,
        table: &str,
        values: V,
        filter: W,
    ) -> CoreResult<Operation>
    where
        V: IntoIterator<Item = (String, Value)>,
        W: IntoIterator<Item = (String, Value)>,
    {
        let filter: Vec<(String, Value)> = filter.into_iter().collect();
        if kind.requires_where() && filter.is_empty() {
            return Err(CoreError::WhereRequired { kind });
        }

        let table = self.identifier(table)?;
        let values = self.columns(values, "values")?;
        let filter = self.columns(filter, "where")?;

        match kind {
            OperationKind::Insert => {
                require_values(kind, &values)?;
                refuse_clause(kind, "where", &filter)?;
            }
            OperationKind::SelectAll => {
                refuse_clause(kind, "values", &values)?;
                refuse_clause(kind, "where", &filter)?;
            }
            OperationKind::SelectFiltered => {
                refuse_clause(kind, "values", &values)?;
                if filter.is_empty() {
                    return Err(CoreError::WhereRequired { kind });
                }
            }
            OperationKind::Update => require_values(kind, &values)?,
            OperationKind::Delete => refuse_clause(kind, "values", &values)?,
        }

        Ok(Operation {
            kind,
            table,
            values,
            filter,
        })
    }

    /// Builds an `Insert` of one row.
    pub fn insert<V>(&self, table: &str, values: V) -> CoreResult<Operation>
    where
        V: IntoIterator<Item = (String, Value)>,
    {
        self.build(OperationKind::Insert, table, values, std::iter::empty())
    }

    /// Builds a `SelectAll`.
    pub fn select_all(&self, table: &str) -> CoreResult<Operation> {
        self.build(
            OperationKind::SelectAll,
            table,
            std::iter::empty(),
            std::iter::empty(),
        )
    }

    /// Builds a `SelectFiltered`.
    pub fn select_filtered<W>(&self, table: &str, filter: W) -> CoreResult<Operation>
    where
        W: IntoIterator<Item = (String, Value)>,
    {
        self.build(
            OperationKind::SelectFiltered,
            table,
            std::iter::empty(),
            filter,
        )
    }

    /// Builds an `Update`.
    pub fn update<V, W>(&self, table: &str, values: V, filter: W) -> CoreResult<Operation>
    where
        V: IntoIterator<Item = (String, Value)>,
        W: IntoIterator<Item = (String, Value)>,
    {
        self.build(OperationKind::Update, table, values, filter)
    }

    /// Builds a `Delete`.
    pub fn delete<W>(&self, table: &str, filter: W) -> CoreResult<Operation>
    where
        W: IntoIterator<Item = (String, Value)>,
    {
        self.build(OperationKind::Delete, table, std::iter::empty(), filter)
    }

    fn columns<I>(&self, entries: I, clause: &'static str) -> CoreResult<Vec<(Identifier, Value)>>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        for (name, value) in entries {
            let column = self.identifier(&name)?;
            if !seen.insert(name) {
                return Err(CoreError::DuplicateColumn {
                    column: column.into_string(),
                    clause,
                });
            }
            columns.push((column, value));
        }
        Ok(columns)
    }
}

fn require_values(kind: OperationKind, values: &[(Identifier, Value)]) -> CoreResult<()> {
    if values.is_empty() {
        return Err(CoreError::ValuesRequired { kind });
    }
    Ok(())
}

fn refuse_clause(
    kind: OperationKind,
    clause: &'static str,
    entries: &[(Identifier, Value)],
) -> CoreResult<()> {
    if !entries.is_empty() {
        return Err(CoreError::UnexpectedClause { kind, clause });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cols(pairs: &[(&str, Value)]) -> Vec<(String, Value)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn insert_keeps_column_order() {
        let op = Operation::insert(
            "users",
            cols(&[("name", "Ann".into()), ("age", 41.into())]),
        )
        .unwrap();
        assert_eq!(op.kind(), OperationKind::Insert);
        assert_eq!(op.table().as_str(), "users");
        let names: Vec<_> = op.values().iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(names, ["name", "age"]);
        assert!(op.filter().is_empty());
    }

    #[test]
    fn insert_requires_values() {
        let err = Operation::insert("users", Vec::new()).unwrap_err();
        assert!(matches!(err, CoreError::ValuesRequired { .. }));
    }

    #[test]
    fn update_and_delete_require_where() {
        let err = Operation::update("users", cols(&[("age", 1.into())]), Vec::new()).unwrap_err();
        assert_eq!(
            err,
            CoreError::WhereRequired {
                kind: OperationKind::Update
            }
        );
        let err = Operation::delete("users", Vec::new()).unwrap_err();
        assert_eq!(
            err,
            CoreError::WhereRequired {
                kind: OperationKind::Delete
            }
        );
    }

    #[test]
    fn guard_wins_over_bad_table() {
        let err = Operation::delete("users; --", Vec::new()).unwrap_err();
        assert!(matches!(err, CoreError::WhereRequired { .. }));
    }

    #[test]
    fn select_filtered_needs_conditions() {
        assert!(Operation::select_filtered("users", Vec::new()).is_err());
        let op = Operation::select_filtered("users", cols(&[("id", 1.into())])).unwrap();
        assert_eq!(op.filter().len(), 1);
    }

    #[test]
    fn unexpected_clauses_are_refused() {
        let err = Operation::build(
            OperationKind::SelectAll,
            "users",
            Vec::new(),
            cols(&[("id", 1.into())]),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::UnexpectedClause { clause: "where", .. }));

        let err = Operation::build(
            OperationKind::Delete,
            "users",
            cols(&[("age", 1.into())]),
            cols(&[("id", 1.into())]),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::UnexpectedClause { clause: "values", .. }));
    }

    #[test]
    fn duplicate_columns_are_refused() {
        let err = Operation::insert(
            "users",
            cols(&[("name", "a".into()), ("name", "b".into())]),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateColumn { clause: "values", .. }));
    }

    #[test]
    fn bad_column_names_are_refused() {
        let err = Operation::select_filtered("users", cols(&[("id OR 1=1", 1.into())]))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidIdentifier { .. }));
    }

    #[test]
    fn builder_limit_applies() {
        let builder = OperationBuilder::new(4);
        assert!(builder.select_all("abcd").is_ok());
        assert!(builder.select_all("abcde").is_err());
    }

    #[test]
    fn kind_parsing() {
        assert_eq!("insert".parse::<OperationKind>().unwrap(), OperationKind::Insert);
        assert_eq!(
            "select-all".parse::<OperationKind>().unwrap(),
            OperationKind::SelectAll
        );
        assert!("merge".parse::<OperationKind>().is_err());
    }

    proptest! {
        #[test]
        fn unscoped_mutations_always_fail(
            table in ".{0,20}",
            values in prop::collection::vec(("[a-z]{1,8}", any::<i64>()), 0..4),
            delete in any::<bool>(),
        ) {
            let values: Vec<(String, Value)> =
                values.into_iter().map(|(k, v)| (k, Value::Integer(v))).collect();
            let kind = if delete { OperationKind::Delete } else { OperationKind::Update };
            let result = Operation::build(kind, &table, values, Vec::new());
            prop_assert_eq!(result.unwrap_err(), CoreError::WhereRequired { kind });
        }

        #[test]
        fn bad_table_names_never_build(
            table in "[a-z]{0,5}[^A-Za-z0-9_][a-z]{0,5}",
        ) {
            let result = Operation::select_all(&table);
            let is_invalid_identifier = matches!(result, Err(CoreError::InvalidIdentifier { .. }));
            prop_assert!(is_invalid_identifier);
        }
    }
}
