//! Property-based test generators using proptest.

use proptest::prelude::*;
use rowgate_core::Value;

/// Strategy for valid identifiers.
pub fn identifier_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z_][a-zA-Z0-9_]{0,31}").expect("Invalid regex")
}

/// Strategy for names containing at least one forbidden character.
pub fn invalid_identifier_strategy() -> impl Strategy<Value = String> {
    (
        prop::string::string_regex("[a-z]{0,8}").expect("Invalid regex"),
        prop::sample::select(vec![' ', ';', '-', '\'', '"', '`', '.', '(', '*', '/']),
        prop::string::string_regex("[a-z]{0,8}").expect("Invalid regex"),
    )
        .prop_map(|(head, bad, tail)| format!("{head}{bad}{tail}"))
}

/// Strategy for scalar values.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[ -~]{0,16}".prop_map(Value::Text),
    ]
}

/// Strategy for column maps with distinct, valid column names.
pub fn columns_strategy() -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::btree_map(identifier_strategy(), value_strategy(), 1..6)
        .prop_map(|map| map.into_iter().collect())
}

/// Strategy for CSV field text, including separators, quotes and newlines.
pub fn csv_field_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 ,\"\n]{1,12}").expect("Invalid regex")
}

/// Strategy for people rows `(name, age)`.
pub fn person_rows_strategy() -> impl Strategy<Value = Vec<(String, i64)>> {
    prop::collection::vec((csv_field_strategy(), 0i64..120), 1..20)
}
