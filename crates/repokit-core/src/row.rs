//! Result row representation.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Column metadata shared across all rows in a result set.
///
/// Wrapped in `Arc` so every row from the same read shares one copy.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    /// Column names in order
    names: Vec<String>,
    /// Name -> index mapping for O(1) lookup
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    /// Create new column info from a list of column names.
    pub fn new(names: Vec<String>) -> Self {
        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            name_to_index,
        }
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Get the index of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Check if a column exists.
    pub fn contains(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    /// Get all column names.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned from a store read.
///
/// Joined association columns are named `association.field`.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a row with its own column metadata.
    ///
    /// For multiple rows from the same result set, prefer `with_columns`.
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        let columns = Arc::new(ColumnInfo::new(column_names));
        Self { values, columns }
    }

    /// Create a row with shared column metadata.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    /// Get the shared column metadata.
    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    pub fn contains_column(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    /// Get a typed value by column name.
    pub fn get_named<T>(&self, name: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = Error>,
    {
        let value = self.get_by_name(name).ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: format!("column '{}' not found", name),
                column: Some(name.to_string()),
            })
        })?;
        T::try_from(value.clone()).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column = Some(name.to_string());
                Error::Type(te)
            }
            e => e,
        })
    }

    /// Iterate over (column_name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Columns under `prefix.`, with the prefix stripped.
    ///
    /// Used to split an inline-joined row into its association part.
    pub fn prefixed<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a Value)> + 'a {
        self.iter().filter_map(move |(name, value)| {
            name.strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('.'))
                .map(|field| (field, value))
        })
    }

    /// Render as a JSON object keyed by column name.
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member_row() -> Row {
        Row::new(
            vec![
                "id".to_string(),
                "username".to_string(),
                "team.id".to_string(),
                "team.name".to_string(),
            ],
            vec![
                Value::BigInt(1),
                Value::Text("member1".to_string()),
                Value::BigInt(7),
                Value::Text("teamA".to_string()),
            ],
        )
    }

    #[test]
    fn named_access() {
        let row = member_row();
        assert_eq!(row.get_named::<i64>("id").unwrap(), 1);
        assert_eq!(row.get_named::<String>("username").unwrap(), "member1");
        assert_eq!(row.get(1), Some(&Value::Text("member1".to_string())));
        assert!(row.contains_column("team.name"));
        assert!(!row.contains_column("age"));
    }

    #[test]
    fn missing_column_names_the_column() {
        let row = member_row();
        match row.get_named::<i64>("age") {
            Err(Error::Type(te)) => assert_eq!(te.column.as_deref(), Some("age")),
            other => panic!("unexpected: {:?}", other),
        }
        match row.get_named::<i64>("username") {
            Err(Error::Type(te)) => assert_eq!(te.column.as_deref(), Some("username")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn prefixed_columns_strip_association() {
        let row = member_row();
        let team: Vec<_> = row.prefixed("team").collect();
        assert_eq!(
            team,
            vec![
                ("id", &Value::BigInt(7)),
                ("name", &Value::Text("teamA".to_string())),
            ]
        );
        assert_eq!(row.prefixed("te").count(), 0);
    }

    #[test]
    fn shared_columns() {
        let row = member_row();
        let other = Row::with_columns(
            row.column_info(),
            vec![Value::BigInt(2), Value::Null, Value::Null, Value::Null],
        );
        assert!(Arc::ptr_eq(&row.column_info(), &other.column_info()));
        assert_eq!(other.to_json()["id"], serde_json::json!(2));
    }
}
