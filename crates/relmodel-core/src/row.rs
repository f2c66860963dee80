//! Result rows as delivered by a row source.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Column names of a result set, with a name lookup.
///
/// When a name repeats (`SELECT posts.*, users.*`), lookups see the last
/// occurrence, the way such rows collapse into a key/value map.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl ColumnInfo {
    pub fn new(names: Vec<String>) -> Self {
        let positions = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { names, positions }
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// One result row: ordered column/value pairs with no type information
/// beyond each `Value` variant.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<ColumnInfo>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(names: Vec<String>, values: Vec<Value>) -> Self {
        Self {
            columns: Arc::new(ColumnInfo::new(names)),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at position `index`.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.position(name).and_then(|i| self.values.get(i))
    }

    /// Typed value of column `name`; a missing column is a type error.
    #[allow(clippy::result_large_err)]
    pub fn get_named<T>(&self, name: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = Error>,
    {
        let Some(value) = self.get_by_name(name) else {
            return Err(Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: "no such column".to_string(),
                column: Some(name.to_string()),
            }));
        };
        T::try_from(value.clone()).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column.get_or_insert_with(|| name.to_string());
                Error::Type(te)
            }
            other => other,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(&self.values)
    }

    /// Owned `(column, value)` pairs, one per distinct column name: first
    /// position, last value.
    pub fn into_pairs(self) -> Vec<(String, Value)> {
        let mut out: IndexMap<String, Value> = IndexMap::with_capacity(self.values.len());
        for (name, value) in self.columns.names().iter().zip(self.values) {
            out.insert(name.clone(), value);
        }
        out.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        let (names, values) = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .unzip();
        Row::new(names, values)
    }

    #[test]
    fn lookup_by_position_and_name() {
        let row = row(&[("id", Value::Int(1)), ("name", Value::from("Ada"))]);
        assert_eq!(row.len(), 2);
        assert_eq!(row.get(0), Some(&Value::Int(1)));
        assert_eq!(row.get_by_name("name"), Some(&Value::from("Ada")));
        assert!(row.get_by_name("email").is_none());
    }

    #[test]
    fn typed_access_names_the_column() {
        let row = row(&[("posts_count", Value::Int(2)), ("bio", Value::Null)]);
        assert_eq!(row.get_named::<i64>("posts_count").unwrap(), 2);
        assert!(row.get_named::<Option<String>>("bio").unwrap().is_none());

        match row.get_named::<i64>("missing").unwrap_err() {
            Error::Type(te) => assert_eq!(te.column.as_deref(), Some("missing")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn joined_rows_collapse_repeated_columns() {
        let row = row(&[
            ("id", Value::Int(10)),
            ("title", Value::from("Hello")),
            ("id", Value::Int(1)),
        ]);
        assert_eq!(row.get_by_name("id"), Some(&Value::Int(1)));
        assert_eq!(
            row.into_pairs(),
            vec![
                ("id".to_string(), Value::Int(1)),
                ("title".to_string(), Value::from("Hello")),
            ]
        );
    }

    #[test]
    fn collapsing_keeps_first_position_for_every_repeat() {
        let row = row(&[
            ("id", Value::Int(1)),
            ("name", Value::from("post")),
            ("id", Value::Int(2)),
            ("name", Value::from("user")),
            ("id", Value::Int(3)),
            ("pivot_role_id", Value::Int(9)),
        ]);
        let pairs = row.into_pairs();
        let names: Vec<&str> = pairs.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "pivot_role_id"]);
        assert_eq!(pairs[0].1, Value::Int(3));
        assert_eq!(pairs[1].1, Value::from("user"));
    }
}
