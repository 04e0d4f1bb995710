//! Query results.
//!
//! The query endpoint returns rows either as positional arrays paired with a
//! `columns` list, or as JSON objects. Both shapes normalize into [`Record`],
//! which answers field lookups the same way regardless of shape.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{DriverError, DriverResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Positional {
        columns: Arc<[String]>,
        values: Vec<Value>
    },
    Named(Map<String, Value>)
}

impl Record {
    /// Value of `field`, whichever shape the row arrived in.
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Self::Positional { columns, values } => columns
                .iter()
                .position(|c| c == field)
                .and_then(|i| values.get(i))
                .or_else(|| field.parse::<usize>().ok().and_then(|i| values.get(i))),
            Self::Named(map) => map.get(field)
        }
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        match self {
            Self::Positional { values, .. } => values.get(index),
            Self::Named(map) => map.values().nth(index)
        }
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    /// Ordered `(field, value)` view. Positional rows without a column name
    /// use the index as the field name.
    pub fn fields(&self) -> Vec<(String, &Value)> {
        match self {
            Self::Positional { columns, values } => values
                .iter()
                .enumerate()
                .map(|(i, v)| (column_name(columns, i), v))
                .collect(),
            Self::Named(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect()
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Positional { values, .. } => values.len(),
            Self::Named(map) => map.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.fields()
            .into_iter()
            .map(|(k, v)| (k, v.clone()))
            .collect()
    }
}

fn column_name(columns: &[String], index: usize) -> String {
    columns
        .get(index)
        .cloned()
        .unwrap_or_else(|| index.to_string())
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields = self.fields();
        let mut map = serializer.serialize_map(Some(fields.len()))?;
        for (name, value) in fields {
            map.serialize_entry(&name, value)?;
        }
        map.end()
    }
}

/// Rows returned by a HogQL query (or a REST list endpoint).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<Value>,
    #[serde(rename = "results")]
    pub records: Vec<Record>
}

impl QueryResult {
    /// Normalizes a decoded response body.
    ///
    /// Accepts `{"results": [...], "columns": [...], "types": [...]}`, a bare
    /// array of rows, or no body at all (empty result).
    pub fn from_response(body: Option<Value>) -> DriverResult<Self> {
        let (rows, columns, types) = match body {
            None | Some(Value::Null) => return Ok(Self::default()),
            Some(Value::Array(rows)) => (rows, Vec::new(), Vec::new()),
            Some(Value::Object(mut obj)) => {
                let rows = match obj.remove("results") {
                    Some(Value::Array(rows)) => rows,
                    None | Some(Value::Null) => Vec::new(),
                    Some(other) => {
                        return Err(DriverError::Decode(format!(
                            "expected 'results' to be an array, got {}",
                            json_kind(&other)
                        )));
                    }
                };
                let columns = match obj.remove("columns") {
                    Some(Value::Array(cols)) => cols
                        .into_iter()
                        .map(|c| match c {
                            Value::String(s) => s,
                            other => other.to_string()
                        })
                        .collect(),
                    _ => Vec::new()
                };
                let types = match obj.remove("types") {
                    Some(Value::Array(types)) => types,
                    _ => Vec::new()
                };
                (rows, columns, types)
            }
            Some(other) => {
                return Err(DriverError::Decode(format!(
                    "expected an object or array response, got {}",
                    json_kind(&other)
                )));
            }
        };

        Ok(Self::from_rows(rows, columns, types))
    }

    fn from_rows(rows: Vec<Value>, mut columns: Vec<String>, types: Vec<Value>) -> Self {
        if columns.is_empty() {
            if let Some(Value::Object(first)) = rows.first() {
                columns = first.keys().cloned().collect();
            }
        }

        let shared: Arc<[String]> = columns.clone().into();
        let records = rows
            .into_iter()
            .map(|row| match row {
                Value::Array(values) => Record::Positional {
                    columns: Arc::clone(&shared),
                    values
                },
                Value::Object(map) => Record::Named(map),
                scalar => Record::Positional {
                    columns: Arc::clone(&shared),
                    values: vec![scalar]
                }
            })
            .collect();

        Self {
            columns,
            types,
            records
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first(&self) -> Option<&Record> {
        self.records.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    /// Deserializes every row into `T` through its named-field view.
    pub fn deserialize_rows<T: DeserializeOwned>(&self) -> DriverResult<Vec<T>> {
        self.records
            .iter()
            .map(|record| {
                serde_json::from_value(Value::Object(record.to_map()))
                    .map_err(|e| DriverError::Decode(format!("row does not match target type: {e}")))
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a QueryResult {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl IntoIterator for QueryResult {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_both_shapes_expose_same_fields() {
        let positional = QueryResult::from_response(Some(json!({
            "results": [["a", 1]],
            "columns": ["event", "count"]
        })))
        .unwrap();
        let named = QueryResult::from_response(Some(json!({
            "results": [{"event": "a", "count": 1}]
        })))
        .unwrap();

        for result in [&positional, &named] {
            let row = result.first().unwrap();
            assert_eq!(row.get_str("event"), Some("a"));
            assert_eq!(row.get_i64("count"), Some(1));
            assert_eq!(row.get_index(0), Some(&json!("a")));
            assert_eq!(result.columns, vec!["event", "count"]);
        }
        assert_eq!(
            positional.first().unwrap().to_map(),
            named.first().unwrap().to_map()
        );
    }

    #[test]
    fn test_positional_without_columns_uses_indices() {
        let result = QueryResult::from_response(Some(json!({"results": [["a", 1]]}))).unwrap();
        let row = result.first().unwrap();
        assert_eq!(row.get("0"), Some(&json!("a")));
        assert_eq!(row.get("1"), Some(&json!(1)));
        assert_eq!(row.get("event"), None);
        let names: Vec<_> = row.fields().into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["0", "1"]);
    }

    #[test]
    fn test_empty_and_bare_bodies() {
        assert!(QueryResult::from_response(None).unwrap().is_empty());
        assert!(QueryResult::from_response(Some(json!({}))).unwrap().is_empty());
        assert!(
            QueryResult::from_response(Some(json!({"results": null})))
                .unwrap()
                .is_empty()
        );

        let bare = QueryResult::from_response(Some(json!([{"id": 1}, {"id": 2}]))).unwrap();
        assert_eq!(bare.len(), 2);
        assert_eq!(bare.columns, vec!["id"]);
    }

    #[test]
    fn test_malformed_bodies() {
        assert!(matches!(
            QueryResult::from_response(Some(json!({"results": "nope"}))),
            Err(DriverError::Decode(_))
        ));
        assert!(matches!(
            QueryResult::from_response(Some(json!(42))),
            Err(DriverError::Decode(_))
        ));
    }

    #[test]
    fn test_serializes_as_objects() {
        let result = QueryResult::from_response(Some(json!({
            "results": [["$pageview", 10]],
            "columns": ["event", "count"],
            "types": [["event", "String"], ["count", "UInt64"]]
        })))
        .unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["results"][0], json!({"event": "$pageview", "count": 10}));
        assert_eq!(json["columns"], json!(["event", "count"]));
    }

    #[test]
    fn test_deserialize_rows() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Row {
            event: String,
            count: u64
        }

        let result = QueryResult::from_response(Some(json!({
            "results": [["$pageview", 10], ["$autocapture", 3]],
            "columns": ["event", "count"]
        })))
        .unwrap();
        let rows: Vec<Row> = result.deserialize_rows().unwrap();
        assert_eq!(
            rows,
            vec![
                Row {
                    event: "$pageview".to_string(),
                    count: 10
                },
                Row {
                    event: "$autocapture".to_string(),
                    count: 3
                }
            ]
        );
    }
}
