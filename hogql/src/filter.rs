//! WHERE clause construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HogQLError, HogQLResult};
use crate::escape::{escape_identifier, quote_string_literal};

/// Comparison operator of a single condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    ILike,
    In,
    NotIn,
    /// `field IN COHORT <id>`; takes a cohort id.
    InCohort
}

impl Operator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Like => "LIKE",
            Self::ILike => "ILIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::InCohort => "IN COHORT"
        }
    }
}

/// A value compared against a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(DateTime<Utc>),
    List(Vec<FilterValue>)
}

impl FilterValue {
    /// Renders the value as a HogQL literal. Strings are always escaped.
    pub fn to_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(b) => (if *b { "true" } else { "false" }).to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) if f.is_nan() => "nan".to_string(),
            Self::Float(f) if f.is_infinite() => {
                (if f.is_sign_positive() { "inf" } else { "-inf" }).to_string()
            }
            Self::Float(f) => f.to_string(),
            Self::String(s) => quote_string_literal(s),
            Self::DateTime(dt) => format!(
                "toDateTime({}, 'UTC')",
                quote_string_literal(&dt.format("%Y-%m-%d %H:%M:%S").to_string())
            ),
            Self::List(items) => format!(
                "({})",
                items
                    .iter()
                    .map(FilterValue::to_literal)
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        }
    }

    /// Converts a JSON scalar or array. Objects have no literal form.
    pub fn from_json(field: &str, value: &serde_json::Value) -> HogQLResult<Self> {
        use serde_json::Value;

        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN))
            },
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => Self::List(
                items
                    .iter()
                    .map(|item| Self::from_json(field, item))
                    .collect::<HogQLResult<Vec<_>>>()?
            ),
            Value::Object(_) => {
                return Err(HogQLError::UnsupportedValue {
                    field: field.to_string(),
                    reason: "objects cannot be compared in a filter".to_string()
                });
            }
        })
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&String> for FilterValue {
    fn from(value: &String) -> Self {
        Self::String(value.clone())
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for FilterValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::DateTime(value)
    }
}

impl<T: Into<FilterValue>> From<Vec<T>> for FilterValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// One `(field, operator, value)` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: FilterValue
}

impl Condition {
    pub fn render(&self) -> String {
        let field = escape_identifier(&self.field);
        match (self.operator, &self.value) {
            (Operator::Eq, FilterValue::Null) => format!("{field} IS NULL"),
            (Operator::NotEq, FilterValue::Null) => format!("{field} IS NOT NULL"),
            (Operator::In, FilterValue::List(items)) if items.is_empty() => "1 = 0".to_string(),
            (Operator::NotIn, FilterValue::List(items)) if items.is_empty() => {
                "1 = 1".to_string()
            }
            (op @ (Operator::In | Operator::NotIn), FilterValue::List(_)) => {
                format!("{field} {} {}", op.as_sql(), self.value.to_literal())
            }
            (op @ (Operator::In | Operator::NotIn), scalar) => {
                format!("{field} {} ({})", op.as_sql(), scalar.to_literal())
            }
            (op, value) => format!("{field} {} {}", op.as_sql(), value.to_literal())
        }
    }
}

/// Ordered list of conditions rendered as a `WHERE` clause.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    conditions: Vec<Condition>
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `field = value`.
    #[must_use]
    pub fn where_equals(self, field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.where_op(field, Operator::Eq, value)
    }

    #[must_use]
    pub fn where_op(
        mut self,
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<FilterValue>
    ) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            operator,
            value: value.into()
        });
        self
    }

    #[must_use]
    pub fn where_in(self, field: impl Into<String>, values: impl Into<FilterValue>) -> Self {
        self.where_op(field, Operator::In, values)
    }

    #[must_use]
    pub fn where_gte(self, field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.where_op(field, Operator::Gte, value)
    }

    #[must_use]
    pub fn where_lte(self, field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.where_op(field, Operator::Lte, value)
    }

    /// Appends `field = value` for every entry of a JSON object, in order.
    pub fn where_json_equals<'a>(
        mut self,
        prefix: &str,
        entries: impl IntoIterator<Item = (&'a String, &'a serde_json::Value)>
    ) -> HogQLResult<Self> {
        for (key, value) in entries {
            let field = format!("{prefix}{key}");
            let value = FilterValue::from_json(&field, value)?;
            self = self.where_equals(field, value);
        }
        Ok(self)
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// Renders `WHERE a AND b ...`, or an empty string when there are no
    /// conditions. Does not consume or modify the filter.
    pub fn build(&self) -> String {
        if self.conditions.is_empty() {
            return String::new();
        }
        let clauses = self
            .conditions
            .iter()
            .map(Condition::render)
            .collect::<Vec<_>>()
            .join(" AND ");
        format!("WHERE {clauses}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_empty_filter_renders_nothing() {
        assert_eq!(QueryFilter::new().build(), "");
    }

    #[test]
    fn test_injection_attempt_stays_one_literal() {
        let rendered = QueryFilter::new()
            .where_equals("event", "x' OR '1'='1")
            .build();
        assert_eq!(rendered, "WHERE event = 'x'' OR ''1''=''1'");
    }

    #[test]
    fn test_build_is_idempotent() {
        let filter = QueryFilter::new()
            .where_equals("event", "$pageview")
            .where_equals("distinct_id", "u1");
        let first = filter.build();
        let second = filter.build();
        assert_eq!(first, second);
        assert_eq!(filter.len(), 2);
        assert_eq!(first, "WHERE event = '$pageview' AND distinct_id = 'u1'");
    }

    #[test]
    fn test_operators_and_value_kinds() {
        let at = Utc.with_ymd_and_hms(2024, 1, 31, 12, 30, 0).unwrap();
        let rendered = QueryFilter::new()
            .where_gte("timestamp", at)
            .where_op("properties.count", Operator::Lt, 10)
            .where_op("properties.ratio", Operator::Gt, 0.5)
            .where_equals("properties.paid", true)
            .where_op("properties.email", Operator::ILike, "%@example.com")
            .build();
        assert_eq!(
            rendered,
            "WHERE timestamp >= toDateTime('2024-01-31 12:30:00', 'UTC') \
             AND properties.count < 10 \
             AND properties.ratio > 0.5 \
             AND properties.paid = true \
             AND properties.email ILIKE '%@example.com'"
        );
    }

    #[test]
    fn test_in_lists() {
        let rendered = QueryFilter::new()
            .where_in("event", vec!["a", "b'c"])
            .build();
        assert_eq!(rendered, "WHERE event IN ('a', 'b''c')");

        let empty: Vec<String> = Vec::new();
        assert_eq!(
            QueryFilter::new().where_in("event", empty.clone()).build(),
            "WHERE 1 = 0"
        );
        assert_eq!(
            QueryFilter::new()
                .where_op("event", Operator::NotIn, empty)
                .build(),
            "WHERE 1 = 1"
        );
        assert_eq!(
            QueryFilter::new().where_in("event", "solo").build(),
            "WHERE event IN ('solo')"
        );
    }

    #[test]
    fn test_cohort_membership() {
        let filter = QueryFilter::new().where_op("id", Operator::InCohort, 42);
        assert_eq!(filter.build(), "WHERE id IN COHORT 42");
    }

    #[test]
    fn test_null_comparisons() {
        let rendered = QueryFilter::new()
            .where_equals("person_id", FilterValue::Null)
            .where_op("properties.plan", Operator::NotEq, None::<String>)
            .build();
        assert_eq!(
            rendered,
            "WHERE person_id IS NULL AND properties.plan IS NOT NULL"
        );
    }

    #[test]
    fn test_non_finite_floats() {
        assert_eq!(FilterValue::Float(f64::NAN).to_literal(), "nan");
        assert_eq!(FilterValue::Float(f64::INFINITY).to_literal(), "inf");
        assert_eq!(FilterValue::Float(f64::NEG_INFINITY).to_literal(), "-inf");
    }

    #[test]
    fn test_field_names_are_escaped() {
        let rendered = QueryFilter::new()
            .where_equals("properties.plan tier", "pro")
            .build();
        assert_eq!(rendered, "WHERE properties.`plan tier` = 'pro'");
    }

    #[test]
    fn test_json_entries() {
        let props = json!({"plan": "pro", "seats": 3, "tags": ["a", "b"]});
        let filter = QueryFilter::new()
            .where_json_equals("properties.", props.as_object().unwrap())
            .unwrap();
        assert_eq!(filter.len(), 3);
        let rendered = filter.build();
        assert!(rendered.contains("properties.plan = 'pro'"));
        assert!(rendered.contains("properties.seats = 3"));
        assert!(rendered.contains("properties.tags = ('a', 'b')"));
    }

    #[test]
    fn test_json_object_rejected() {
        let err = FilterValue::from_json("properties.meta", &json!({"nested": true})).unwrap_err();
        assert!(matches!(err, HogQLError::UnsupportedValue { ref field, .. } if field == "properties.meta"));
    }
}
