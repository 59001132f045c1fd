//! SQL values and literal rendering.
//!
//! Statements built by this crate carry their values inline, so every value
//! passes through one of two renderers:
//!
//! - [`as_literal`] is used wherever user data lands in SQL. Strings are quoted
//!   and embedded quotes are doubled.
//! - [`as_token`] is used for text already known to be valid SQL (identifiers,
//!   raw fragments). Strings pass through unquoted.
//!
//! # Example
//! ```ignore
//! use pgmodel::value::{as_literal, Value};
//!
//! assert_eq!(as_literal(&Value::from("it's"))?, "'it''s'");
//! assert_eq!(as_literal(&Value::from(vec![1, 2]))?, "(1, 2)");
//! # Ok::<(), pgmodel::OrmError>(())
//! ```

use crate::error::{OrmError, OrmResult};
use crate::query::Query;
use crate::record::Record;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// A value that can be rendered into SQL text.
#[derive(Debug, Clone)]
pub enum Value {
    /// SQL `NULL`
    Null,
    /// SQL `DEFAULT` (only meaningful in INSERT value lists)
    Default,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Uuid(Uuid),
    /// A list of values; renders as a tuple.
    Array(Vec<Value>),
    /// A raw SQL fragment rendered verbatim.
    ///
    /// Be careful with SQL injection when using raw values.
    Raw(String),
    /// A nested statement rendered as `(statement)`.
    SubQuery(Box<Query>),
    /// A nested record, produced when loading foreign objects.
    Record(Record),
}

impl Value {
    /// Create a raw SQL fragment value.
    pub fn raw(sql: impl Into<String>) -> Self {
        Value::Raw(sql.into())
    }

    /// Create a text value.
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Convert to a JSON value.
    ///
    /// Raw fragments and sub-queries have no JSON form and become their SQL text.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null | Value::Default => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .unwrap_or(J::Null),
            Value::Text(s) | Value::Raw(s) => J::String(s.clone()),
            Value::Json(j) => j.clone(),
            Value::Date(d) => J::String(d.format("%Y-%m-%d").to_string()),
            Value::DateTime(dt) => J::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Uuid(u) => J::String(u.to_string()),
            Value::Array(items) => J::Array(items.iter().map(Value::to_json).collect()),
            Value::SubQuery(q) => J::String(q.statement().unwrap_or_default()),
            Value::Record(r) => r.to_json(),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Default => "default",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Json(_) => "json",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::Uuid(_) => "uuid",
            Value::Array(_) => "array",
            Value::Raw(_) => "raw",
            Value::SubQuery(_) => "subquery",
            Value::Record(_) => "record",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) | (Value::Default, Value::Default) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Text(a), Value::Text(b)) | (Value::Raw(a), Value::Raw(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::SubQuery(a), Value::SubQuery(b)) => {
                a.statement().ok() == b.statement().ok()
            }
            (Value::Record(a), Value::Record(b)) => a == b,
            _ => false,
        }
    }
}

/// Quote a string as a SQL literal, doubling embedded quotes.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            out.push('\'');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

/// Render a value as a SQL literal.
///
/// Returns [`OrmError::SqlBuild`] for an empty array (which would otherwise
/// render as the invalid `()`) and for nested records.
pub fn as_literal(value: &Value) -> OrmResult<String> {
    render(value, true)
}

/// Render a value as a SQL token.
///
/// Same as [`as_literal`] except strings are emitted unquoted and arrays are
/// joined without enclosing parentheses.
pub fn as_token(value: &Value) -> OrmResult<String> {
    render(value, false)
}

fn render(value: &Value, literal: bool) -> OrmResult<String> {
    let text = |s: String| if literal { quote(&s) } else { s };
    Ok(match value {
        Value::Null => "NULL".to_string(),
        Value::Default => "DEFAULT".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_finite() => f.to_string(),
        Value::Float(f) => {
            let word = if f.is_nan() {
                "NaN"
            } else if *f > 0.0 {
                "Infinity"
            } else {
                "-Infinity"
            };
            if literal {
                format!("'{word}'::float8")
            } else {
                word.to_string()
            }
        }
        Value::Text(s) => text(s.clone()),
        Value::Json(j) => text(j.to_string()),
        Value::Date(d) => text(d.format("%Y-%m-%d").to_string()),
        Value::DateTime(dt) => text(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        Value::Uuid(u) => text(u.to_string()),
        Value::Raw(s) => s.clone(),
        Value::SubQuery(q) => format!("({})", q.statement()?),
        Value::Array(items) => {
            if items.is_empty() {
                return Err(OrmError::sql_build(
                    "empty array cannot be rendered as a SQL value list",
                ));
            }
            let parts = items
                .iter()
                .map(|v| render(v, literal))
                .collect::<OrmResult<Vec<_>>>()?;
            if literal {
                format!("({})", parts.join(", "))
            } else {
                parts.join(", ")
            }
        }
        Value::Record(_) => {
            return Err(OrmError::sql_build(format!(
                "a {} value cannot be rendered as SQL",
                value.kind_name()
            )));
        }
    })
}

// ==================== Conversions ====================

macro_rules! value_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(i64::from(v))
            }
        })*
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v.and_utc())
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<Query> for Value {
    fn from(q: Query) -> Self {
        Value::SubQuery(Box::new(q))
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(r)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value> + Clone> From<&[T]> for Value {
    fn from(v: &[T]) -> Self {
        Value::Array(v.iter().cloned().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_quotes_and_escapes_strings() {
        assert_eq!(as_literal(&Value::from("abc")).unwrap(), "'abc'");
        assert_eq!(as_literal(&Value::from("it's")).unwrap(), "'it''s'");
        assert_eq!(
            as_literal(&Value::from("'; DROP TABLE book; --")).unwrap(),
            "'''; DROP TABLE book; --'"
        );
    }

    #[test]
    fn non_finite_floats_are_quoted() {
        assert_eq!(as_literal(&Value::Float(f64::NAN)).unwrap(), "'NaN'::float8");
        assert_eq!(
            as_literal(&Value::Float(f64::INFINITY)).unwrap(),
            "'Infinity'::float8"
        );
        assert_eq!(
            as_literal(&Value::Float(f64::NEG_INFINITY)).unwrap(),
            "'-Infinity'::float8"
        );
        assert_eq!(as_token(&Value::Float(f64::NEG_INFINITY)).unwrap(), "-Infinity");
        assert_eq!(as_literal(&Value::Float(2.5)).unwrap(), "2.5");
    }

    #[test]
    fn token_passes_strings_through() {
        assert_eq!(as_token(&Value::from("T.name")).unwrap(), "T.name");
    }

    #[test]
    fn scalars() {
        assert_eq!(as_literal(&Value::Null).unwrap(), "NULL");
        assert_eq!(as_literal(&Value::Default).unwrap(), "DEFAULT");
        assert_eq!(as_literal(&Value::from(true)).unwrap(), "TRUE");
        assert_eq!(as_literal(&Value::from(false)).unwrap(), "FALSE");
        assert_eq!(as_literal(&Value::from(42)).unwrap(), "42");
        assert_eq!(as_literal(&Value::from(-7i64)).unwrap(), "-7");
        assert_eq!(as_literal(&Value::from(1.5)).unwrap(), "1.5");
        assert_eq!(as_literal(&Value::raw("NOW()")).unwrap(), "NOW()");
        assert_eq!(as_literal(&Value::from(None::<i32>)).unwrap(), "NULL");
    }

    #[test]
    fn arrays() {
        assert_eq!(as_literal(&Value::from(vec![1, 2, 3])).unwrap(), "(1, 2, 3)");
        assert_eq!(as_literal(&Value::from(vec!["a", "b"])).unwrap(), "('a', 'b')");
        assert_eq!(as_token(&Value::from(vec!["a", "b"])).unwrap(), "a, b");
    }

    #[test]
    fn empty_array_is_a_build_error() {
        let err = as_literal(&Value::Array(vec![])).unwrap_err();
        assert!(err.is_sql_build());
        assert!(as_token(&Value::Array(vec![])).unwrap_err().is_sql_build());
    }

    #[test]
    fn json_date_uuid() {
        let j = serde_json::json!({"a": "it's"});
        assert_eq!(as_literal(&Value::from(j)).unwrap(), r#"'{"a":"it''s"}'"#);

        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(as_literal(&Value::from(d)).unwrap(), "'2024-02-29'");

        let u = Uuid::nil();
        assert_eq!(
            as_literal(&Value::from(u)).unwrap(),
            "'00000000-0000-0000-0000-000000000000'"
        );
    }

    #[test]
    fn nested_record_cannot_be_rendered() {
        let err = as_literal(&Value::Record(Record::new())).unwrap_err();
        assert!(err.is_sql_build());
    }
}
