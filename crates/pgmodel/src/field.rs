//! Field declarations and the built-in field collaborator.
//!
//! A field is declared with [`FieldOptions`] (every option optional, so a
//! mixin can override only what it names) and finalized into an immutable
//! [`Field`] when its model is built.
//!
//! A finalized field knows how to:
//! - [`Field::validate`] an application value (type coercion and checks)
//! - [`Field::prepare_for_db`] a validated value
//! - [`Field::get_default`] when a row omits the column
//! - [`Field::load`] a database value back into an application value

use crate::error::{OrmError, OrmResult};
use crate::model::Model;
use crate::value::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::fmt;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

/// Declared field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Auto-incrementing integer primary key.
    Serial,
    Integer,
    BigInt,
    Float,
    /// Length-limited text (`varchar(n)`).
    Char,
    Text,
    /// Text checked against a basic email pattern.
    Email,
    Boolean,
    Date,
    DateTime,
    Uuid,
    Json,
    Jsonb,
    /// Reference to another model's primary key or unique column.
    ForeignKey,
}

impl FieldType {
    /// Database type used when the declaration does not name one.
    ///
    /// Foreign keys return `None`: they inherit the referenced column's type.
    pub fn default_db_type(self, max_length: Option<usize>) -> Option<String> {
        let t = match self {
            FieldType::Serial | FieldType::Integer => "integer".to_string(),
            FieldType::BigInt => "bigint".to_string(),
            FieldType::Float => "double precision".to_string(),
            FieldType::Char | FieldType::Email => {
                format!("varchar({})", max_length.unwrap_or(255))
            }
            FieldType::Text => "text".to_string(),
            FieldType::Boolean => "boolean".to_string(),
            FieldType::Date => "date".to_string(),
            FieldType::DateTime => "timestamptz".to_string(),
            FieldType::Uuid => "uuid".to_string(),
            FieldType::Json => "json".to_string(),
            FieldType::Jsonb => "jsonb".to_string(),
            FieldType::ForeignKey => return None,
        };
        Some(t)
    }

    pub fn is_json(self) -> bool {
        matches!(self, FieldType::Json | FieldType::Jsonb)
    }
}

/// Default applied when a row omits a column.
#[derive(Clone)]
pub enum FieldDefault {
    Value(Value),
    /// Computed each time a default is needed.
    Computed(fn() -> Value),
}

impl FieldDefault {
    pub fn resolve(&self) -> Value {
        match self {
            FieldDefault::Value(v) => v.clone(),
            FieldDefault::Computed(f) => f(),
        }
    }
}

impl fmt::Debug for FieldDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldDefault::Value(v) => f.debug_tuple("Value").field(v).finish(),
            FieldDefault::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Target of a foreign key.
#[derive(Clone)]
pub enum Reference {
    Model(Arc<Model>),
    /// The model being declared (self-referencing foreign key).
    SelfRef,
}

impl Reference {
    /// Resolve to a concrete model, using `current` for self-references.
    pub fn resolve(&self, current: &Arc<Model>) -> Arc<Model> {
        match self {
            Reference::Model(m) => Arc::clone(m),
            Reference::SelfRef => Arc::clone(current),
        }
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Model(m) => write!(f, "Model({})", m.table_name()),
            Reference::SelfRef => f.write_str("SelfRef"),
        }
    }
}

// ==================== Declarations ====================

/// Raw field declaration.
///
/// Every option is optional so declarations can be merged: when a model
/// extends a parent or uses mixins, a child option that is set wins over the
/// parent's.
///
/// # Example
/// ```ignore
/// use pgmodel::FieldOptions;
///
/// let name = FieldOptions::char("name", 100).unique().label("Blog name");
/// let blog = FieldOptions::foreign_key("blog_id", &blog_model);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FieldOptions {
    pub(crate) name: String,
    pub(crate) kind: Option<FieldType>,
    pub(crate) db_type: Option<String>,
    pub(crate) label: Option<String>,
    pub(crate) null: Option<bool>,
    pub(crate) primary_key: Option<bool>,
    pub(crate) unique: Option<bool>,
    pub(crate) default: Option<FieldDefault>,
    pub(crate) max_length: Option<usize>,
    pub(crate) auto_now: Option<bool>,
    pub(crate) auto_now_add: Option<bool>,
    pub(crate) reference: Option<Reference>,
    pub(crate) reference_column: Option<String>,
}

impl FieldOptions {
    /// Declare a field of the given type.
    pub fn new(name: impl Into<String>, kind: FieldType) -> Self {
        Self {
            name: name.into(),
            kind: Some(kind),
            ..Default::default()
        }
    }

    /// Declare options only, without a type.
    ///
    /// Useful in a child model to override some options of an inherited field.
    pub fn patch(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn serial(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Serial).primary_key()
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn bigint(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::BigInt)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn char(name: impl Into<String>, max_length: usize) -> Self {
        Self::new(name, FieldType::Char).max_length(max_length)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn email(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Email)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Date)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::DateTime)
    }

    pub fn uuid(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Uuid)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Json)
    }

    pub fn jsonb(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Jsonb)
    }

    /// Declare a foreign key to `target` (its primary key unless
    /// [`reference_column`](Self::reference_column) says otherwise).
    pub fn foreign_key(name: impl Into<String>, target: &Arc<Model>) -> Self {
        Self {
            reference: Some(Reference::Model(Arc::clone(target))),
            ..Self::new(name, FieldType::ForeignKey)
        }
    }

    /// Declare a foreign key to the model being declared.
    pub fn foreign_key_self(name: impl Into<String>) -> Self {
        Self {
            reference: Some(Reference::SelfRef),
            ..Self::new(name, FieldType::ForeignKey)
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn db_type(mut self, db_type: impl Into<String>) -> Self {
        self.db_type = Some(db_type.into());
        self
    }

    pub fn null(mut self, null: bool) -> Self {
        self.null = Some(null);
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = Some(true);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = Some(true);
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(FieldDefault::Value(value.into()));
        self
    }

    pub fn default_with(mut self, f: fn() -> Value) -> Self {
        self.default = Some(FieldDefault::Computed(f));
        self
    }

    pub fn max_length(mut self, n: usize) -> Self {
        self.max_length = Some(n);
        self
    }

    /// Stamp the current time on every create and update.
    pub fn auto_now(mut self) -> Self {
        self.auto_now = Some(true);
        self
    }

    /// Stamp the current time on create.
    pub fn auto_now_add(mut self) -> Self {
        self.auto_now_add = Some(true);
        self
    }

    pub fn reference_column(mut self, column: impl Into<String>) -> Self {
        self.reference_column = Some(column.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shallow merge: options set on `self` win over `parent`'s.
    pub(crate) fn merged_over(self, parent: &FieldOptions) -> FieldOptions {
        FieldOptions {
            name: self.name,
            kind: self.kind.or(parent.kind),
            db_type: self.db_type.or_else(|| parent.db_type.clone()),
            label: self.label.or_else(|| parent.label.clone()),
            null: self.null.or(parent.null),
            primary_key: self.primary_key.or(parent.primary_key),
            unique: self.unique.or(parent.unique),
            default: self.default.or_else(|| parent.default.clone()),
            max_length: self.max_length.or(parent.max_length),
            auto_now: self.auto_now.or(parent.auto_now),
            auto_now_add: self.auto_now_add.or(parent.auto_now_add),
            reference: self.reference.or_else(|| parent.reference.clone()),
            reference_column: self
                .reference_column
                .or_else(|| parent.reference_column.clone()),
        }
    }

    pub(crate) fn is_primary_key(&self) -> bool {
        self.primary_key.unwrap_or(false) || self.kind == Some(FieldType::Serial)
    }
}

// ==================== Finalized field ====================

/// A finalized, immutable column descriptor.
#[derive(Debug, Clone)]
pub struct Field {
    pub(crate) name: String,
    pub(crate) kind: FieldType,
    pub(crate) db_type: String,
    pub(crate) label: String,
    pub(crate) null: bool,
    pub(crate) primary_key: bool,
    pub(crate) unique: bool,
    pub(crate) default: Option<FieldDefault>,
    pub(crate) max_length: Option<usize>,
    pub(crate) auto_now: bool,
    pub(crate) auto_now_add: bool,
    pub(crate) reference: Option<Reference>,
    pub(crate) reference_column: Option<String>,
}

impl Field {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldType {
        self.kind
    }

    pub fn db_type(&self) -> &str {
        &self.db_type
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_nullable(&self) -> bool {
        self.null
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn max_length(&self) -> Option<usize> {
        self.max_length
    }

    pub fn is_auto_now(&self) -> bool {
        self.auto_now
    }

    pub fn is_auto_now_add(&self) -> bool {
        self.auto_now_add
    }

    /// `true` for fields stamped automatically (`auto_now` / `auto_now_add`).
    pub fn is_auto_timestamp(&self) -> bool {
        self.auto_now || self.auto_now_add
    }

    pub fn is_json(&self) -> bool {
        self.kind.is_json()
    }

    pub fn reference(&self) -> Option<&Reference> {
        self.reference.as_ref()
    }

    pub fn reference_column(&self) -> Option<&str> {
        self.reference_column.as_deref()
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// A create must supply this field.
    pub fn is_required(&self) -> bool {
        !self.null && self.default.is_none() && !self.primary_key && !self.is_auto_timestamp()
    }

    pub fn get_default(&self) -> Option<Value> {
        self.default.as_ref().map(FieldDefault::resolve)
    }

    /// Build a validation error for this field.
    pub fn error(&self, message: impl Into<String>) -> OrmError {
        OrmError::Validation {
            field: self.name.clone(),
            label: self.label.clone(),
            message: message.into(),
        }
    }

    /// Validate and coerce an application value.
    ///
    /// Raw fragments, sub-queries and `DEFAULT` pass through untouched.
    pub fn validate(&self, value: Value) -> Result<Value, String> {
        match value {
            Value::Raw(_) | Value::SubQuery(_) | Value::Default => return Ok(value),
            Value::Null => {
                return if self.null || self.primary_key {
                    Ok(Value::Null)
                } else {
                    Err("this field cannot be null".to_string())
                };
            }
            _ => {}
        }

        match self.kind {
            FieldType::Serial | FieldType::Integer | FieldType::BigInt => to_int(value),
            FieldType::Float => to_float(value),
            FieldType::Char | FieldType::Text | FieldType::Email => {
                let s = to_text(value)?;
                if let Some(max) = self.max_length {
                    let len = s.chars().count();
                    if len > max {
                        return Err(format!("length {len} exceeds the maximum of {max}"));
                    }
                }
                if self.kind == FieldType::Email && !is_email(&s) {
                    return Err(format!("'{s}' is not a valid email address"));
                }
                Ok(Value::Text(s))
            }
            FieldType::Boolean => to_bool(value),
            FieldType::Date => to_date(value),
            FieldType::DateTime => to_datetime(value),
            FieldType::Uuid => to_uuid(value),
            FieldType::Json | FieldType::Jsonb => Ok(value),
            FieldType::ForeignKey => match value {
                Value::Record(rec) => {
                    let column = self.reference_column.as_deref().unwrap_or("id");
                    rec.get(column)
                        .cloned()
                        .ok_or_else(|| format!("referenced record has no '{column}' value"))
                }
                v @ (Value::Int(_) | Value::Text(_) | Value::Uuid(_)) => Ok(v),
                other => Err(format!("invalid foreign key value: {other:?}")),
            },
        }
    }

    /// Convert a validated value into the form written to the database.
    pub fn prepare_for_db(&self, value: Value) -> Value {
        match (self.kind.is_json(), value) {
            (
                true,
                v @ (Value::Null
                | Value::Default
                | Value::Raw(_)
                | Value::SubQuery(_)
                | Value::Json(_)),
            ) => v,
            (true, other) => Value::Json(other.to_json()),
            (false, v) => v,
        }
    }

    /// Load a database value.
    ///
    /// Values arrive as text over the simple-query protocol and are parsed by
    /// type; already-typed values pass through.
    pub fn load(&self, value: Value) -> OrmResult<Value> {
        let Value::Text(s) = value else {
            return Ok(value);
        };
        let decode = |message: String| OrmError::decode(&self.name, message);

        match self.kind {
            FieldType::Serial | FieldType::Integer | FieldType::BigInt => s
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| decode(e.to_string())),
            FieldType::Float => s
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| decode(e.to_string())),
            FieldType::Char | FieldType::Text | FieldType::Email => Ok(Value::Text(s)),
            FieldType::Boolean => parse_bool(&s).map(Value::Bool).map_err(decode),
            FieldType::Date => parse_date(&s).map(Value::Date).map_err(decode),
            FieldType::DateTime => parse_datetime(&s).map(Value::DateTime).map_err(decode),
            FieldType::Uuid => Uuid::parse_str(&s)
                .map(Value::Uuid)
                .map_err(|e| decode(e.to_string())),
            FieldType::Json | FieldType::Jsonb => serde_json::from_str(&s)
                .map(Value::Json)
                .map_err(|e| decode(e.to_string())),
            FieldType::ForeignKey => match self.db_type.as_str() {
                "integer" | "bigint" | "smallint" => s
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|e| decode(e.to_string())),
                "uuid" => Uuid::parse_str(&s)
                    .map(Value::Uuid)
                    .map_err(|e| decode(e.to_string())),
                _ => Ok(Value::Text(s)),
            },
        }
    }
}

// ==================== Coercion helpers ====================

/// Best-effort email validation.
///
/// This is intentionally not fully RFC-compliant.
pub fn is_email(s: &str) -> bool {
    static EMAIL_RE: OnceLock<regex::Regex> = OnceLock::new();
    EMAIL_RE
        .get_or_init(|| {
            regex::Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("invalid built-in email regex")
        })
        .is_match(s)
}

fn to_int(value: Value) -> Result<Value, String> {
    match value {
        Value::Int(i) => Ok(Value::Int(i)),
        Value::Float(f) if f.fract() == 0.0 => {
            if f >= i64::MIN as f64 && f < i64::MAX as f64 {
                Ok(Value::Int(f as i64))
            } else {
                Err(format!("{f} is out of range for an integer"))
            }
        }
        Value::Text(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| format!("'{s}' is not an integer")),
        other => Err(format!("expected an integer, got {other:?}")),
    }
}

fn to_float(value: Value) -> Result<Value, String> {
    match value {
        Value::Float(f) => Ok(Value::Float(f)),
        Value::Int(i) => Ok(Value::Float(i as f64)),
        Value::Text(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| format!("'{s}' is not a number")),
        other => Err(format!("expected a number, got {other:?}")),
    }
}

fn to_text(value: Value) -> Result<String, String> {
    match value {
        Value::Text(s) => Ok(s),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(f.to_string()),
        other => Err(format!("expected text, got {other:?}")),
    }
}

fn to_bool(value: Value) -> Result<Value, String> {
    match value {
        Value::Bool(b) => Ok(Value::Bool(b)),
        Value::Int(0) => Ok(Value::Bool(false)),
        Value::Int(1) => Ok(Value::Bool(true)),
        Value::Text(s) => parse_bool(&s).map(Value::Bool),
        other => Err(format!("expected a boolean, got {other:?}")),
    }
}

fn to_date(value: Value) -> Result<Value, String> {
    match value {
        Value::Date(d) => Ok(Value::Date(d)),
        Value::DateTime(dt) => Ok(Value::Date(dt.date_naive())),
        Value::Text(s) => parse_date(&s).map(Value::Date),
        other => Err(format!("expected a date, got {other:?}")),
    }
}

fn to_datetime(value: Value) -> Result<Value, String> {
    match value {
        Value::DateTime(dt) => Ok(Value::DateTime(dt)),
        Value::Text(s) => parse_datetime(&s).map(Value::DateTime),
        other => Err(format!("expected a timestamp, got {other:?}")),
    }
}

fn to_uuid(value: Value) -> Result<Value, String> {
    match value {
        Value::Uuid(u) => Ok(Value::Uuid(u)),
        Value::Text(s) => Uuid::parse_str(&s)
            .map(Value::Uuid)
            .map_err(|_| format!("'{s}' is not a valid uuid")),
        other => Err(format!("expected a uuid, got {other:?}")),
    }
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "1" | "yes" | "on" => Ok(true),
        "f" | "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(format!("'{s}' is not a boolean")),
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| format!("'{s}': {e}"))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, String> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    // Postgres text output: `2024-01-02 03:04:05.123+00`
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("'{s}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finalized(opts: FieldOptions) -> Field {
        let kind = opts.kind.unwrap_or(FieldType::Text);
        Field {
            db_type: kind.default_db_type(opts.max_length).unwrap_or_default(),
            label: opts.label.clone().unwrap_or_else(|| opts.name.clone()),
            null: opts.null.unwrap_or(false),
            primary_key: opts.is_primary_key(),
            unique: opts.unique.unwrap_or(false),
            default: opts.default.clone(),
            max_length: opts.max_length,
            auto_now: opts.auto_now.unwrap_or(false),
            auto_now_add: opts.auto_now_add.unwrap_or(false),
            reference: None,
            reference_column: None,
            name: opts.name,
            kind,
        }
    }

    #[test]
    fn merge_prefers_child_options() {
        let parent = FieldOptions::char("name", 100).label("Name").unique();
        let child = FieldOptions::patch("name").max_length(20);
        let merged = child.merged_over(&parent);
        assert_eq!(merged.kind, Some(FieldType::Char));
        assert_eq!(merged.max_length, Some(20));
        assert_eq!(merged.label.as_deref(), Some("Name"));
        assert_eq!(merged.unique, Some(true));
    }

    #[test]
    fn char_enforces_max_length() {
        let f = finalized(FieldOptions::char("name", 3));
        assert_eq!(f.validate(Value::from("abc")), Ok(Value::from("abc")));
        assert!(f.validate(Value::from("abcd")).is_err());
    }

    #[test]
    fn integer_coerces_text() {
        let f = finalized(FieldOptions::integer("price"));
        assert_eq!(f.validate(Value::from("12")), Ok(Value::Int(12)));
        assert!(f.validate(Value::from("twelve")).is_err());
    }

    #[test]
    fn integer_rejects_out_of_range_floats() {
        let f = finalized(FieldOptions::integer("n"));
        assert_eq!(f.validate(Value::Float(3.0)), Ok(Value::Int(3)));
        assert!(f.validate(Value::Float(1e30)).is_err());
        assert!(f.validate(Value::Float(-1e30)).is_err());
        assert!(f.validate(Value::Float(f64::INFINITY)).is_err());
    }

    #[test]
    fn null_rejected_unless_nullable() {
        let f = finalized(FieldOptions::integer("price"));
        assert!(f.validate(Value::Null).is_err());
        let f = finalized(FieldOptions::integer("price").null(true));
        assert_eq!(f.validate(Value::Null), Ok(Value::Null));
    }

    #[test]
    fn email_is_checked() {
        let f = finalized(FieldOptions::email("email"));
        assert!(f.validate(Value::from("a@b.io")).is_ok());
        assert!(f.validate(Value::from("not-an-email")).is_err());
    }

    #[test]
    fn json_prepare_wraps_plain_values() {
        let f = finalized(FieldOptions::jsonb("data"));
        assert_eq!(
            f.prepare_for_db(Value::from("x")),
            Value::Json(serde_json::json!("x"))
        );
    }

    #[test]
    fn load_parses_postgres_text() {
        assert_eq!(
            finalized(FieldOptions::integer("n")).load(Value::from("42")).unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            finalized(FieldOptions::boolean("b")).load(Value::from("t")).unwrap(),
            Value::Bool(true)
        );
        let dt = finalized(FieldOptions::datetime("at"))
            .load(Value::from("2024-01-02 03:04:05.5+00"))
            .unwrap();
        match dt {
            Value::DateTime(dt) => assert_eq!(dt.to_rfc3339(), "2024-01-02T03:04:05.500+00:00"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            finalized(FieldOptions::jsonb("data")).load(Value::from(r#"{"a":1}"#)).unwrap(),
            Value::Json(serde_json::json!({"a": 1}))
        );
    }

    #[test]
    fn load_reports_decode_errors() {
        let err = finalized(FieldOptions::integer("n"))
            .load(Value::from("nope"))
            .unwrap_err();
        assert!(matches!(err, OrmError::Decode { ref column, .. } if column == "n"));
    }
}
