//! Lookup operators and condition trees.
//!
//! A condition is a set of `(path, value)` pairs. The last path segment may
//! name an operator (`price__gte`, `name__contains`); without one, `eq` is
//! used.
//!
//! # Example
//! ```ignore
//! use pgmodel::Cond;
//!
//! // price = 100 AND name LIKE '%dune%'
//! let c = Cond::new().with("price", 100).with("name__contains", "dune");
//!
//! // (price < 10) OR (NOT (rating > 3))
//! let c = Cond::or([
//!     Cond::from(("price__lt", 10)),
//!     Cond::not(("rating__gt", 3)),
//! ]);
//! ```

use crate::error::{OrmError, OrmResult};
use crate::value::{Value, as_literal, as_token, quote};

/// Lookup operator (last segment of a path).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// `=` (`IS NULL` for a null value)
    Eq,
    /// `<>` (`IS NOT NULL` for a null value)
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    /// `IN (..)` with an array or sub-query
    In,
    /// `NOT IN (..)`
    NotIn,
    /// `LIKE '%x%'`; `@>` on JSON columns
    Contains,
    /// `ILIKE '%x%'`
    IContains,
    /// `LIKE 'x%'`
    StartsWith,
    /// `LIKE '%x'`
    EndsWith,
    /// `IS NULL` for `true`, `IS NOT NULL` for `false`
    Null,
    /// JSON `?`
    HasKey,
    /// JSON `?&`
    HasKeys,
    /// JSON `?|`
    HasAnyKeys,
    /// JSON `<@`
    ContainedBy,
}

impl Op {
    /// Parse an operator segment.
    pub fn from_name(name: &str) -> Option<Op> {
        Some(match name {
            "eq" => Op::Eq,
            "ne" => Op::Ne,
            "lt" => Op::Lt,
            "lte" => Op::Lte,
            "gt" => Op::Gt,
            "gte" => Op::Gte,
            "in" => Op::In,
            "notin" => Op::NotIn,
            "contains" => Op::Contains,
            "icontains" => Op::IContains,
            "startswith" => Op::StartsWith,
            "endswith" => Op::EndsWith,
            "null" => Op::Null,
            "has_key" => Op::HasKey,
            "has_keys" => Op::HasKeys,
            "has_any_keys" => Op::HasAnyKeys,
            "contained_by" => Op::ContainedBy,
            _ => return None,
        })
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Op::Eq => "eq",
            Op::Ne => "ne",
            Op::Lt => "lt",
            Op::Lte => "lte",
            Op::Gt => "gt",
            Op::Gte => "gte",
            Op::In => "in",
            Op::NotIn => "notin",
            Op::Contains => "contains",
            Op::IContains => "icontains",
            Op::StartsWith => "startswith",
            Op::EndsWith => "endswith",
            Op::Null => "null",
            Op::HasKey => "has_key",
            Op::HasKeys => "has_keys",
            Op::HasAnyKeys => "has_any_keys",
            Op::ContainedBy => "contained_by",
        }
    }

    /// Apply the operator to a resolved column.
    ///
    /// `json` is set when the column is a JSON field (or a path into one);
    /// compared values are then JSON-encoded.
    pub fn compile(self, column: &str, value: &Value, json: bool) -> OrmResult<String> {
        let literal = |v: &Value| -> OrmResult<String> {
            match v {
                Value::Raw(_) | Value::SubQuery(_) | Value::Null => as_literal(v),
                _ if json => Ok(quote(&v.to_json().to_string())),
                _ => as_literal(v),
            }
        };

        Ok(match self {
            Op::Eq if value.is_null() => format!("{column} IS NULL"),
            Op::Ne if value.is_null() => format!("{column} IS NOT NULL"),
            Op::Eq => format!("{column} = {}", literal(value)?),
            Op::Ne => format!("{column} <> {}", literal(value)?),
            Op::Lt => format!("{column} < {}", literal(value)?),
            Op::Lte => format!("{column} <= {}", literal(value)?),
            Op::Gt => format!("{column} > {}", literal(value)?),
            Op::Gte => format!("{column} >= {}", literal(value)?),
            Op::In | Op::NotIn => {
                let list = match value {
                    Value::Array(_) | Value::SubQuery(_) | Value::Raw(_) => as_literal(value)?,
                    other => as_literal(&Value::Array(vec![other.clone()]))?,
                };
                let kw = if self == Op::In { "IN" } else { "NOT IN" };
                format!("{column} {kw} {list}")
            }
            Op::Contains if json => format!("{column} @> {}", literal(value)?),
            Op::ContainedBy => format!("{column} <@ {}", literal(value)?),
            Op::Contains | Op::IContains | Op::StartsWith | Op::EndsWith => {
                let text = pattern_text(self, value)?;
                let pattern = match self {
                    Op::StartsWith => format!("{text}%"),
                    Op::EndsWith => format!("%{text}"),
                    _ => format!("%{text}%"),
                };
                let kw = if self == Op::IContains { "ILIKE" } else { "LIKE" };
                format!("{column} {kw} {}", quote(&pattern))
            }
            Op::Null => match value {
                Value::Bool(true) => format!("{column} IS NULL"),
                Value::Bool(false) => format!("{column} IS NOT NULL"),
                other => {
                    return Err(OrmError::sql_build(format!(
                        "'null' lookup on {column} expects a boolean, got {other:?}"
                    )));
                }
            },
            Op::HasKey => {
                let key = pattern_text(self, value)?;
                format!("{column} ? {}", quote(&key))
            }
            Op::HasKeys | Op::HasAnyKeys => {
                let keys = match value {
                    Value::Array(items) if !items.is_empty() => items
                        .iter()
                        .map(|k| pattern_text(self, k).map(|s| quote(&s)))
                        .collect::<OrmResult<Vec<_>>>()?,
                    other => {
                        return Err(OrmError::sql_build(format!(
                            "'{}' lookup on {column} expects a non-empty list of keys, got {other:?}",
                            self.name()
                        )));
                    }
                };
                let symbol = if self == Op::HasKeys { "?&" } else { "?|" };
                format!("{column} {symbol} ARRAY[{}]", keys.join(", "))
            }
        })
    }
}

fn pattern_text(op: Op, value: &Value) -> OrmResult<String> {
    match value {
        Value::Text(_) | Value::Int(_) | Value::Float(_) | Value::Uuid(_) => as_token(value),
        other => Err(OrmError::sql_build(format!(
            "'{}' lookup expects text, got {other:?}",
            op.name()
        ))),
    }
}

// ==================== Condition tree ====================

/// A boolean condition over lookup paths.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    /// Pairs joined with `AND`.
    All(Vec<(String, Value)>),
    /// Pairs joined with `OR`.
    Any(Vec<(String, Value)>),
    /// Sub-conditions joined with `AND`, each parenthesized.
    And(Vec<Cond>),
    /// Sub-conditions joined with `OR`, each parenthesized.
    Or(Vec<Cond>),
    Not(Box<Cond>),
    /// A raw SQL fragment.
    Raw(String),
}

impl Default for Cond {
    fn default() -> Self {
        Cond::All(Vec::new())
    }
}

impl Cond {
    /// An empty AND-joined set of pairs.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty OR-joined set of pairs.
    pub fn any() -> Self {
        Cond::Any(Vec::new())
    }

    /// Add a pair.
    ///
    /// On a group (`And`, `Or`, `Not`, `Raw`) the pair is AND-ed with it.
    pub fn with(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        let pair = (path.into(), value.into());
        match self {
            Cond::All(mut pairs) => {
                pairs.push(pair);
                Cond::All(pairs)
            }
            Cond::Any(mut pairs) => {
                pairs.push(pair);
                Cond::Any(pairs)
            }
            group => Cond::And(vec![group, Cond::All(vec![pair])]),
        }
    }

    pub fn and(conds: impl IntoIterator<Item = impl Into<Cond>>) -> Self {
        Cond::And(conds.into_iter().map(Into::into).collect())
    }

    pub fn or(conds: impl IntoIterator<Item = impl Into<Cond>>) -> Self {
        Cond::Or(conds.into_iter().map(Into::into).collect())
    }

    pub fn not(cond: impl Into<Cond>) -> Self {
        Cond::Not(Box::new(cond.into()))
    }

    /// A raw SQL fragment.
    ///
    /// Be careful with SQL injection when using raw conditions.
    pub fn raw(sql: impl Into<String>) -> Self {
        Cond::Raw(sql.into())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cond::All(pairs) | Cond::Any(pairs) => pairs.is_empty(),
            Cond::And(conds) | Cond::Or(conds) => conds.is_empty(),
            Cond::Not(inner) => inner.is_empty(),
            Cond::Raw(sql) => sql.trim().is_empty(),
        }
    }

    /// Compile to SQL, resolving each path with `resolve`.
    ///
    /// `resolve` turns one `(path, value)` pair into a predicate.
    pub fn compile<F>(&self, resolve: &mut F) -> OrmResult<String>
    where
        F: FnMut(&str, &Value) -> OrmResult<String>,
    {
        if self.is_empty() {
            return Err(OrmError::sql_build("empty condition"));
        }
        Ok(match self {
            Cond::All(pairs) => compile_pairs(pairs, " AND ", resolve)?,
            Cond::Any(pairs) => compile_pairs(pairs, " OR ", resolve)?,
            Cond::And(conds) => compile_group(conds, " AND ", resolve)?,
            Cond::Or(conds) => compile_group(conds, " OR ", resolve)?,
            Cond::Not(inner) => format!("NOT ({})", inner.compile(resolve)?),
            Cond::Raw(sql) => sql.clone(),
        })
    }
}

fn compile_pairs<F>(pairs: &[(String, Value)], joiner: &str, resolve: &mut F) -> OrmResult<String>
where
    F: FnMut(&str, &Value) -> OrmResult<String>,
{
    let parts = pairs
        .iter()
        .map(|(path, value)| resolve(path.as_str(), value))
        .collect::<OrmResult<Vec<_>>>()?;
    Ok(parts.join(joiner))
}

fn compile_group<F>(conds: &[Cond], joiner: &str, resolve: &mut F) -> OrmResult<String>
where
    F: FnMut(&str, &Value) -> OrmResult<String>,
{
    let mut parts = Vec::with_capacity(conds.len());
    for cond in conds.iter().filter(|c| !c.is_empty()) {
        parts.push(format!("({})", cond.compile(resolve)?));
    }
    Ok(parts.join(joiner))
}

impl<K: Into<String>, V: Into<Value>> From<(K, V)> for Cond {
    fn from((k, v): (K, V)) -> Self {
        Cond::All(vec![(k.into(), v.into())])
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Cond {
    fn from(pairs: [(K, V); N]) -> Self {
        Cond::All(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K: Into<String>, V: Into<Value>> From<Vec<(K, V)>> for Cond {
    fn from(pairs: Vec<(K, V)>) -> Self {
        Cond::All(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
