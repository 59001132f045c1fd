//! Identifier rules for table and column names.
//!
//! Model and field names are interpolated into SQL unquoted, so they are
//! checked once at schema-build time:
//!
//! - must match `[A-Za-z_][A-Za-z0-9_]*`
//! - must not be a PostgreSQL reserved keyword
//! - must not contain the path separator [`SEPARATOR`], which would make
//!   lookup paths ambiguous

use crate::error::{OrmError, OrmResult};

/// Separator between segments of a lookup path (`blog_id__name__contains`).
pub const SEPARATOR: &str = "__";

/// PostgreSQL reserved key words (SQL Key Words appendix, "reserved" column).
const RESERVED: &[&str] = &[
    "all",
    "analyse",
    "analyze",
    "and",
    "any",
    "array",
    "as",
    "asc",
    "asymmetric",
    "authorization",
    "binary",
    "both",
    "case",
    "cast",
    "check",
    "collate",
    "collation",
    "column",
    "concurrently",
    "constraint",
    "create",
    "cross",
    "current_catalog",
    "current_date",
    "current_role",
    "current_schema",
    "current_time",
    "current_timestamp",
    "current_user",
    "default",
    "deferrable",
    "desc",
    "distinct",
    "do",
    "else",
    "end",
    "except",
    "false",
    "fetch",
    "for",
    "foreign",
    "freeze",
    "from",
    "full",
    "grant",
    "group",
    "having",
    "ilike",
    "in",
    "initially",
    "inner",
    "intersect",
    "into",
    "is",
    "isnull",
    "join",
    "lateral",
    "leading",
    "left",
    "like",
    "limit",
    "localtime",
    "localtimestamp",
    "natural",
    "not",
    "notnull",
    "null",
    "offset",
    "on",
    "only",
    "or",
    "order",
    "outer",
    "overlaps",
    "placing",
    "primary",
    "references",
    "returning",
    "right",
    "select",
    "session_user",
    "similar",
    "some",
    "symmetric",
    "system_user",
    "table",
    "tablesample",
    "then",
    "to",
    "trailing",
    "true",
    "union",
    "unique",
    "user",
    "using",
    "variadic",
    "verbose",
    "when",
    "where",
    "window",
    "with",
];

/// Returns `true` if `name` is a reserved keyword (case-insensitive).
pub fn is_reserved(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    RESERVED.binary_search(&lower.as_str()).is_ok()
}

/// Validate a table or column name.
///
/// `what` names the thing being checked and is only used in the error message.
pub fn check_identifier(what: &str, name: &str) -> OrmResult<()> {
    if name.is_empty() {
        return Err(OrmError::schema(format!("{what} name cannot be empty")));
    }

    let mut chars = name.chars();
    if let Some(first) = chars.next() {
        if !(first == '_' || first.is_ascii_alphabetic()) {
            return Err(OrmError::schema(format!(
                "invalid start character '{first}' in {what} name '{name}'"
            )));
        }
    }
    for c in chars {
        if !(c == '_' || c.is_ascii_alphanumeric()) {
            return Err(OrmError::schema(format!(
                "invalid character '{c}' in {what} name '{name}'"
            )));
        }
    }

    if name.contains(SEPARATOR) {
        return Err(OrmError::schema(format!(
            "{what} name '{name}' cannot contain '{SEPARATOR}'"
        )));
    }
    if is_reserved(name) {
        return Err(OrmError::schema(format!(
            "{what} name '{name}' is a reserved SQL keyword"
        )));
    }
    Ok(())
}
