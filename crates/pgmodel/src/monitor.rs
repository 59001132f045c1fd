//! Statement logging.
//!
//! [`LoggedRunner`] wraps any [`QueryRunner`] and emits a `tracing` event
//! (target `pgmodel.sql`) for every statement it runs: the statement kind,
//! the (optionally truncated) SQL, elapsed time and row count. Slow
//! statements are reported at WARN and failures at ERROR.
//!
//! # Example
//!
//! ```rust,ignore
//! use pgmodel::monitor::{LogConfig, LoggedRunner};
//! use std::time::Duration;
//! use tracing::Level;
//!
//! let config = LogConfig::new()
//!     .with_level(Level::INFO)
//!     .with_slow_query_threshold(Duration::from_millis(250));
//!
//! let runner = LoggedRunner::new(client, config);
//! let rows = book.query().filter(("price__lt", 10)).exec(&runner).await?;
//! ```

use crate::client::{QueryRunner, Row};
use crate::error::OrmResult;
use std::time::{Duration, Instant};
use tracing::Level;

/// The kind of SQL statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    /// Anything else (DDL, utility statements).
    Other,
}

impl StatementKind {
    /// Detect the kind from SQL text.
    ///
    /// For `WITH ..` statements the CTE definitions are skipped and the final
    /// statement keyword decides.
    pub fn from_sql(sql: &str) -> Self {
        let trimmed = sql.trim_start();
        if starts_with_keyword(trimmed, "SELECT") || trimmed.starts_with('(') {
            StatementKind::Select
        } else if starts_with_keyword(trimmed, "INSERT") {
            StatementKind::Insert
        } else if starts_with_keyword(trimmed, "UPDATE") {
            StatementKind::Update
        } else if starts_with_keyword(trimmed, "DELETE") {
            StatementKind::Delete
        } else if starts_with_keyword(trimmed, "WITH") {
            Self::after_ctes(trimmed)
        } else {
            StatementKind::Other
        }
    }

    /// Find the statement that follows the CTE list.
    ///
    /// A top-level `)` followed by `,` or `AS` is still inside the list; the
    /// first one followed by anything else closes it.
    fn after_ctes(sql: &str) -> Self {
        let bytes = sql.as_bytes();
        let mut depth: i32 = 0;
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        let rest = sql[i + 1..].trim_start();
                        if !rest.starts_with(',') && !starts_with_keyword(rest, "AS") {
                            return Self::final_keyword(rest);
                        }
                    }
                }
                b'\'' => {
                    // skip literal, '' is an escaped quote
                    i += 1;
                    while i < bytes.len() {
                        if bytes[i] == b'\'' {
                            if bytes.get(i + 1) == Some(&b'\'') {
                                i += 1;
                            } else {
                                break;
                            }
                        }
                        i += 1;
                    }
                }
                _ => {}
            }
            i += 1;
        }
        StatementKind::Other
    }

    fn final_keyword(rest: &str) -> Self {
        if starts_with_keyword(rest, "INSERT") {
            StatementKind::Insert
        } else if starts_with_keyword(rest, "UPDATE") {
            StatementKind::Update
        } else if starts_with_keyword(rest, "DELETE") {
            StatementKind::Delete
        } else {
            StatementKind::Select
        }
    }
}

fn starts_with_keyword(sql: &str, keyword: &str) -> bool {
    sql.len() >= keyword.len()
        && sql.as_bytes()[..keyword.len()].eq_ignore_ascii_case(keyword.as_bytes())
        && sql
            .as_bytes()
            .get(keyword.len())
            .is_none_or(|b| !(b.is_ascii_alphanumeric() || *b == b'_'))
}

/// Configuration for [`LoggedRunner`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level of the per-statement event.
    pub level: Level,
    /// Truncate logged SQL to this many bytes. `None` logs it whole.
    pub max_sql_length: Option<usize>,
    /// Statements slower than this are logged at WARN.
    pub slow_query_threshold: Option<Duration>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            max_sql_length: Some(200),
            slow_query_threshold: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_max_sql_length(mut self, len: usize) -> Self {
        self.max_sql_length = Some(len);
        self
    }

    /// Log SQL without truncation.
    pub fn no_truncate(mut self) -> Self {
        self.max_sql_length = None;
        self
    }

    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = Some(threshold);
        self
    }

    fn display_sql<'a>(&self, sql: &'a str) -> std::borrow::Cow<'a, str> {
        match self.max_sql_length {
            Some(max) if sql.len() > max => {
                format!("{}...", truncate_sql_bytes(sql, max)).into()
            }
            _ => sql.into(),
        }
    }
}

/// Cut `sql` to at most `max_bytes`, on a char boundary.
pub(crate) fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}

/// A [`QueryRunner`] that logs every statement it runs.
#[derive(Debug, Clone)]
pub struct LoggedRunner<R> {
    inner: R,
    config: LogConfig,
}

impl<R: QueryRunner> LoggedRunner<R> {
    pub fn new(inner: R, config: LogConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: QueryRunner> QueryRunner for LoggedRunner<R> {
    async fn query(&self, sql: &str) -> OrmResult<Vec<Row>> {
        /// Dispatch a tracing event at a runtime-determined level.
        macro_rules! emit_at_level {
            ($level:expr, $($field:tt)*) => {
                match $level {
                    Level::ERROR => tracing::error!($($field)*),
                    Level::WARN  => tracing::warn!($($field)*),
                    Level::INFO  => tracing::info!($($field)*),
                    Level::DEBUG => tracing::debug!($($field)*),
                    Level::TRACE => tracing::trace!($($field)*),
                }
            };
        }

        let kind = StatementKind::from_sql(sql);
        let shown = self.config.display_sql(sql);
        let start = Instant::now();
        let result = self.inner.query(sql).await;
        let elapsed = start.elapsed();
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

        match &result {
            Ok(rows) => {
                let slow = self
                    .config
                    .slow_query_threshold
                    .is_some_and(|threshold| elapsed > threshold);
                if slow {
                    tracing::warn!(
                        target: "pgmodel.sql",
                        kind = ?kind,
                        elapsed_ms,
                        rows = rows.len(),
                        sql = %shown,
                        "slow statement"
                    );
                } else {
                    emit_at_level!(
                        self.config.level,
                        target: "pgmodel.sql",
                        kind = ?kind,
                        elapsed_ms,
                        rows = rows.len(),
                        sql = %shown,
                        "statement"
                    );
                }
            }
            Err(err) => {
                tracing::error!(
                    target: "pgmodel.sql",
                    kind = ?kind,
                    elapsed_ms,
                    error = %err,
                    sql = %shown,
                    "statement failed"
                );
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_plain_statements() {
        assert_eq!(StatementKind::from_sql("SELECT * FROM book T"), StatementKind::Select);
        assert_eq!(
            StatementKind::from_sql("  insert into book AS T (a) VALUES (1)"),
            StatementKind::Insert
        );
        assert_eq!(StatementKind::from_sql("UPDATE book T SET a = 1"), StatementKind::Update);
        assert_eq!(StatementKind::from_sql("DELETE FROM book T"), StatementKind::Delete);
        assert_eq!(StatementKind::from_sql("CREATE TABLE x (a int)"), StatementKind::Other);
        assert_eq!(StatementKind::from_sql("SELECTED"), StatementKind::Other);
    }

    #[test]
    fn detects_statement_after_ctes() {
        let sql = "WITH V(name) AS (VALUES ('a)'::varchar(255))), new_records AS (SELECT V.* FROM V) \
                   INSERT INTO blog AS T (name) SELECT * FROM new_records";
        assert_eq!(StatementKind::from_sql(sql), StatementKind::Insert);

        let sql = "WITH V(id) AS (VALUES (1)) UPDATE blog T SET name = V.name FROM V WHERE T.id = V.id";
        assert_eq!(StatementKind::from_sql(sql), StatementKind::Update);

        let sql = "WITH D AS (SELECT name FROM blog T) INSERT INTO archive AS T (name) SELECT * FROM D";
        assert_eq!(StatementKind::from_sql(sql), StatementKind::Insert);

        let sql = "WITH cheap AS (SELECT * FROM book T) SELECT * FROM book T WHERE T.id IN (SELECT id FROM cheap)";
        assert_eq!(StatementKind::from_sql(sql), StatementKind::Select);

        let sql = "WITH V(id) AS (VALUES (1)) DELETE FROM blog T USING V WHERE T.id = V.id";
        assert_eq!(StatementKind::from_sql(sql), StatementKind::Delete);
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate_sql_bytes("héllo", 2), "h");
        assert_eq!(truncate_sql_bytes("abc", 10), "abc");
        let config = LogConfig::new().with_max_sql_length(3);
        assert_eq!(config.display_sql("SELECT 1"), "SEL...");
    }
}
