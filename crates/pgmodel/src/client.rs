//! Query collaborator: the one seam between statement building and the network.
//!
//! Statements built by this crate carry their values inline, so runners use
//! the simple-query protocol and every column arrives as text. Rows are then
//! loaded through the model's fields by [`Query::exec`](crate::Query::exec).

use crate::error::{OrmError, OrmResult};
use crate::record::Record;
use crate::value::Value;
use std::sync::Arc;
use tokio_postgres::SimpleQueryMessage;

/// A result row as returned by a [`QueryRunner`].
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row. `values` is positional and must match `columns`.
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Get a value by column name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.values.get(idx)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Pair every value with its column name.
    pub fn into_record(self) -> Record {
        self.columns.iter().cloned().zip(self.values).collect()
    }
}

/// Something that can run a SQL string and return rows.
///
/// Implemented for `tokio_postgres::Client`, `tokio_postgres::Transaction`,
/// and (with the `pool` feature) `deadpool_postgres::Client` and
/// `deadpool_postgres::Pool`. Tests implement it with an in-memory recorder.
pub trait QueryRunner: Send + Sync {
    /// Run `sql` and return every row it produced.
    fn query(&self, sql: &str) -> impl std::future::Future<Output = OrmResult<Vec<Row>>> + Send;
}

impl<R: QueryRunner> QueryRunner for &R {
    fn query(&self, sql: &str) -> impl std::future::Future<Output = OrmResult<Vec<Row>>> + Send {
        (**self).query(sql)
    }
}

impl QueryRunner for tokio_postgres::Client {
    async fn query(&self, sql: &str) -> OrmResult<Vec<Row>> {
        let messages = self
            .simple_query(sql)
            .await
            .map_err(OrmError::from_db_error)?;
        Ok(rows_from_messages(messages))
    }
}

impl QueryRunner for tokio_postgres::Transaction<'_> {
    async fn query(&self, sql: &str) -> OrmResult<Vec<Row>> {
        let messages = self
            .simple_query(sql)
            .await
            .map_err(OrmError::from_db_error)?;
        Ok(rows_from_messages(messages))
    }
}

#[cfg(feature = "pool")]
impl QueryRunner for deadpool_postgres::Client {
    async fn query(&self, sql: &str) -> OrmResult<Vec<Row>> {
        // Delegate to the deref target (tokio_postgres::Client).
        let client: &tokio_postgres::Client = self;
        QueryRunner::query(client, sql).await
    }
}

/// Convert simple-query messages into rows.
///
/// Column names are shared between the rows of one result.
pub(crate) fn rows_from_messages(messages: Vec<SimpleQueryMessage>) -> Vec<Row> {
    let mut columns: Option<Arc<[String]>> = None;
    let mut rows = Vec::new();
    for message in messages {
        let SimpleQueryMessage::Row(row) = message else {
            continue;
        };
        let cols = columns
            .get_or_insert_with(|| row.columns().iter().map(|c| c.name().to_string()).collect())
            .clone();
        let values = (0..row.len())
            .map(|i| match row.get(i) {
                Some(s) => Value::Text(s.to_string()),
                None => Value::Null,
            })
            .collect();
        rows.push(Row::new(cols, values));
    }
    rows
}
