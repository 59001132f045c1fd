//! Terminal operations: run the statement through a [`QueryRunner`].

use super::Query;
use crate::client::{QueryRunner, Row};
use crate::condition::Cond;
use crate::error::{OrmError, OrmResult};
use crate::ident::SEPARATOR;
use crate::record::Record;
use crate::value::Value;

impl Query {
    /// Run the statement and return the rows as read.
    pub async fn execr(&self, runner: &impl QueryRunner) -> OrmResult<Vec<Row>> {
        let sql = self.statement()?;
        tracing::trace!(
            target: "pgmodel.sql",
            table = %self.model.table_name(),
            kind = ?self.kind(),
            sql = %sql,
            "executing built statement"
        );
        runner.query(&sql).await
    }

    /// Run the statement and return records loaded through the model's
    /// fields (unless [`raw`](Self::raw) was set).
    pub async fn exec(&self, runner: &impl QueryRunner) -> OrmResult<Vec<Record>> {
        let rows = self.execr(runner).await?;
        if self.raw {
            return Ok(rows.into_iter().map(Row::into_record).collect());
        }
        rows.into_iter().map(|row| self.load_row(row)).collect()
    }

    /// Run the statement and return positional value arrays.
    pub async fn exec_compact(&self, runner: &impl QueryRunner) -> OrmResult<Vec<Vec<Value>>> {
        let rows = self.execr(runner).await?;
        Ok(rows.into_iter().map(Row::into_values).collect())
    }

    /// Fetch exactly one record, optionally AND-ing `cond` first.
    ///
    /// - 0 rows: [`OrmError::NotFound`]
    /// - more than 1 row: [`OrmError::TooManyRows`]
    pub async fn get(self, runner: &impl QueryRunner, cond: Option<Cond>) -> OrmResult<Record> {
        let query = match cond {
            Some(cond) => self.filter(cond),
            None => self,
        };
        let mut records = query.exec(runner).await?;
        match records.len() {
            0 => Err(OrmError::not_found(format!(
                "no '{}' record matched",
                query.model.table_name()
            ))),
            1 => Ok(records.remove(0)),
            got => Err(OrmError::too_many_rows(1, got)),
        }
    }

    /// `SELECT COUNT(*) FROM (statement) AS t`
    pub fn to_count_sql(&self) -> OrmResult<String> {
        Ok(format!("SELECT COUNT(*) FROM ({}) AS t", self.statement()?))
    }

    /// Count the rows this query matches.
    pub async fn count(&self, runner: &impl QueryRunner) -> OrmResult<i64> {
        let sql = self.to_count_sql()?;
        let rows = runner.query(&sql).await?;
        let value = rows
            .first()
            .and_then(|row| row.values().first())
            .ok_or_else(|| OrmError::decode("count", "count query returned no rows"))?;
        match value {
            Value::Int(n) => Ok(*n),
            Value::Text(s) => s
                .parse::<i64>()
                .map_err(|e| OrmError::decode("count", e.to_string())),
            other => Err(OrmError::decode("count", format!("unexpected value {other:?}"))),
        }
    }

    /// Load one row: model columns through their fields, `fk__sub` columns of
    /// a `load_fk` into a nested record under `fk`.
    fn load_row(&self, row: Row) -> OrmResult<Record> {
        let mut out = Record::new();
        let mut nested: Vec<(String, Record)> = Vec::new();

        for (column, value) in row.into_record() {
            if let Some((fk, sub)) = column.split_once(SEPARATOR) {
                if let Some(load) = self.load_fk.iter().find(|l| l.name == fk) {
                    let value = match load.target.field(sub) {
                        Some(field) => field.load(value)?,
                        None => value,
                    };
                    match nested.iter_mut().find(|(name, _)| name == fk) {
                        Some((_, record)) => {
                            record.insert(sub, value);
                        }
                        None => nested.push((fk.to_string(), Record::new().with(sub, value))),
                    }
                    continue;
                }
            }
            let value = match self.model.field(&column) {
                Some(field) => field.load(value)?,
                None => value,
            };
            out.insert(column, value);
        }

        for (fk, record) in nested {
            let value = if record.iter().all(|(_, v)| v.is_null()) {
                Value::Null
            } else {
                Value::Record(record)
            };
            out.insert(fk, value);
        }
        Ok(out)
    }
}
