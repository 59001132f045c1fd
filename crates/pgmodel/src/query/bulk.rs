//! Multi-row statements built on a `V(cols) AS (VALUES ..)` CTE.
//!
//! The first VALUES tuple is cast to the column types
//! (`'First Blog'::varchar(255)`) so PostgreSQL types the CTE columns from the
//! model instead of guessing from literals.

use super::Query;
use super::mutation::{Key, Mode};
use crate::error::{OrmError, OrmResult};
use crate::record::{Record, Rows};

impl Query {
    /// INSERT only the rows whose key does not exist yet.
    ///
    /// ```text
    /// WITH V(name) AS (VALUES ('First Blog'::varchar(255)), ('New Blog')),
    ///   new_records AS (SELECT V.* FROM V LEFT JOIN blog ON (V.name = blog.name)
    ///                   WHERE blog.name IS NULL)
    /// INSERT INTO blog AS T (name) SELECT * FROM new_records
    /// ```
    pub fn merge(self, rows: impl Into<Rows>, key: impl Into<Key>) -> Self {
        self.merge_rows(rows.into(), key.into(), None)
    }

    pub fn merge_columns(
        self,
        rows: impl Into<Rows>,
        key: impl Into<Key>,
        columns: &[&str],
    ) -> Self {
        self.merge_rows(rows.into(), key.into(), Some(columns))
    }

    fn merge_rows(self, rows: Rows, key: Key, columns: Option<&[&str]>) -> Self {
        self.chain(|q| {
            let (columns, records) =
                q.prepare_rows(rows, Some(&key), columns, Mode::Create, false)?;
            let values = q.values_cte(&columns, &records)?;

            let table = q.model.table_name().to_string();
            let mut on = Vec::with_capacity(key.columns().len());
            for column in key.columns() {
                on.push(format!("V.{column} = {}", q.qualified(column)?));
            }
            let first = q.qualified(&key.columns()[0])?;

            q.with.push(values);
            q.with.push(format!(
                "new_records AS (SELECT V.* FROM V LEFT JOIN {table} ON ({}) WHERE {first} IS NULL)",
                on.join(" AND ")
            ));
            q.insert = Some(format!("({}) SELECT * FROM new_records", columns.join(", ")));
            Ok(())
        })
    }

    /// UPDATE many rows at once, matching on `key`.
    ///
    /// ```text
    /// WITH V(id, name) AS (VALUES (1::integer, 'a'::varchar(255)), (2, 'b'))
    /// UPDATE blog T SET name = V.name FROM V WHERE T.id = V.id
    /// ```
    pub fn updates(self, rows: impl Into<Rows>, key: impl Into<Key>) -> Self {
        self.updates_rows(rows.into(), key.into(), None)
    }

    pub fn updates_columns(
        self,
        rows: impl Into<Rows>,
        key: impl Into<Key>,
        columns: &[&str],
    ) -> Self {
        self.updates_rows(rows.into(), key.into(), Some(columns))
    }

    fn updates_rows(self, rows: Rows, key: Key, columns: Option<&[&str]>) -> Self {
        self.chain(|q| {
            let (columns, records) =
                q.prepare_rows(rows, Some(&key), columns, Mode::Update, false)?;
            let values = q.values_cte(&columns, &records)?;
            q.with.push(values);
            q.set_from_values(&key, &columns)
        })
    }

    /// UPDATE from the rows another statement produces (a SELECT, or a
    /// mutation's RETURNING output). With an empty `columns`, the source's
    /// output names are used.
    pub fn updates_from(self, source: Query, key: impl Into<Key>, columns: &[&str]) -> Self {
        let key = key.into();
        self.chain(|q| {
            let columns = q.source_columns(&source, columns)?;
            q.check_key(&key, &columns)?;
            q.with
                .push(format!("V({}) AS ({})", columns.join(", "), source.statement()?));
            q.set_from_values(&key, &columns)
        })
    }

    fn set_from_values(&mut self, key: &Key, columns: &[String]) -> OrmResult<()> {
        let sets: Vec<String> = columns
            .iter()
            .filter(|c| !key.contains(c))
            .map(|c| format!("{c} = V.{c}"))
            .collect();
        if sets.is_empty() {
            return Err(OrmError::sql_build(
                "updates needs at least one column besides the key",
            ));
        }
        let matches: Vec<String> = key
            .columns()
            .iter()
            .map(|k| format!("{}.{k} = V.{k}", self.alias))
            .collect();

        self.update = Some(sets.join(", "));
        self.sources.push("V".to_string());
        self.fixed_where.push(matches.join(" AND "));
        Ok(())
    }

    /// SELECT the rows whose key tuples are listed.
    ///
    /// Every record names the same key columns:
    /// ```text
    /// WITH V(id) AS (VALUES (1::integer), (2)) SELECT T.* FROM V INNER JOIN blog T ON (V.id = T.id)
    /// ```
    pub fn get_multiple(self, keys: impl Into<Rows>) -> Self {
        self.get_multiple_rows(keys.into(), None)
    }

    /// [`get_multiple`](Self::get_multiple) matching only on `columns`.
    pub fn get_multiple_columns(self, keys: impl Into<Rows>, columns: &[&str]) -> Self {
        self.get_multiple_rows(keys.into(), Some(columns))
    }

    fn get_multiple_rows(self, keys: Rows, columns: Option<&[&str]>) -> Self {
        self.chain(|q| {
            let (columns, records) = q.prepare_rows(keys, None, columns, Mode::Lookup, false)?;
            if columns.is_empty() || records.is_empty() {
                return Err(OrmError::sql_build("get_multiple needs at least one key"));
            }
            q.check_complete(&columns, &records)?;

            let values = q.values_cte(&columns, &records)?;
            let on = q.match_values(&columns);
            q.with.push(values);
            q.from = Some(format!(
                "V INNER JOIN {} {} ON ({on})",
                q.model.table_name(),
                q.alias
            ));
            Ok(())
        })
    }

    /// SELECT the given rows left-joined with the stored rows sharing their key.
    ///
    /// Every input column comes back as given (`V.*`); the remaining fields
    /// come from the table and are NULL for keys that do not exist yet.
    pub fn get_merge(self, rows: impl Into<Rows>, key: impl Into<Key>) -> Self {
        let rows = rows.into();
        let key = key.into();
        self.chain(|q| {
            let (columns, records) = q.prepare_rows(rows, Some(&key), None, Mode::Lookup, false)?;
            q.check_complete(&columns, &records)?;

            let values = q.values_cte(&columns, &records)?;
            let on = q.match_values(key.columns());
            q.with.push(values);
            q.from = Some(format!(
                "V LEFT JOIN {} {} ON ({on})",
                q.model.table_name(),
                q.alias
            ));
            q.select = std::iter::once("V.*".to_string())
                .chain(
                    q.model
                        .field_names()
                        .iter()
                        .filter(|f| !columns.contains(f))
                        .map(|f| format!("{}.{f}", q.alias)),
                )
                .collect();
            q.output.clear();
            Ok(())
        })
    }

    // ==================== Helpers ====================

    /// `V(cols) AS (VALUES ..)`
    fn values_cte(&self, columns: &[String], records: &[Record]) -> OrmResult<String> {
        let tuples = self.value_rows(columns, records, true);
        Ok(format!(
            "V({}) AS (VALUES {})",
            columns.join(", "),
            self.render_values(columns, &tuples, true)?
        ))
    }

    /// `V.a = T.a AND V.b = T.b`
    fn match_values(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| format!("V.{c} = {}.{c}", self.alias))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn qualified(&self, column: &str) -> OrmResult<String> {
        self.model
            .qualified(column)
            .map(str::to_string)
            .ok_or_else(|| OrmError::sql_build(format!("unknown column '{column}'")))
    }

    /// Lookup rows must all name the same columns.
    fn check_complete(&self, columns: &[String], records: &[Record]) -> OrmResult<()> {
        for (index, record) in records.iter().enumerate() {
            if let Some(missing) = columns.iter().find(|c| !record.contains_key(c)) {
                return Err(OrmError::sql_build(format!(
                    "row {index} is missing column '{missing}'"
                )));
            }
        }
        Ok(())
    }
}
