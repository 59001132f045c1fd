//! Single-statement mutations: INSERT, UPDATE, DELETE and upsert.

use super::Query;
use crate::error::{OrmError, OrmResult};
use crate::monitor::StatementKind;
use crate::record::{Record, Rows};
use crate::value::{Value, as_literal};
use chrono::Utc;

/// Conflict / match key: one or more column names.
///
/// ```ignore
/// book.query().upsert(rows, "isbn");
/// book.query().upsert(rows, ["author", "title"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key(Vec<String>);

impl Key {
    pub fn columns(&self) -> &[String] {
        &self.0
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.iter().any(|c| c == column)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn joined(&self) -> String {
        self.0.join(", ")
    }
}

impl From<&str> for Key {
    fn from(column: &str) -> Self {
        Key(vec![column.to_string()])
    }
}

impl From<String> for Key {
    fn from(column: String) -> Self {
        Key(vec![column])
    }
}

impl From<&[&str]> for Key {
    fn from(columns: &[&str]) -> Self {
        Key(columns.iter().map(|c| c.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Key {
    fn from(columns: [&str; N]) -> Self {
        Key(columns.iter().map(|c| c.to_string()).collect())
    }
}

impl From<Vec<&str>> for Key {
    fn from(columns: Vec<&str>) -> Self {
        Key(columns.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for Key {
    fn from(columns: Vec<String>) -> Self {
        Key(columns)
    }
}

/// Which field-collaborator check rows go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Mode {
    /// `validate_create`; auto-timestamp fields are stamped.
    Create,
    /// `validate_update`; `auto_now` fields are stamped.
    Update,
    /// Key lookups: present values are validated, nothing is added.
    Lookup,
}

impl Query {
    // ==================== INSERT ====================

    /// INSERT one record or many.
    ///
    /// Columns are the model fields present in any row, plus auto-timestamp
    /// fields and fields with a default. Rows missing a column take the field
    /// default or NULL.
    pub fn insert(self, rows: impl Into<Rows>) -> Self {
        self.insert_rows(rows.into(), None)
    }

    /// INSERT with an explicit column list.
    pub fn insert_columns(self, rows: impl Into<Rows>, columns: &[&str]) -> Self {
        self.insert_rows(rows.into(), Some(columns))
    }

    fn insert_rows(self, rows: Rows, columns: Option<&[&str]>) -> Self {
        self.chain(|q| {
            let (columns, records) = q.prepare_rows(rows, None, columns, Mode::Create, true)?;
            if records.is_empty() {
                return Err(OrmError::sql_build("insert needs at least one row"));
            }
            let body = if columns.is_empty() {
                if records.len() > 1 {
                    return Err(OrmError::sql_build(
                        "a multi-row insert needs at least one column",
                    ));
                }
                "DEFAULT VALUES".to_string()
            } else {
                let tuples = q.value_rows(&columns, &records, false);
                format!(
                    "({}) VALUES {}",
                    columns.join(", "),
                    q.render_values(&columns, &tuples, false)?
                )
            };
            q.insert = Some(body);
            Ok(())
        })
    }

    /// INSERT the rows produced by another statement.
    ///
    /// A SELECT source is inlined. A mutation source must have RETURNING and
    /// is wrapped as CTE `D`. With an empty `columns`, the source's output
    /// names are used.
    pub fn insert_from(self, source: Query, columns: &[&str]) -> Self {
        self.chain(|q| {
            let columns = q.source_columns(&source, columns)?;
            let body = q.embed_source(&source)?;
            q.insert = Some(format!("({}) {body}", columns.join(", ")));
            Ok(())
        })
    }

    pub(super) fn source_columns(
        &self,
        source: &Query,
        columns: &[&str],
    ) -> OrmResult<Vec<String>> {
        let columns: Vec<String> = if columns.is_empty() {
            source.output_names()
        } else {
            columns.iter().map(|c| c.to_string()).collect()
        };
        if columns.is_empty() {
            return Err(OrmError::sql_build(
                "cannot infer the column list from the source query; pass it explicitly",
            ));
        }
        for column in &columns {
            self.model.field_or_err(column)?;
        }
        Ok(columns)
    }

    fn embed_source(&mut self, source: &Query) -> OrmResult<String> {
        let sql = source.statement()?;
        match source.kind() {
            StatementKind::Select | StatementKind::Other => Ok(sql),
            _ if source.returning.is_empty() => Err(OrmError::sql_build(
                "a mutation used as a row source needs RETURNING",
            )),
            _ => {
                self.with.push(format!("D AS ({sql})"));
                Ok("SELECT * FROM D".to_string())
            }
        }
    }

    // ==================== UPDATE / DELETE ====================

    /// UPDATE the rows matched by the current WHERE with `record`.
    ///
    /// `auto_now` fields are stamped with the current time.
    pub fn update(self, record: Record) -> Self {
        self.chain(|q| {
            let mut record = record;
            for field in q.model.fields().filter(|f| f.is_auto_now()) {
                if !record.contains_key(field.name()) {
                    record.insert(field.name(), Value::DateTime(Utc::now()));
                }
            }
            let columns: Vec<String> = record.keys().map(str::to_string).collect();
            if columns.is_empty() {
                return Err(OrmError::sql_build("update needs at least one column"));
            }
            for column in &columns {
                q.model.field_or_err(column)?;
            }

            let record = if q.skip_validate {
                record
            } else {
                q.model.validate_update(&record, &columns)?
            };
            let sets = record
                .iter()
                .map(|(column, value)| Ok(format!("{column} = {}", as_literal(value)?)))
                .collect::<OrmResult<Vec<_>>>()?;
            q.update = Some(sets.join(", "));
            Ok(())
        })
    }

    /// DELETE the rows matched by the current WHERE.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// `RETURNING` the given fields.
    pub fn returning(self, columns: &[&str]) -> Self {
        self.chain(|q| {
            for column in columns {
                q.model.field_or_err(column)?;
                q.returning.push(format!("{}.{column}", q.alias));
                q.returning_names.push((*column).to_string());
            }
            Ok(())
        })
    }

    /// `RETURNING` every field.
    pub fn returning_all(mut self) -> Self {
        self.returning = vec![format!("{}.*", self.alias)];
        self.returning_names = self.model.field_names().to_vec();
        self
    }

    // ==================== Upsert ====================

    /// INSERT .. ON CONFLICT (key) DO UPDATE SET every non-key column.
    ///
    /// When no column besides the key remains, `DO NOTHING` is used.
    pub fn upsert(self, rows: impl Into<Rows>, key: impl Into<Key>) -> Self {
        self.upsert_rows(rows.into(), key.into(), None)
    }

    pub fn upsert_columns(
        self,
        rows: impl Into<Rows>,
        key: impl Into<Key>,
        columns: &[&str],
    ) -> Self {
        self.upsert_rows(rows.into(), key.into(), Some(columns))
    }

    fn upsert_rows(self, rows: Rows, key: Key, columns: Option<&[&str]>) -> Self {
        self.chain(|q| {
            let (columns, records) =
                q.prepare_rows(rows, Some(&key), columns, Mode::Create, false)?;
            let tuples = q.value_rows(&columns, &records, false);
            q.insert = Some(format!(
                "({}) VALUES {}",
                columns.join(", "),
                q.render_values(&columns, &tuples, false)?
            ));
            q.on_conflict = Some(q.conflict_action(&key, &columns));
            Ok(())
        })
    }

    /// Upsert the rows produced by another statement. `columns` is required.
    pub fn upsert_from(self, source: Query, key: impl Into<Key>, columns: &[&str]) -> Self {
        let key = key.into();
        self.chain(|q| {
            if columns.is_empty() {
                return Err(OrmError::sql_build(
                    "upsert from a query needs an explicit column list",
                ));
            }
            let columns = q.source_columns(&source, columns)?;
            q.check_key(&key, &columns)?;
            let body = q.embed_source(&source)?;
            q.insert = Some(format!("({}) {body}", columns.join(", ")));
            q.on_conflict = Some(q.conflict_action(&key, &columns));
            Ok(())
        })
    }

    fn conflict_action(&self, key: &Key, columns: &[String]) -> String {
        let sets: Vec<String> = columns
            .iter()
            .filter(|c| !key.contains(c))
            .filter(|c| {
                self.model
                    .field(c)
                    .is_some_and(|f| !f.is_primary_key() && !f.is_auto_now_add())
            })
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect();
        if sets.is_empty() {
            format!("({}) DO NOTHING", key.joined())
        } else {
            format!("({}) DO UPDATE SET {}", key.joined(), sets.join(", "))
        }
    }

    // ==================== Row preparation ====================

    /// Check keys, settle the column list and validate every row.
    pub(super) fn prepare_rows(
        &self,
        rows: Rows,
        key: Option<&Key>,
        columns: Option<&[&str]>,
        mode: Mode,
        with_defaults: bool,
    ) -> OrmResult<(Vec<String>, Vec<Record>)> {
        let batch = rows.is_batch();
        let rows = rows.into_vec();

        if let Some(key) = key {
            if key.is_empty() {
                return Err(OrmError::sql_build("key needs at least one column"));
            }
            if rows.is_empty() {
                return Err(OrmError::sql_build("no rows given"));
            }
            for column in key.columns() {
                self.model.field_or_err(column)?;
            }
            for (index, row) in rows.iter().enumerate() {
                if let Some(missing) = key.columns().iter().find(|k| !row.contains_key(k)) {
                    return Err(OrmError::sql_build(format!(
                        "row {index} is missing key column '{missing}'"
                    )));
                }
            }
        }

        let columns: Vec<String> = match columns {
            Some(columns) => {
                for column in columns {
                    self.model.field_or_err(column)?;
                }
                columns.iter().map(|c| c.to_string()).collect()
            }
            None => self.infer_columns(&rows, mode, with_defaults)?,
        };

        if let Some(key) = key {
            self.check_key(key, &columns)?;
        }

        if self.skip_validate {
            return Ok((columns, rows));
        }

        let records = rows
            .iter()
            .enumerate()
            .map(|(index, row)| {
                let checked = match mode {
                    Mode::Create => self.model.validate_create(row, &columns),
                    Mode::Update => self.model.validate_update(row, &columns),
                    Mode::Lookup => self.validate_lookup(row, &columns),
                };
                checked.map_err(|e| if batch { e.at_row(index) } else { e })
            })
            .collect::<OrmResult<Vec<_>>>()?;
        Ok((columns, records))
    }

    pub(super) fn check_key(&self, key: &Key, columns: &[String]) -> OrmResult<()> {
        if columns.is_empty() {
            return Err(OrmError::sql_build("column list is empty"));
        }
        if let Some(missing) = key.columns().iter().find(|k| !columns.contains(k)) {
            return Err(OrmError::sql_build(format!(
                "column list must include key column '{missing}'"
            )));
        }
        Ok(())
    }

    fn infer_columns(
        &self,
        rows: &[Record],
        mode: Mode,
        with_defaults: bool,
    ) -> OrmResult<Vec<String>> {
        for row in rows {
            for column in row.keys() {
                self.model.field_or_err(column)?;
            }
        }
        Ok(self
            .model
            .fields()
            .filter(|f| {
                rows.iter().any(|r| r.contains_key(f.name()))
                    || match mode {
                        Mode::Create => {
                            f.is_auto_timestamp() || (with_defaults && f.has_default())
                        }
                        Mode::Update => f.is_auto_now(),
                        Mode::Lookup => false,
                    }
            })
            .map(|f| f.name().to_string())
            .collect())
    }

    fn validate_lookup(&self, row: &Record, columns: &[String]) -> OrmResult<Record> {
        let mut out = Record::new();
        for column in columns {
            let field = self.model.field_or_err(column)?;
            let Some(value) = row.get(column) else {
                continue;
            };
            let value = field
                .validate(value.clone())
                .map_err(|m| field.error(m))?;
            out.insert(column.clone(), field.prepare_for_db(value));
        }
        Ok(out)
    }

    /// Transpose records into value tuples ordered like `columns`.
    ///
    /// Missing cells take the field default, the current time for
    /// auto-timestamp fields, or NULL. `DEFAULT` is not valid inside a CTE, so
    /// `for_cte` turns it into NULL.
    pub(super) fn value_rows(
        &self,
        columns: &[String],
        records: &[Record],
        for_cte: bool,
    ) -> Vec<Vec<Value>> {
        records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|column| {
                        let value = match record.get(column) {
                            Some(v) => v.clone(),
                            None => self.fill_value(column),
                        };
                        match value {
                            Value::Default if for_cte => Value::Null,
                            v => v,
                        }
                    })
                    .collect()
            })
            .collect()
    }

    fn fill_value(&self, column: &str) -> Value {
        let Some(field) = self.model.field(column) else {
            return Value::Null;
        };
        if let Some(default) = field.get_default() {
            return field.prepare_for_db(default);
        }
        if field.is_auto_timestamp() {
            return Value::DateTime(Utc::now());
        }
        Value::Null
    }

    /// Render tuples as `(a, b), (c, d)`.
    ///
    /// With `cast`, the first tuple's values are cast to the column types so
    /// a VALUES list has typed columns.
    pub(super) fn render_values(
        &self,
        columns: &[String],
        tuples: &[Vec<Value>],
        cast: bool,
    ) -> OrmResult<String> {
        let mut out = Vec::with_capacity(tuples.len());
        for (index, tuple) in tuples.iter().enumerate() {
            if tuple.len() != columns.len() {
                return Err(OrmError::sql_build(format!(
                    "row {index} has {} values for {} columns",
                    tuple.len(),
                    columns.len()
                )));
            }
            let mut parts = Vec::with_capacity(tuple.len());
            for (value, column) in tuple.iter().zip(columns) {
                let literal = as_literal(value)?;
                match self.model.field(column) {
                    Some(field) if cast && index == 0 => {
                        parts.push(format!("{literal}::{}", field.db_type()));
                    }
                    _ => parts.push(literal),
                }
            }
            out.push(format!("({})", parts.join(", ")));
        }
        Ok(out.join(", "))
    }
}
