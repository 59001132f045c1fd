//! Model declarations and the schema composer.
//!
//! A model is declared with [`ModelOptions`] and built once with
//! [`Model::build`], which runs three steps:
//!
//! 1. **normalize**: collect this declaration's fields, then fold mixins and
//!    the `extends` parent into one flat field map (child options win, mixins
//!    are merged pairwise left to right)
//! 2. **check**: identifiers, primary key count, foreign key targets
//! 3. **finalize**: add the implicit `id` primary key, resolve database types,
//!    and build the name/label/qualified caches
//!
//! The result is an immutable `Arc<Model>` shared by every query.
//!
//! # Example
//! ```ignore
//! use pgmodel::{FieldOptions, Model, ModelOptions};
//!
//! let blog = Model::build(
//!     ModelOptions::new("blog")
//!         .field(FieldOptions::char("name", 255).unique())
//!         .field(FieldOptions::integer("rating").default(0)),
//! )?;
//!
//! let entry = Model::build(
//!     ModelOptions::new("entry")
//!         .field(FieldOptions::foreign_key("blog_id", &blog))
//!         .field(FieldOptions::text("headline")),
//! )?;
//! ```

use crate::error::{OrmError, OrmResult};
use crate::field::{Field, FieldOptions, FieldType, Reference};
use crate::ident::check_identifier;
use crate::query::Query;
use crate::record::Record;
use crate::value::Value;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the primary key added when a model declares none.
pub const AUTO_PRIMARY_KEY: &str = "id";

/// A model declaration.
#[derive(Debug, Clone, Default)]
pub struct ModelOptions {
    table_name: Option<String>,
    fields: Vec<FieldOptions>,
    mixins: Vec<ModelOptions>,
    extends: Option<Box<ModelOptions>>,
}

impl ModelOptions {
    /// Declare a concrete model for `table_name`.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: Some(table_name.into()),
            ..Self::default()
        }
    }

    /// Declare a mixin: fields only, no table.
    pub fn mixin() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: FieldOptions) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = FieldOptions>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Fold a mixin's fields into this model.
    pub fn with_mixin(mut self, mixin: ModelOptions) -> Self {
        self.mixins.push(mixin);
        self
    }

    /// Inherit every field of an already-built model.
    pub fn extends(mut self, parent: &Model) -> Self {
        self.extends = Some(Box::new(parent.declaration.clone()));
        self
    }
}

// ==================== Normalize ====================

/// A declaration flattened into one ordered field map.
#[derive(Debug, Clone, Default)]
struct Normalized {
    table_name: Option<String>,
    order: Vec<String>,
    fields: HashMap<String, FieldOptions>,
}

impl Normalized {
    fn into_options(self) -> ModelOptions {
        let Normalized {
            table_name,
            order,
            mut fields,
        } = self;
        ModelOptions {
            table_name,
            fields: order.iter().filter_map(|n| fields.remove(n)).collect(),
            ..ModelOptions::default()
        }
    }
}

fn normalize(options: &ModelOptions) -> OrmResult<Normalized> {
    let mut own = Normalized {
        table_name: options.table_name.clone(),
        ..Normalized::default()
    };
    for field in &options.fields {
        if own.fields.contains_key(&field.name) {
            return Err(OrmError::schema(format!(
                "field '{}' is declared twice",
                field.name
            )));
        }
        own.order.push(field.name.clone());
        own.fields.insert(field.name.clone(), field.clone());
    }

    let mut parents = Vec::with_capacity(options.mixins.len() + 1);
    if let Some(parent) = &options.extends {
        parents.push(normalize(parent)?);
    }
    for mixin in &options.mixins {
        parents.push(normalize(mixin)?);
    }

    Ok(match parents.into_iter().reduce(merge) {
        Some(base) => merge(base, own),
        None => own,
    })
}

/// Shallow merge: `child` options win; parent field order comes first.
fn merge(parent: Normalized, child: Normalized) -> Normalized {
    let Normalized {
        table_name,
        mut order,
        mut fields,
    } = parent;

    for name in child.order {
        let Some(opts) = child.fields.get(&name).cloned() else {
            continue;
        };
        let merged = match fields.get(&name) {
            Some(base) => opts.merged_over(base),
            None => {
                order.push(name.clone());
                opts
            }
        };
        fields.insert(name, merged);
    }

    Normalized {
        table_name: child.table_name.or(table_name),
        order,
        fields,
    }
}

// ==================== Model ====================

/// A finalized model.
#[derive(Debug)]
pub struct Model {
    table_name: String,
    field_names: Vec<String>,
    fields: HashMap<String, Field>,
    primary_key: String,
    foreign_keys: Vec<String>,
    names: Vec<String>,
    label_to_name: HashMap<String, String>,
    qualified: HashMap<String, String>,
    declaration: ModelOptions,
}

impl Model {
    /// Normalize, check and finalize a declaration.
    pub fn build(options: ModelOptions) -> OrmResult<Arc<Model>> {
        let normalized = normalize(&options)?;
        let model = finalize(normalized)?;
        tracing::debug!(
            target: "pgmodel.schema",
            table = %model.table_name,
            fields = model.field_names.len(),
            primary_key = %model.primary_key,
            "model built"
        );
        Ok(Arc::new(model))
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.field_names.iter().filter_map(|n| self.fields.get(n))
    }

    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    pub fn foreign_keys(&self) -> &[String] {
        &self.foreign_keys
    }

    /// Field names that can be written by an update (primary key and
    /// auto-timestamp fields excluded).
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn label_of(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(Field::label)
    }

    pub fn name_of_label(&self, label: &str) -> Option<&str> {
        self.label_to_name.get(label).map(String::as_str)
    }

    /// `table.column` for a field name.
    pub fn qualified(&self, name: &str) -> Option<&str> {
        self.qualified.get(name).map(String::as_str)
    }

    /// Start a query on this model.
    pub fn query(self: &Arc<Self>) -> Query {
        Query::new(Arc::clone(self))
    }

    pub(crate) fn field_or_err(&self, name: &str) -> OrmResult<&Field> {
        self.fields.get(name).ok_or_else(|| {
            OrmError::sql_build(format!(
                "unknown column '{name}' for model '{}'",
                self.table_name
            ))
        })
    }

    /// Validate a record for a create, producing exactly `columns`.
    ///
    /// Missing columns take the field default (or NULL); `auto_now` and
    /// `auto_now_add` fields are stamped with the current time unless the
    /// record supplies a value.
    pub fn validate_create(&self, record: &Record, columns: &[String]) -> OrmResult<Record> {
        let now = Value::DateTime(Utc::now());

        for field in self.fields() {
            if field.is_required()
                && !columns.iter().any(|c| c == field.name())
                && !record.contains_key(field.name())
            {
                return Err(field.error("this field is required"));
            }
        }

        let mut out = Record::new();
        for column in columns {
            let field = self.field_or_err(column)?;
            let value = match record.get(column) {
                Some(v) => v.clone(),
                None if field.is_auto_timestamp() => now.clone(),
                None => match field.get_default() {
                    Some(d) => d,
                    None if field.is_required() => {
                        return Err(field.error("this field is required"));
                    }
                    None => Value::Null,
                },
            };
            let value = field.validate(value).map_err(|m| field.error(m))?;
            out.insert(column.clone(), field.prepare_for_db(value));
        }
        Ok(out)
    }

    /// Validate a record for an update, producing exactly `columns`.
    ///
    /// `auto_now` fields are stamped with the current time; other missing
    /// columns are an error.
    pub fn validate_update(&self, record: &Record, columns: &[String]) -> OrmResult<Record> {
        let now = Value::DateTime(Utc::now());
        let mut out = Record::new();
        for column in columns {
            let field = self.field_or_err(column)?;
            let value = match record.get(column) {
                Some(v) => v.clone(),
                None if field.is_auto_now() => now.clone(),
                None => return Err(field.error("missing value for update")),
            };
            let value = field.validate(value).map_err(|m| field.error(m))?;
            out.insert(column.clone(), field.prepare_for_db(value));
        }
        Ok(out)
    }

    /// Load a record read from the database through this model's fields.
    ///
    /// Columns that are not fields (annotations, raw selects) pass through.
    pub fn load(&self, record: Record) -> OrmResult<Record> {
        record
            .into_iter()
            .map(|(column, value)| {
                let value = match self.fields.get(&column) {
                    Some(field) => field.load(value)?,
                    None => value,
                };
                Ok::<_, OrmError>((column, value))
            })
            .collect()
    }
}

// ==================== Finalize ====================

fn finalize(normalized: Normalized) -> OrmResult<Model> {
    let table_name = normalized
        .table_name
        .clone()
        .ok_or_else(|| OrmError::schema("a model needs a table name"))?;
    check_identifier("table", &table_name)?;

    let declaration = normalized.clone().into_options();
    let Normalized {
        mut order,
        mut fields,
        ..
    } = normalized;

    let mut primary_keys = Vec::new();
    for name in &order {
        check_identifier("field", name)?;
        let opts = &fields[name];
        if opts.kind.is_none() {
            return Err(OrmError::schema(format!(
                "field '{name}' on '{table_name}' has no type"
            )));
        }
        if opts.is_primary_key() {
            primary_keys.push(name.clone());
        }
    }

    let primary_key = match primary_keys.as_slice() {
        [] => {
            if fields.contains_key(AUTO_PRIMARY_KEY) {
                return Err(OrmError::schema(format!(
                    "'{table_name}' has a non-primary '{AUTO_PRIMARY_KEY}' field and no primary key"
                )));
            }
            order.insert(0, AUTO_PRIMARY_KEY.to_string());
            fields.insert(
                AUTO_PRIMARY_KEY.to_string(),
                FieldOptions::serial(AUTO_PRIMARY_KEY),
            );
            AUTO_PRIMARY_KEY.to_string()
        }
        [pk] => pk.clone(),
        _ => {
            return Err(OrmError::schema(format!(
                "'{table_name}' declares more than one primary key: {}",
                primary_keys.join(", ")
            )));
        }
    };

    let mut finalized = HashMap::with_capacity(fields.len());
    let mut foreign_keys = Vec::new();
    for name in &order {
        let opts = &fields[name];
        let kind = opts.kind.unwrap_or(FieldType::Text);

        let (reference_column, referenced_db_type) = match &opts.reference {
            Some(reference) => {
                foreign_keys.push(name.clone());
                let (column, db_type) =
                    resolve_reference(&table_name, name, opts, reference, &fields, &primary_key)?;
                (Some(column), Some(db_type))
            }
            None if kind == FieldType::ForeignKey => {
                return Err(OrmError::schema(format!(
                    "foreign key '{name}' on '{table_name}' has no target"
                )));
            }
            None => (None, None),
        };

        let db_type = opts
            .db_type
            .clone()
            .or(referenced_db_type)
            .or_else(|| kind.default_db_type(opts.max_length))
            .unwrap_or_else(|| "text".to_string());

        let max_length = match kind {
            FieldType::Char | FieldType::Email => Some(opts.max_length.unwrap_or(255)),
            _ => opts.max_length,
        };

        let field = Field {
            name: name.clone(),
            kind,
            db_type,
            label: opts.label.clone().unwrap_or_else(|| name.clone()),
            null: opts.null.unwrap_or(false),
            primary_key: *name == primary_key,
            unique: opts.unique.unwrap_or(false) || *name == primary_key,
            default: opts.default.clone(),
            max_length,
            auto_now: opts.auto_now.unwrap_or(false),
            auto_now_add: opts.auto_now_add.unwrap_or(false),
            reference: opts.reference.clone(),
            reference_column,
        };
        finalized.insert(name.clone(), field);
    }

    let names = order
        .iter()
        .filter(|n| {
            let f = &finalized[*n];
            !f.primary_key && !f.is_auto_timestamp()
        })
        .cloned()
        .collect();

    let mut label_to_name = HashMap::new();
    for field in finalized.values() {
        label_to_name.insert(field.label.clone(), field.name.clone());
    }

    let qualified = order
        .iter()
        .map(|n| (n.clone(), format!("{table_name}.{n}")))
        .collect();

    Ok(Model {
        table_name,
        field_names: order,
        fields: finalized,
        primary_key,
        foreign_keys,
        names,
        label_to_name,
        qualified,
        declaration,
    })
}

/// Resolve a foreign key's target column and inherited database type.
///
/// The target column must be the target's primary key or a unique field.
fn resolve_reference(
    table_name: &str,
    name: &str,
    opts: &FieldOptions,
    reference: &Reference,
    own_fields: &HashMap<String, FieldOptions>,
    own_primary_key: &str,
) -> OrmResult<(String, String)> {
    match reference {
        Reference::Model(target) => {
            let column = opts
                .reference_column
                .clone()
                .unwrap_or_else(|| target.primary_key().to_string());
            let field = target.field(&column).ok_or_else(|| {
                OrmError::schema(format!(
                    "foreign key '{table_name}.{name}' references unknown column '{}.{column}'",
                    target.table_name()
                ))
            })?;
            if !field.is_primary_key() && !field.is_unique() {
                return Err(OrmError::schema(format!(
                    "foreign key '{table_name}.{name}' references '{}.{column}', which is neither primary key nor unique",
                    target.table_name()
                )));
            }
            Ok((column, field.db_type().to_string()))
        }
        Reference::SelfRef => {
            let column = opts
                .reference_column
                .clone()
                .unwrap_or_else(|| own_primary_key.to_string());
            let target = own_fields.get(&column).ok_or_else(|| {
                OrmError::schema(format!(
                    "foreign key '{table_name}.{name}' references unknown column '{table_name}.{column}'"
                ))
            })?;
            if column != own_primary_key && !target.unique.unwrap_or(false) {
                return Err(OrmError::schema(format!(
                    "foreign key '{table_name}.{name}' references '{table_name}.{column}', which is neither primary key nor unique"
                )));
            }
            let db_type = target
                .db_type
                .clone()
                .or_else(|| {
                    target
                        .kind
                        .and_then(|k| k.default_db_type(target.max_length))
                })
                .unwrap_or_else(|| "integer".to_string());
            Ok((column, db_type))
        }
    }
}
