//! A named collection of models.
//!
//! Queries created through a [`Registry`] can traverse reverse (one-to-many)
//! relations: in `blog.filter(entry__headline__contains = ..)`, `entry` is not
//! a field of `blog` but a model whose foreign key points at it.

use crate::error::{OrmError, OrmResult};
use crate::field::Reference;
use crate::model::Model;
use crate::query::Query;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct Registry {
    models: HashMap<String, Arc<Model>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, model: &Arc<Model>) -> Self {
        self.register(model);
        self
    }

    /// Add a model, replacing any previous model for the same table.
    pub fn register(&mut self, model: &Arc<Model>) {
        self.models
            .insert(model.table_name().to_string(), Arc::clone(model));
    }

    pub fn get(&self, table: &str) -> Option<&Arc<Model>> {
        self.models.get(table)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Start a query on `table` that can resolve reverse relations.
    pub fn query(self: &Arc<Self>, table: &str) -> OrmResult<Query> {
        let model = self.get(table).ok_or_else(|| {
            OrmError::sql_build(format!("no model registered for table '{table}'"))
        })?;
        Ok(Query::new(Arc::clone(model)).with_registry(Arc::clone(self)))
    }

    /// Find the foreign key on model `child` that points at `parent`.
    ///
    /// Returns `Ok(None)` when `child` is not a registered model or has no
    /// foreign key to `parent`; more than one candidate is ambiguous.
    pub fn reverse_relation(
        &self,
        parent: &Arc<Model>,
        child: &str,
    ) -> OrmResult<Option<(Arc<Model>, String)>> {
        let Some(child_model) = self.models.get(child) else {
            return Ok(None);
        };

        let candidates: Vec<&str> = child_model
            .foreign_keys()
            .iter()
            .filter(|fk| {
                let Some(field) = child_model.field(fk) else {
                    return false;
                };
                let target = match field.reference() {
                    Some(Reference::Model(m)) => m.table_name(),
                    Some(Reference::SelfRef) => child_model.table_name(),
                    None => return false,
                };
                target == parent.table_name()
                    && field.reference_column() == Some(parent.primary_key())
            })
            .map(String::as_str)
            .collect();

        match candidates.as_slice() {
            [] => Ok(None),
            [fk] => Ok(Some((Arc::clone(child_model), (*fk).to_string()))),
            many => Err(OrmError::sql_build(format!(
                "ambiguous relation '{child}' from '{}': candidate keys {}",
                parent.table_name(),
                many.join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldOptions;
    use crate::model::ModelOptions;

    #[test]
    fn finds_reverse_relation() {
        let blog =
            Model::build(ModelOptions::new("blog").field(FieldOptions::text("name"))).unwrap();
        let entry = Model::build(
            ModelOptions::new("entry").field(FieldOptions::foreign_key("blog_id", &blog)),
        )
        .unwrap();
        let registry = Registry::new().with(&blog).with(&entry);

        let (child, fk) = registry.reverse_relation(&blog, "entry").unwrap().unwrap();
        assert_eq!(child.table_name(), "entry");
        assert_eq!(fk, "blog_id");
        assert!(registry.reverse_relation(&blog, "comment").unwrap().is_none());
    }

    #[test]
    fn two_keys_to_the_same_parent_are_ambiguous() {
        let person =
            Model::build(ModelOptions::new("person").field(FieldOptions::text("name"))).unwrap();
        let letter = Model::build(
            ModelOptions::new("letter")
                .field(FieldOptions::foreign_key("sender_id", &person))
                .field(FieldOptions::foreign_key("recipient_id", &person)),
        )
        .unwrap();
        let registry = Registry::new().with(&person).with(&letter);
        assert!(registry.reverse_relation(&person, "letter").unwrap_err().is_sql_build());
    }

    #[test]
    fn query_on_unknown_table_fails() {
        let registry = Arc::new(Registry::new());
        assert!(registry.query("nope").is_err());
    }
}
