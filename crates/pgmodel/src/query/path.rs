//! Lookup path resolution.
//!
//! A path is split on `__` and walked left to right:
//!
//! - an annotation name as the first segment resolves to its expression
//! - a foreign key followed by a field of its target registers a join and
//!   continues on the target; any other following segment is the operator
//!   applied to the foreign-key column itself
//! - a registered model whose foreign key points at the current model is a
//!   reverse relation: it joins `parent.pk = child.fk` and continues on the child
//! - a plain field takes at most one more segment, the operator
//! - a JSON field treats the segments before an optional trailing operator as
//!   a key path (`T.data #> '{a,0}'`)

use super::Query;
use crate::condition::{Cond, Op};
use crate::error::{OrmError, OrmResult};
use crate::field::{Field, FieldType};
use crate::ident::SEPARATOR;
use crate::join::JoinType;
use crate::model::Model;
use crate::value::{Value, quote};
use std::sync::Arc;

/// A resolved path: a column expression plus the trailing operator, if any.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Resolved {
    pub column: String,
    pub op: Option<Op>,
    /// The column is a JSON field or a path into one.
    pub json: bool,
    /// At least one join was followed.
    pub joined: bool,
}

impl Query {
    pub(crate) fn compile_cond(&mut self, cond: &Cond) -> OrmResult<String> {
        cond.compile(&mut |path: &str, value: &Value| self.compile_pair(path, value))
    }

    pub(crate) fn compile_pair(&mut self, path: &str, value: &Value) -> OrmResult<String> {
        let resolved = self.resolve(path, JoinType::Inner)?;
        resolved
            .op
            .unwrap_or(Op::Eq)
            .compile(&resolved.column, value, resolved.json)
    }

    /// Resolve a path that must not end with an operator.
    pub(crate) fn column(&mut self, path: &str, join_type: JoinType) -> OrmResult<Resolved> {
        let resolved = self.resolve(path, join_type)?;
        if let Some(op) = resolved.op {
            return Err(OrmError::sql_build(format!(
                "operator '{}' is not allowed in column path '{path}'",
                op.name()
            )));
        }
        Ok(resolved)
    }

    pub(crate) fn resolve(&mut self, path: &str, join_type: JoinType) -> OrmResult<Resolved> {
        let segments: Vec<&str> = path.split(SEPARATOR).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(OrmError::sql_build(format!("invalid lookup path '{path}'")));
        }

        if let Some((_, expr)) = self.annotations.iter().find(|(n, _)| n == segments[0]) {
            let op = match &segments[1..] {
                [] => None,
                [op] => Some(parse_op(op, path)?),
                _ => {
                    return Err(OrmError::sql_build(format!(
                        "annotation '{}' cannot be traversed in '{path}'",
                        segments[0]
                    )));
                }
            };
            return Ok(Resolved {
                column: expr.clone(),
                op,
                json: false,
                joined: false,
            });
        }

        let mut model = Arc::clone(&self.model);
        let mut alias = self.alias.clone();
        let mut joined = false;
        let mut i = 0;
        while i < segments.len() {
            let seg = segments[i];
            let rest = &segments[i + 1..];

            if let Some(field) = model.field(seg) {
                if let (Some(reference), Some(next)) = (field.reference(), rest.first()) {
                    let target = reference.resolve(&model);
                    if target.field(next).is_some()
                        || self.reverse_relation(&target, next)?.is_some()
                    {
                        let (next_model, next_alias) =
                            self.join_forward(&model, &alias, field, join_type);
                        model = next_model;
                        alias = next_alias;
                        joined = true;
                        i += 1;
                        continue;
                    }
                }

                let column = format!("{alias}.{seg}");
                if field.is_json() {
                    let column = if field.kind() == FieldType::Json {
                        format!("{column}::jsonb")
                    } else {
                        column
                    };
                    let (keys, op) = match rest.split_last() {
                        Some((last, keys)) => match Op::from_name(last) {
                            Some(op) => (keys, Some(op)),
                            None => (rest, None),
                        },
                        None => (rest, None),
                    };
                    let column = if keys.is_empty() {
                        column
                    } else {
                        format!("{column} #> {}", quote(&format!("{{{}}}", keys.join(","))))
                    };
                    return Ok(Resolved {
                        column,
                        op,
                        json: true,
                        joined,
                    });
                }

                let op = match rest {
                    [] => None,
                    [op] => Some(parse_op(op, path)?),
                    _ => {
                        return Err(OrmError::sql_build(format!(
                            "unexpected segments after '{seg}' in '{path}'"
                        )));
                    }
                };
                return Ok(Resolved {
                    column,
                    op,
                    json: false,
                    joined,
                });
            }

            if let Some((child, fk)) = self.reverse_relation(&model, seg)? {
                if rest.is_empty() {
                    return Err(OrmError::sql_build(format!(
                        "lookup '{path}' ends at relation '{seg}'; name a field of it"
                    )));
                }
                alias = self.joins.register(
                    join_type,
                    model.table_name(),
                    &alias,
                    model.primary_key(),
                    child.table_name(),
                    &fk,
                );
                model = child;
                joined = true;
                i += 1;
                continue;
            }

            return Err(OrmError::sql_build(format!(
                "unknown field '{seg}' on '{}' in lookup '{path}'",
                model.table_name()
            )));
        }

        Err(OrmError::sql_build(format!("incomplete lookup path '{path}'")))
    }

    /// Join every relation named along `path`; returns the last model and alias.
    pub(crate) fn walk_relations(
        &mut self,
        path: &str,
        join_type: JoinType,
    ) -> OrmResult<(Arc<Model>, String)> {
        let mut model = Arc::clone(&self.model);
        let mut alias = self.alias.clone();
        for seg in path.split(SEPARATOR) {
            if let Some(field) = model.field(seg).filter(|f| f.reference().is_some()) {
                let (next_model, next_alias) = self.join_forward(&model, &alias, field, join_type);
                model = next_model;
                alias = next_alias;
                continue;
            }
            if let Some((child, fk)) = self.reverse_relation(&model, seg)? {
                alias = self.joins.register(
                    join_type,
                    model.table_name(),
                    &alias,
                    model.primary_key(),
                    child.table_name(),
                    &fk,
                );
                model = child;
                continue;
            }
            return Err(OrmError::sql_build(format!(
                "'{seg}' in '{path}' is not a relation of '{}'",
                model.table_name()
            )));
        }
        Ok((model, alias))
    }

    fn join_forward(
        &mut self,
        model: &Arc<Model>,
        alias: &str,
        field: &Field,
        join_type: JoinType,
    ) -> (Arc<Model>, String) {
        let target = match field.reference() {
            Some(reference) => reference.resolve(model),
            None => Arc::clone(model),
        };
        let right_column = field
            .reference_column()
            .unwrap_or(target.primary_key())
            .to_string();
        let right_alias = self.joins.register(
            join_type,
            model.table_name(),
            alias,
            field.name(),
            target.table_name(),
            &right_column,
        );
        (target, right_alias)
    }

    fn reverse_relation(
        &self,
        parent: &Arc<Model>,
        child: &str,
    ) -> OrmResult<Option<(Arc<Model>, String)>> {
        match &self.registry {
            Some(registry) => registry.reverse_relation(parent, child),
            None => Ok(None),
        }
    }
}

fn parse_op(name: &str, path: &str) -> OrmResult<Op> {
    Op::from_name(name).ok_or_else(|| {
        OrmError::sql_build(format!("unknown field or operator '{name}' in '{path}'"))
    })
}
