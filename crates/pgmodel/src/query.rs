//! The query façade.
//!
//! A [`Query`] accumulates clause fragments for one statement on one model.
//! Chain methods consume and return the builder; errors found mid-chain are
//! recorded (the first one wins) and reported by [`Query::statement`] or any
//! terminal operation.
//!
//! # Example
//! ```ignore
//! use pgmodel::{Agg, Cond};
//!
//! // SELECT * FROM entry T INNER JOIN blog T1 ON (T.blog_id = T1.id)
//! //   WHERE T1.name LIKE '%my blog%'
//! let sql = entry.query().filter(("blog_id__name__contains", "my blog")).statement()?;
//!
//! // SELECT T.author, SUM(T.price) AS total FROM book T
//! //   GROUP BY T.author HAVING SUM(T.price) > 100
//! let sql = book
//!     .query()
//!     .group_by(&["author"])
//!     .annotate("total", Agg::Sum, "price")
//!     .having(("total__gt", 100))
//!     .statement()?;
//!
//! let rows = book.query().filter(("price__lt", 10)).exec(&client).await?;
//! ```

mod bulk;
mod exec;
mod mutation;
mod path;
#[cfg(test)]
mod tests;

pub use mutation::Key;

use crate::assemble::{Clauses, assemble};
use crate::condition::Cond;
use crate::error::{OrmError, OrmResult};
use crate::ident::check_identifier;
use crate::join::{JoinRegistry, JoinType};
use crate::model::Model;
use crate::monitor::StatementKind;
use crate::registry::Registry;
use std::sync::Arc;

/// Aggregate function for [`Query::annotate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Agg {
    Sum,
    Avg,
    Count,
    Max,
    Min,
}

impl Agg {
    pub const fn sql_name(&self) -> &'static str {
        match self {
            Agg::Sum => "SUM",
            Agg::Avg => "AVG",
            Agg::Count => "COUNT",
            Agg::Max => "MAX",
            Agg::Min => "MIN",
        }
    }
}

/// Set operation combining two SELECTs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Union,
    UnionAll,
    Intersect,
    IntersectAll,
    Except,
    ExceptAll,
}

impl SetOp {
    pub const fn sql_keyword(&self) -> &'static str {
        match self {
            SetOp::Union => "UNION",
            SetOp::UnionAll => "UNION ALL",
            SetOp::Intersect => "INTERSECT",
            SetOp::IntersectAll => "INTERSECT ALL",
            SetOp::Except => "EXCEPT",
            SetOp::ExceptAll => "EXCEPT ALL",
        }
    }
}

/// An eager foreign-key projection registered by [`Query::load_fk`].
#[derive(Debug, Clone)]
struct LoadFk {
    name: String,
    target: Arc<Model>,
    columns: Vec<String>,
}

/// A statement under construction.
#[derive(Debug, Clone)]
pub struct Query {
    model: Arc<Model>,
    registry: Option<Arc<Registry>>,
    alias: String,
    joins: JoinRegistry,
    with: Vec<String>,
    distinct: bool,
    select: Vec<String>,
    /// Output names of `select`, used to infer column lists.
    output: Vec<String>,
    annotations: Vec<(String, String)>,
    from: Option<String>,
    where_clause: Option<String>,
    /// Conditions added by bulk builders (`T.id = V.id`).
    fixed_where: Vec<String>,
    /// Extra UPDATE FROM / DELETE USING items added by bulk builders.
    sources: Vec<String>,
    group_by: Vec<String>,
    having: Option<String>,
    order_by: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    insert: Option<String>,
    on_conflict: Option<String>,
    update: Option<String>,
    delete: bool,
    returning: Vec<String>,
    returning_names: Vec<String>,
    set_ops: Vec<(SetOp, Box<Query>)>,
    load_fk: Vec<LoadFk>,
    raw: bool,
    skip_validate: bool,
    error: Option<Arc<OrmError>>,
}

impl Query {
    /// Start a SELECT on `model`, aliased `T`.
    pub fn new(model: Arc<Model>) -> Self {
        Self {
            model,
            registry: None,
            alias: "T".to_string(),
            joins: JoinRegistry::new(),
            with: Vec::new(),
            distinct: false,
            select: Vec::new(),
            output: Vec::new(),
            annotations: Vec::new(),
            from: None,
            where_clause: None,
            fixed_where: Vec::new(),
            sources: Vec::new(),
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            insert: None,
            on_conflict: None,
            update: None,
            delete: false,
            returning: Vec::new(),
            returning_names: Vec::new(),
            set_ops: Vec::new(),
            load_fk: Vec::new(),
            raw: false,
            skip_validate: false,
            error: None,
        }
    }

    /// Attach a registry so lookup paths can follow reverse relations.
    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Run a fallible step unless an earlier step already failed.
    fn chain(mut self, step: impl FnOnce(&mut Self) -> OrmResult<()>) -> Self {
        if self.error.is_none() {
            if let Err(err) = step(&mut self) {
                self.error = Some(Arc::new(err));
            }
        }
        self
    }

    // ==================== WHERE ====================

    /// AND a condition onto WHERE.
    pub fn filter(self, cond: impl Into<Cond>) -> Self {
        self.push_where(cond.into(), "AND", false)
    }

    /// OR a condition onto WHERE.
    pub fn or_filter(self, cond: impl Into<Cond>) -> Self {
        self.push_where(cond.into(), "OR", false)
    }

    /// AND NOT a condition onto WHERE.
    pub fn exclude(self, cond: impl Into<Cond>) -> Self {
        self.push_where(cond.into(), "AND", true)
    }

    /// OR NOT a condition onto WHERE.
    pub fn or_exclude(self, cond: impl Into<Cond>) -> Self {
        self.push_where(cond.into(), "OR", true)
    }

    fn push_where(self, cond: Cond, joiner: &str, negate: bool) -> Self {
        self.chain(|q| {
            let sql = q.compile_cond(&cond)?;
            let sql = if negate { format!("NOT ({sql})") } else { sql };
            q.where_clause = Some(combine(q.where_clause.take(), sql, joiner));
            Ok(())
        })
    }

    /// Build a grouped sub-expression with the regular chain methods.
    ///
    /// `f` runs on this query with its WHERE temporarily cleared; whatever WHERE
    /// it builds is parenthesized and AND-ed onto the previous one. Joins the
    /// callback registers are kept.
    ///
    /// ```ignore
    /// // WHERE (T.rating > 3) AND ((T.price < 10) OR (T.name LIKE '%sale%'))
    /// book.query()
    ///     .filter(("rating__gt", 3))
    ///     .filter_with(|q| q.filter(("price__lt", 10)).or_filter(("name__contains", "sale")));
    /// ```
    pub fn filter_with(mut self, f: impl FnOnce(Query) -> Query) -> Self {
        if self.error.is_some() {
            return self;
        }
        let saved = self.where_clause.take();
        let mut q = f(self);
        let inner = q.where_clause.take();
        q.where_clause = saved;
        if let Some(inner) = inner {
            q.where_clause = Some(match q.where_clause.take() {
                Some(prev) => format!("({prev}) AND ({inner})"),
                None => format!("({inner})"),
            });
        }
        q
    }

    /// AND a condition onto HAVING. Paths may start with an annotation name.
    pub fn having(self, cond: impl Into<Cond>) -> Self {
        let cond = cond.into();
        self.chain(|q| {
            let sql = q.compile_cond(&cond)?;
            q.having = Some(combine(q.having.take(), sql, "AND"));
            Ok(())
        })
    }

    // ==================== SELECT ====================

    /// Select columns by path. Joined paths are aliased with the path
    /// (`T1.name AS blog_id__name`).
    pub fn select(self, paths: &[&str]) -> Self {
        self.chain(|q| {
            for path in paths {
                let resolved = q.column(path, JoinType::Inner)?;
                let column = if resolved.joined {
                    format!("{} AS {path}", resolved.column)
                } else {
                    resolved.column
                };
                q.select.push(column);
                q.output.push((*path).to_string());
            }
            Ok(())
        })
    }

    /// Select one path under an explicit output name.
    pub fn select_as(self, path: &str, name: &str) -> Self {
        self.chain(|q| {
            let resolved = q.column(path, JoinType::Inner)?;
            q.select.push(format!("{} AS {name}", resolved.column));
            q.output.push(name.to_string());
            Ok(())
        })
    }

    /// Select a raw SQL expression.
    ///
    /// Be careful with SQL injection when using raw fragments.
    pub fn select_raw(mut self, sql: impl Into<String>) -> Self {
        self.select.push(sql.into());
        self
    }

    /// Add an aggregate column `AGG(path) AS name`. `"*"` counts rows.
    ///
    /// The annotation name can then be used as the first segment of a
    /// `having` path or in `order_by`.
    pub fn annotate(self, name: &str, agg: Agg, path: &str) -> Self {
        self.chain(|q| {
            check_identifier("annotation", name)
                .map_err(|_| OrmError::sql_build(format!("invalid annotation name '{name}'")))?;
            let column = if path == "*" {
                "*".to_string()
            } else {
                q.column(path, JoinType::Inner)?.column
            };
            q.annotations
                .push((name.to_string(), format!("{}({column})", agg.sql_name())));
            Ok(())
        })
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// GROUP BY paths. Without an explicit select, the grouped columns are
    /// selected.
    pub fn group_by(self, paths: &[&str]) -> Self {
        self.chain(|q| {
            for path in paths {
                let column = q.column(path, JoinType::Inner)?.column;
                q.group_by.push(column);
            }
            Ok(())
        })
    }

    /// ORDER BY paths; a leading `-` sorts descending.
    pub fn order_by(self, paths: &[&str]) -> Self {
        self.chain(|q| {
            for path in paths {
                let (path, desc) = match path.strip_prefix('-') {
                    Some(rest) => (rest, true),
                    None => (*path, false),
                };
                let column = q.column(path, JoinType::Inner)?.column;
                q.order_by
                    .push(if desc { format!("{column} DESC") } else { column });
            }
            Ok(())
        })
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Rename the base table alias (default `T`). Must be called before any
    /// path is resolved.
    pub fn alias(self, alias: &str) -> Self {
        self.chain(|q| {
            check_identifier("alias", alias)
                .map_err(|_| OrmError::sql_build(format!("invalid alias '{alias}'")))?;
            if !q.joins.is_empty() || q.where_clause.is_some() || !q.select.is_empty() {
                return Err(OrmError::sql_build(
                    "alias must be set before columns are resolved",
                ));
            }
            q.alias = alias.to_string();
            Ok(())
        })
    }

    // ==================== Joins ====================

    /// INNER JOIN every relation along `path` (`blog_id__owner_id`).
    pub fn join(self, path: &str) -> Self {
        self.chain(|q| q.walk_relations(path, JoinType::Inner).map(|_| ()))
    }

    /// LEFT JOIN every relation along `path`.
    pub fn left_join(self, path: &str) -> Self {
        self.chain(|q| q.walk_relations(path, JoinType::Left).map(|_| ()))
    }

    /// Eagerly load the row a foreign key points at.
    ///
    /// The target is LEFT JOINed and its `fields` (all fields when empty) are
    /// selected as `fk__field`; [`exec`](Self::exec) folds them into a nested
    /// record under `fk`, or NULL when nothing matched.
    pub fn load_fk(self, fk: &str, fields: &[&str]) -> Self {
        self.chain(|q| {
            let field = q.model.field_or_err(fk)?;
            if field.reference().is_none() {
                return Err(OrmError::sql_build(format!(
                    "'{fk}' is not a foreign key of '{}'",
                    q.model.table_name()
                )));
            }
            let (target, alias) = q.walk_relations(fk, JoinType::Left)?;
            let names: Vec<String> = if fields.is_empty() {
                target.field_names().to_vec()
            } else {
                fields
                    .iter()
                    .map(|f| target.field_or_err(f).map(|_| (*f).to_string()))
                    .collect::<OrmResult<_>>()?
            };
            let columns = names
                .iter()
                .map(|n| format!("{alias}.{n} AS {fk}__{n}"))
                .collect();
            q.load_fk.push(LoadFk {
                name: fk.to_string(),
                target,
                columns,
            });
            Ok(())
        })
    }

    // ==================== Composition ====================

    /// Prefix the statement with `WITH name AS (query)`.
    pub fn with_cte(self, name: &str, query: Query) -> Self {
        self.chain(|q| {
            check_identifier("CTE", name)
                .map_err(|_| OrmError::sql_build(format!("invalid CTE name '{name}'")))?;
            q.with.push(format!("{name} AS ({})", query.statement()?));
            Ok(())
        })
    }

    fn set_op(mut self, op: SetOp, other: Query) -> Self {
        self.set_ops.push((op, Box::new(other)));
        self
    }

    pub fn union(self, other: Query) -> Self {
        self.set_op(SetOp::Union, other)
    }

    pub fn union_all(self, other: Query) -> Self {
        self.set_op(SetOp::UnionAll, other)
    }

    pub fn intersect(self, other: Query) -> Self {
        self.set_op(SetOp::Intersect, other)
    }

    pub fn intersect_all(self, other: Query) -> Self {
        self.set_op(SetOp::IntersectAll, other)
    }

    pub fn except(self, other: Query) -> Self {
        self.set_op(SetOp::Except, other)
    }

    pub fn except_all(self, other: Query) -> Self {
        self.set_op(SetOp::ExceptAll, other)
    }

    // ==================== Flags ====================

    /// Return rows as read, without loading them through the model's fields.
    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    /// Skip field validation in mutation builders called after this.
    pub fn skip_validate(mut self) -> Self {
        self.skip_validate = true;
        self
    }

    // ==================== Build ====================

    /// The kind of statement this query builds.
    pub fn kind(&self) -> StatementKind {
        if self.update.is_some() {
            StatementKind::Update
        } else if self.insert.is_some() {
            StatementKind::Insert
        } else if self.delete {
            StatementKind::Delete
        } else {
            StatementKind::Select
        }
    }

    /// Column names this query outputs, when known.
    ///
    /// For a SELECT these are the explicitly selected paths and annotations;
    /// for a mutation, the RETURNING columns.
    pub fn output_names(&self) -> Vec<String> {
        if self.kind() != StatementKind::Select {
            return self.returning_names.clone();
        }
        if self.output.len() != self.select.len() {
            return Vec::new();
        }
        self.output
            .iter()
            .cloned()
            .chain(self.annotations.iter().map(|(name, _)| name.clone()))
            .collect()
    }

    /// Build the SQL text. Idempotent.
    pub fn statement(&self) -> OrmResult<String> {
        if let Some(err) = &self.error {
            return Err(err.replay());
        }
        let mut sql = assemble(&self.clauses()?);
        for (op, other) in &self.set_ops {
            sql = format!("({sql}) {} ({})", op.sql_keyword(), other.statement()?);
        }
        Ok(sql)
    }

    fn clauses(&self) -> OrmResult<Clauses> {
        let kind = self.kind();

        let mut select = self.select.clone();
        if select.is_empty() {
            if self.from.is_some() || !self.load_fk.is_empty() {
                select.push(format!("{}.*", self.alias));
            } else {
                select.extend(self.group_by.iter().cloned());
            }
        }
        select.extend(
            self.annotations
                .iter()
                .map(|(name, expr)| format!("{expr} AS {name}")),
        );
        for load in &self.load_fk {
            select.extend(load.columns.iter().cloned());
        }

        let mut joins = Vec::new();
        let mut sources = self.sources.clone();
        let mut where_parts = Vec::new();
        match kind {
            StatementKind::Select | StatementKind::Other => {
                joins = self.joins.entries().iter().map(|j| j.clause()).collect();
            }
            StatementKind::Update | StatementKind::Delete => {
                for join in self.joins.entries() {
                    sources.push(join.table());
                    where_parts.push(join.condition());
                }
            }
            StatementKind::Insert => {
                if !self.joins.is_empty() {
                    return Err(OrmError::sql_build("an INSERT cannot use joined lookups"));
                }
            }
        }
        where_parts.extend(self.fixed_where.iter().cloned());
        where_parts.extend(self.where_clause.iter().cloned());

        let where_clause = match where_parts.len() {
            0 => None,
            1 => where_parts.pop(),
            _ => Some(
                where_parts
                    .iter()
                    .map(|p| format!("({p})"))
                    .collect::<Vec<_>>()
                    .join(" AND "),
            ),
        };

        Ok(Clauses {
            with: self.with.clone(),
            table: self.model.table_name().to_string(),
            alias: self.alias.clone(),
            distinct: self.distinct,
            select,
            from: self.from.clone(),
            joins,
            sources,
            where_clause,
            group_by: self.group_by.clone(),
            having: self.having.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
            insert: self.insert.clone(),
            on_conflict: self.on_conflict.clone(),
            update: self.update.clone(),
            delete: self.delete,
            returning: self.returning.clone(),
        })
    }
}

fn combine(prev: Option<String>, next: String, joiner: &str) -> String {
    match prev {
        None => next,
        Some(prev) => format!("({prev}) {joiner} ({next})"),
    }
}
