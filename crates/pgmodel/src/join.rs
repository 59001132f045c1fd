//! Join registration for path lookups.
//!
//! Every query owns a [`JoinRegistry`]. Following a foreign key in a lookup
//! path (`blog_id__name`) registers a join and returns the alias of the joined
//! table. The same path always maps to the same alias within one query, so
//! `filter(blog_id__name = ..)` followed by `order_by(blog_id__rating)` uses a
//! single join.
//!
//! Aliases are `T1`, `T2`, ... in first-use order; the base table is `T`.

use std::collections::HashMap;

/// SQL join type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    pub const fn sql_keyword(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL JOIN",
        }
    }
}

/// One physical join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinEntry {
    pub join_type: JoinType,
    pub left_table: String,
    pub left_alias: String,
    pub left_column: String,
    pub right_table: String,
    pub right_alias: String,
    pub right_column: String,
}

impl JoinEntry {
    /// `T.blog_id = T1.id`
    pub fn condition(&self) -> String {
        format!(
            "{}.{} = {}.{}",
            self.left_alias, self.left_column, self.right_alias, self.right_column
        )
    }

    /// `blog T1`
    pub fn table(&self) -> String {
        format!("{} {}", self.right_table, self.right_alias)
    }

    /// `INNER JOIN blog T1 ON (T.blog_id = T1.id)`
    pub fn clause(&self) -> String {
        format!(
            "{} {} ON ({})",
            self.join_type.sql_keyword(),
            self.table(),
            self.condition()
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct JoinRegistry {
    entries: Vec<JoinEntry>,
    keys: HashMap<String, usize>,
}

impl JoinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a join and return the alias of `right_table`.
    ///
    /// Registering the same path again returns the cached alias.
    pub fn register(
        &mut self,
        join_type: JoinType,
        left_table: &str,
        left_alias: &str,
        left_column: &str,
        right_table: &str,
        right_column: &str,
    ) -> String {
        let key = if left_table == right_table {
            format!("{left_alias}.{left_column}::{right_table}")
        } else {
            format!(
                "{} {left_alias}.{left_table}.{left_column} {right_table}.{right_column}",
                join_type.sql_keyword()
            )
        };

        if let Some(&idx) = self.keys.get(&key) {
            return self.entries[idx].right_alias.clone();
        }

        let right_alias = format!("T{}", self.entries.len() + 1);
        tracing::trace!(
            target: "pgmodel.sql",
            join = %key,
            alias = %right_alias,
            "join registered"
        );
        self.keys.insert(key, self.entries.len());
        self.entries.push(JoinEntry {
            join_type,
            left_table: left_table.to_string(),
            left_alias: left_alias.to_string(),
            left_column: left_column.to_string(),
            right_table: right_table.to_string(),
            right_alias: right_alias.clone(),
            right_column: right_column.to_string(),
        });
        right_alias
    }

    pub fn entries(&self) -> &[JoinEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_path_reuses_alias() {
        let mut joins = JoinRegistry::new();
        let a = joins.register(JoinType::Inner, "entry", "T", "blog_id", "blog", "id");
        let b = joins.register(JoinType::Inner, "entry", "T", "blog_id", "blog", "id");
        assert_eq!(a, "T1");
        assert_eq!(a, b);
        assert_eq!(joins.len(), 1);
    }

    #[test]
    fn aliases_follow_first_use() {
        let mut joins = JoinRegistry::new();
        assert_eq!(
            joins.register(JoinType::Inner, "entry", "T", "blog_id", "blog", "id"),
            "T1"
        );
        assert_eq!(
            joins.register(JoinType::Inner, "blog", "T1", "owner_id", "person", "id"),
            "T2"
        );
        assert_eq!(
            joins.register(JoinType::Inner, "entry", "T", "author_id", "person", "id"),
            "T3"
        );
    }

    #[test]
    fn self_reference_keys_on_left_alias() {
        let mut joins = JoinRegistry::new();
        let parent = joins.register(JoinType::Inner, "node", "T", "parent_id", "node", "id");
        let grandparent = joins.register(
            JoinType::Inner,
            "node",
            parent.as_str(),
            "parent_id",
            "node",
            "id",
        );
        assert_eq!(parent, "T1");
        assert_eq!(grandparent, "T2");
    }

    #[test]
    fn renders_clause() {
        let mut joins = JoinRegistry::new();
        joins.register(JoinType::Left, "entry", "T", "blog_id", "blog", "id");
        assert_eq!(
            joins.entries()[0].clause(),
            "LEFT JOIN blog T1 ON (T.blog_id = T1.id)"
        );
    }
}
