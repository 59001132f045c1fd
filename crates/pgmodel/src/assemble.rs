//! Statement assembly.
//!
//! [`assemble`] is a pure function from accumulated clause fragments to SQL
//! text. It picks the statement form from whichever of `update`, `insert`,
//! `delete` is set (checked in that order) and falls back to SELECT. Clauses
//! that are not set contribute nothing.

/// Clause fragments, without their keywords.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clauses {
    /// CTE definitions: `V(a, b) AS (..), new_records AS (..)`
    pub with: Vec<String>,
    pub table: String,
    pub alias: String,
    pub distinct: bool,
    /// Output columns; empty means `*`.
    pub select: Vec<String>,
    /// Replaces `table alias` after SELECT's `FROM`.
    pub from: Option<String>,
    /// Rendered join clauses (SELECT only).
    pub joins: Vec<String>,
    /// Extra tables for UPDATE's `FROM` / DELETE's `USING`.
    pub sources: Vec<String>,
    pub where_clause: Option<String>,
    pub group_by: Vec<String>,
    pub having: Option<String>,
    pub order_by: Vec<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// INSERT body after the table: `(a, b) VALUES ..`, `(a) SELECT ..`,
    /// `DEFAULT VALUES`.
    pub insert: Option<String>,
    /// ON CONFLICT body: `(key) DO ..`
    pub on_conflict: Option<String>,
    /// UPDATE assignments: `a = 1, b = 'x'`
    pub update: Option<String>,
    pub delete: bool,
    pub returning: Vec<String>,
}

/// Assemble the final SQL text.
pub fn assemble(c: &Clauses) -> String {
    let mut sql = String::new();

    if !c.with.is_empty() {
        sql.push_str("WITH ");
        sql.push_str(&c.with.join(", "));
        sql.push(' ');
    }

    if let Some(set) = &c.update {
        sql.push_str(&format!("UPDATE {} {} SET {}", c.table, c.alias, set));
        if !c.sources.is_empty() {
            sql.push_str(" FROM ");
            sql.push_str(&c.sources.join(", "));
        }
        push_where(&mut sql, c);
        push_returning(&mut sql, c);
    } else if let Some(body) = &c.insert {
        sql.push_str(&format!("INSERT INTO {} AS {} {}", c.table, c.alias, body));
        if let Some(conflict) = &c.on_conflict {
            sql.push_str(" ON CONFLICT ");
            sql.push_str(conflict);
        }
        push_returning(&mut sql, c);
    } else if c.delete {
        sql.push_str(&format!("DELETE FROM {} {}", c.table, c.alias));
        if !c.sources.is_empty() {
            sql.push_str(" USING ");
            sql.push_str(&c.sources.join(", "));
        }
        push_where(&mut sql, c);
        push_returning(&mut sql, c);
    } else {
        sql.push_str("SELECT ");
        if c.distinct {
            sql.push_str("DISTINCT ");
        }
        if c.select.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&c.select.join(", "));
        }

        sql.push_str(" FROM ");
        match &c.from {
            Some(from) => sql.push_str(from),
            None => sql.push_str(&format!("{} {}", c.table, c.alias)),
        }
        for join in &c.joins {
            sql.push(' ');
            sql.push_str(join);
        }

        push_where(&mut sql, c);

        if !c.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&c.group_by.join(", "));
        }
        if let Some(having) = &c.having {
            sql.push_str(" HAVING ");
            sql.push_str(having);
        }
        if !c.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&c.order_by.join(", "));
        }
        if let Some(limit) = c.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = c.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
    }

    sql
}

fn push_where(sql: &mut String, c: &Clauses) {
    if let Some(cond) = &c.where_clause {
        sql.push_str(" WHERE ");
        sql.push_str(cond);
    }
}

fn push_returning(sql: &mut String, c: &Clauses) {
    if !c.returning.is_empty() {
        sql.push_str(" RETURNING ");
        sql.push_str(&c.returning.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Clauses {
        Clauses {
            table: "book".into(),
            alias: "T".into(),
            ..Clauses::default()
        }
    }

    #[test]
    fn select_clause_order() {
        let c = Clauses {
            distinct: true,
            select: vec!["T.name".into()],
            joins: vec!["INNER JOIN author T1 ON (T.author_id = T1.id)".into()],
            where_clause: Some("T1.name = 'x'".into()),
            group_by: vec!["T.name".into()],
            having: Some("COUNT(T.id) > 1".into()),
            order_by: vec!["T.name DESC".into()],
            limit: Some(10),
            offset: Some(20),
            ..base()
        };
        assert_eq!(
            assemble(&c),
            "SELECT DISTINCT T.name FROM book T INNER JOIN author T1 ON (T.author_id = T1.id) \
             WHERE T1.name = 'x' GROUP BY T.name HAVING COUNT(T.id) > 1 ORDER BY T.name DESC \
             LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn default_select_is_star() {
        assert_eq!(assemble(&base()), "SELECT * FROM book T");
    }

    #[test]
    fn insert_with_conflict_and_returning() {
        let c = Clauses {
            insert: Some("(name) VALUES ('a')".into()),
            on_conflict: Some("(name) DO NOTHING".into()),
            returning: vec!["T.id".into()],
            ..base()
        };
        assert_eq!(
            assemble(&c),
            "INSERT INTO book AS T (name) VALUES ('a') ON CONFLICT (name) DO NOTHING RETURNING T.id"
        );
    }

    #[test]
    fn update_takes_precedence() {
        let c = Clauses {
            with: vec!["V(id) AS (VALUES (1))".into()],
            update: Some("price = 1".into()),
            insert: Some("(price) VALUES (1)".into()),
            sources: vec!["V".into()],
            where_clause: Some("T.id = V.id".into()),
            ..base()
        };
        assert_eq!(
            assemble(&c),
            "WITH V(id) AS (VALUES (1)) UPDATE book T SET price = 1 FROM V WHERE T.id = V.id"
        );
    }

    #[test]
    fn delete_with_using() {
        let c = Clauses {
            delete: true,
            sources: vec!["author T1".into()],
            where_clause: Some("(T.author_id = T1.id) AND (T1.name = 'x')".into()),
            ..base()
        };
        assert_eq!(
            assemble(&c),
            "DELETE FROM book T USING author T1 WHERE (T.author_id = T1.id) AND (T1.name = 'x')"
        );
    }
}
