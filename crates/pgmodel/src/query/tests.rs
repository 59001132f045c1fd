use super::*;
use crate::field::FieldOptions;
use crate::model::ModelOptions;
use crate::record::Record;
use crate::value::Value;
use serde_json::json;

fn person() -> Arc<Model> {
    Model::build(ModelOptions::new("person").field(FieldOptions::char("name", 100))).unwrap()
}

fn blog(owner: &Arc<Model>) -> Arc<Model> {
    Model::build(
        ModelOptions::new("blog")
            .field(FieldOptions::char("name", 255).unique())
            .field(FieldOptions::foreign_key("owner_id", owner).null(true))
            .field(FieldOptions::text("tagline").null(true)),
    )
    .unwrap()
}

fn entry(blog: &Arc<Model>) -> Arc<Model> {
    Model::build(
        ModelOptions::new("entry")
            .field(FieldOptions::foreign_key("blog_id", blog))
            .field(FieldOptions::text("headline"))
            .field(FieldOptions::jsonb("data").null(true))
            .field(FieldOptions::integer("rating").default(0)),
    )
    .unwrap()
}

fn book() -> Arc<Model> {
    Model::build(
        ModelOptions::new("book")
            .field(FieldOptions::char("name", 255))
            .field(FieldOptions::char("author", 100))
            .field(FieldOptions::float("price")),
    )
    .unwrap()
}

fn models() -> (Arc<Model>, Arc<Model>, Arc<Model>) {
    let person = person();
    let blog = blog(&person);
    let entry = entry(&blog);
    (person, blog, entry)
}

fn name(n: &str) -> Record {
    Record::new().with("name", n)
}

// ==================== SELECT ====================

#[test]
fn test_filter_single_table() {
    let sql = book().query().filter(("price", 100)).statement().unwrap();
    assert_eq!(sql, "SELECT * FROM book T WHERE T.price = 100");
}

#[test]
fn test_filter_follows_foreign_key() {
    let (_, _, entry) = models();
    let sql = entry
        .query()
        .filter(("blog_id__name__contains", "my blog"))
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM entry T INNER JOIN blog T1 ON (T.blog_id = T1.id) \
         WHERE T1.name LIKE '%my blog%'"
    );
}

#[test]
fn test_multi_hop_joins_are_reused() {
    let (_, _, entry) = models();
    let sql = entry
        .query()
        .filter(("blog_id__owner_id__name", "ann"))
        .filter(("blog_id__name", "x"))
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM entry T INNER JOIN blog T1 ON (T.blog_id = T1.id) \
         INNER JOIN person T2 ON (T1.owner_id = T2.id) \
         WHERE (T2.name = 'ann') AND (T1.name = 'x')"
    );
}

#[test]
fn test_foreign_key_operator_does_not_join() {
    let (_, _, entry) = models();
    let q = entry.query().filter(("blog_id__gt", 3));
    assert!(q.joins.is_empty());
    assert_eq!(q.statement().unwrap(), "SELECT * FROM entry T WHERE T.blog_id > 3");
}

#[test]
fn test_statement_is_idempotent() {
    let (_, _, entry) = models();
    let q = entry.query().filter(("blog_id__name", "x"));
    let first = q.statement().unwrap();
    assert_eq!(q.statement().unwrap(), first);
    assert_eq!(q.joins.len(), 1);
}

#[test]
fn test_or_filter_and_exclude() {
    let sql = book()
        .query()
        .filter(("author", "ann"))
        .or_filter(("author", "bob"))
        .exclude(("price__gte", 50))
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM book T WHERE ((T.author = 'ann') OR (T.author = 'bob')) \
         AND (NOT (T.price >= 50))"
    );
}

#[test]
fn test_cond_groups() {
    let cond = Cond::or([
        Cond::from(("price__lt", 10)),
        Cond::new().with("author", "ann").with("name__startswith", "Rust"),
    ]);
    let sql = book().query().filter(cond).statement().unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM book T WHERE (T.price < 10) OR (T.author = 'ann' AND T.name LIKE 'Rust%')"
    );
}

#[test]
fn test_filter_with_groups_callback_conditions() {
    let sql = book()
        .query()
        .filter(("author", "ann"))
        .filter_with(|q| {
            q.filter(("price__lt", 10))
                .or_filter(("name__contains", "sale"))
        })
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM book T WHERE (T.author = 'ann') AND \
         ((T.price < 10) OR (T.name LIKE '%sale%'))"
    );
}

#[test]
fn test_in_and_null_lookups() {
    let sql = book()
        .query()
        .filter(("author__in", vec!["ann", "bob"]))
        .filter(("name__null", false))
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM book T WHERE (T.author IN ('ann', 'bob')) AND (T.name IS NOT NULL)"
    );
}

#[test]
fn test_group_by_annotate_having() {
    let sql = book()
        .query()
        .group_by(&["author"])
        .annotate("total", Agg::Sum, "price")
        .annotate("n", Agg::Count, "*")
        .having(("total__gt", 100))
        .order_by(&["-total"])
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT T.author, SUM(T.price) AS total, COUNT(*) AS n FROM book T \
         GROUP BY T.author HAVING SUM(T.price) > 100 ORDER BY SUM(T.price) DESC"
    );
}

#[test]
fn test_select_joined_path_is_aliased() {
    let (_, _, entry) = models();
    let q = entry
        .query()
        .select(&["headline", "blog_id__name"])
        .order_by(&["-rating", "headline"])
        .limit(10)
        .offset(20);
    assert_eq!(
        q.statement().unwrap(),
        "SELECT T.headline, T1.name AS blog_id__name FROM entry T \
         INNER JOIN blog T1 ON (T.blog_id = T1.id) \
         ORDER BY T.rating DESC, T.headline LIMIT 10 OFFSET 20"
    );
    assert_eq!(q.output_names(), ["headline", "blog_id__name"]);
}

#[test]
fn test_distinct_and_select_as() {
    let sql = book()
        .query()
        .distinct()
        .select_as("author", "writer")
        .statement()
        .unwrap();
    assert_eq!(sql, "SELECT DISTINCT T.author AS writer FROM book T");
}

#[test]
fn test_alias_must_come_first() {
    let sql = book().query().alias("B").filter(("price", 1)).statement().unwrap();
    assert_eq!(sql, "SELECT * FROM book B WHERE B.price = 1");

    let err = book()
        .query()
        .filter(("price", 1))
        .alias("B")
        .statement()
        .unwrap_err();
    assert!(err.is_sql_build());
}

#[test]
fn test_set_operations() {
    let book = book();
    let sql = book
        .query()
        .filter(("price__lt", 10))
        .union(book.query().filter(("price__gt", 100)))
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "(SELECT * FROM book T WHERE T.price < 10) UNION \
         (SELECT * FROM book T WHERE T.price > 100)"
    );
}

#[test]
fn test_with_cte_and_subquery_value() {
    let book = book();
    let cheap = book.query().select(&["name"]).filter(("price__lt", 5));
    let sql = book
        .query()
        .filter(("name__in", Value::from(cheap)))
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM book T WHERE T.name IN (SELECT T.name FROM book T WHERE T.price < 5)"
    );

    let sql = book
        .query()
        .with_cte("cheap", book.query().filter(("price__lt", 5)))
        .filter(Cond::raw("T.id IN (SELECT id FROM cheap)"))
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "WITH cheap AS (SELECT * FROM book T WHERE T.price < 5) \
         SELECT * FROM book T WHERE T.id IN (SELECT id FROM cheap)"
    );
}

#[test]
fn test_load_fk_left_joins_target() {
    let (_, _, entry) = models();
    let sql = entry
        .query()
        .load_fk("blog_id", &["name"])
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT T.*, T1.name AS blog_id__name FROM entry T LEFT JOIN blog T1 ON (T.blog_id = T1.id)"
    );
}

#[test]
fn test_load_fk_rejects_plain_field() {
    let (_, _, entry) = models();
    let err = entry.query().load_fk("headline", &[]).statement().unwrap_err();
    assert!(err.is_sql_build());
}

#[test]
fn test_json_paths() {
    let (_, _, entry) = models();
    let sql = entry
        .query()
        .filter(("data__tags__0", "rust"))
        .filter(("data__has_key", "draft"))
        .filter(("data__contains", json!({"a": 1})))
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM entry T WHERE ((T.data #> '{tags,0}' = '\"rust\"') \
         AND (T.data ? 'draft')) AND (T.data @> '{\"a\":1}')"
    );
}

#[test]
fn test_json_field_lookups_cast_to_jsonb() {
    let event = Model::build(
        ModelOptions::new("event").field(FieldOptions::json("payload").null(true)),
    )
    .unwrap();
    let sql = event
        .query()
        .filter(("payload__contains", json!({"a": 1})))
        .filter(("payload__user__name", "ann"))
        .filter(("payload__has_key", "draft"))
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM event T WHERE ((T.payload::jsonb @> '{\"a\":1}') \
         AND (T.payload::jsonb #> '{user,name}' = '\"ann\"')) \
         AND (T.payload::jsonb ? 'draft')"
    );
}

#[test]
fn test_non_finite_floats_render_as_literals() {
    let sql = book()
        .query()
        .filter(("price", f64::NAN))
        .statement()
        .unwrap();
    assert_eq!(sql, "SELECT * FROM book T WHERE T.price = 'NaN'::float8");

    let sql = book()
        .query()
        .insert(vec![name("a").with("author", "b").with("price", "inf")])
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "INSERT INTO book AS T (name, author, price) VALUES ('a', 'b', 'Infinity'::float8)"
    );
}

#[test]
fn test_self_reference_path_joins_each_hop() {
    let node = Model::build(
        ModelOptions::new("node")
            .field(FieldOptions::char("label", 50))
            .field(FieldOptions::foreign_key_self("parent_id").null(true)),
    )
    .unwrap();
    let q = node.query().filter(("parent_id__parent_id__label", "x"));
    assert_eq!(
        q.statement().unwrap(),
        "SELECT * FROM node T INNER JOIN node T1 ON (T.parent_id = T1.id) \
         INNER JOIN node T2 ON (T1.parent_id = T2.id) WHERE T2.label = 'x'"
    );
    assert_eq!(q.joins.len(), 2);
}

#[test]
fn test_reverse_relation_through_registry() {
    let (person, blog, entry) = models();
    let registry = Arc::new(Registry::new().with(&person).with(&blog).with(&entry));
    let sql = registry
        .query("blog")
        .unwrap()
        .filter(("entry__headline__contains", "rust"))
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT * FROM blog T INNER JOIN entry T1 ON (T.id = T1.blog_id) \
         WHERE T1.headline LIKE '%rust%'"
    );
}

#[test]
fn test_unknown_field_is_reported_by_statement() {
    let q = book().query().filter(("nope", 1)).filter(("price", 2));
    let err = q.statement().unwrap_err();
    assert!(err.is_sql_build());
    assert!(err.to_string().contains("nope"));
    assert!(q.statement().unwrap_err().is_sql_build());
}

#[test]
fn test_operator_not_allowed_in_column_path() {
    let err = book().query().select(&["price__gt"]).statement().unwrap_err();
    assert!(err.is_sql_build());
}

// ==================== INSERT / UPDATE / DELETE ====================

#[test]
fn test_insert_adds_defaults() {
    let (_, _, entry) = models();
    let sql = entry
        .query()
        .insert(Record::new().with("blog_id", 1).with("headline", "h"))
        .returning(&["id"])
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "INSERT INTO entry AS T (blog_id, headline, rating) VALUES (1, 'h', 0) RETURNING T.id"
    );
}

#[test]
fn test_insert_many_rows() {
    let (_, blog, _) = models();
    let q = blog.query().insert(vec![name("a"), name("b").with("tagline", "t")]);
    assert_eq!(q.kind(), StatementKind::Insert);
    assert_eq!(
        q.statement().unwrap(),
        "INSERT INTO blog AS T (name, tagline) VALUES ('a', NULL), ('b', 't')"
    );
}

#[test]
fn test_insert_stores_json() {
    let (_, _, entry) = models();
    let sql = entry
        .query()
        .insert_columns(
            Record::new()
                .with("blog_id", 1)
                .with("headline", "h")
                .with("data", json!({"tags": ["a"]})),
            &["blog_id", "headline", "data"],
        )
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "INSERT INTO entry AS T (blog_id, headline, data) VALUES (1, 'h', '{\"tags\":[\"a\"]}')"
    );
}

#[test]
fn test_insert_missing_required_field() {
    let (_, _, entry) = models();
    let err = entry
        .query()
        .insert(Record::new().with("blog_id", 1))
        .statement()
        .unwrap_err();
    match err {
        OrmError::Validation { field, .. } => assert_eq!(field, "headline"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_batch_validation_reports_row() {
    let (_, blog, _) = models();
    let long = "x".repeat(300);
    let err = blog
        .query()
        .insert(vec![name("ok"), name(&long)])
        .statement()
        .unwrap_err();
    match err {
        OrmError::ValidationBatch { index, field, .. } => {
            assert_eq!(index, 1);
            assert_eq!(field, "name");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_skip_validate() {
    let (_, blog, _) = models();
    let long = "x".repeat(300);
    assert!(
        blog.query()
            .skip_validate()
            .insert(name(&long))
            .statement()
            .is_ok()
    );
}

#[test]
fn test_insert_from_select() {
    let (person, blog, _) = models();
    let sql = blog
        .query()
        .insert_from(person.query().select(&["name"]), &[])
        .statement()
        .unwrap();
    assert_eq!(sql, "INSERT INTO blog AS T (name) SELECT T.name FROM person T");
}

#[test]
fn test_insert_from_mutation_uses_cte() {
    let (person, blog, _) = models();
    let sql = blog
        .query()
        .insert_from(person.query().delete().returning(&["name"]), &[])
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "WITH D AS (DELETE FROM person T RETURNING T.name) \
         INSERT INTO blog AS T (name) SELECT * FROM D"
    );

    let err = blog
        .query()
        .insert_from(person.query().delete(), &["name"])
        .statement()
        .unwrap_err();
    assert!(err.is_sql_build());
}

#[test]
fn test_update_and_delete_with_joins() {
    let (_, _, entry) = models();
    let sql = entry
        .query()
        .filter(("blog_id__name", "x"))
        .update(Record::new().with("headline", "h"))
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "UPDATE entry T SET headline = 'h' FROM blog T1 \
         WHERE (T.blog_id = T1.id) AND (T1.name = 'x')"
    );

    let sql = entry
        .query()
        .filter(("blog_id__name", "x"))
        .delete()
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "DELETE FROM entry T USING blog T1 WHERE (T.blog_id = T1.id) AND (T1.name = 'x')"
    );
}

#[test]
fn test_update_rejects_unknown_column() {
    let err = book()
        .query()
        .update(Record::new().with("nope", 1))
        .statement()
        .unwrap_err();
    assert!(err.is_sql_build());
}

// ==================== Upsert ====================

#[test]
fn test_upsert_updates_non_key_columns() {
    let (_, blog, _) = models();
    let sql = blog
        .query()
        .upsert(name("a").with("tagline", "b"), "name")
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "INSERT INTO blog AS T (name, tagline) VALUES ('a', 'b') \
         ON CONFLICT (name) DO UPDATE SET tagline = EXCLUDED.tagline"
    );
}

#[test]
fn test_upsert_key_only_does_nothing() {
    let (_, blog, _) = models();
    let sql = blog.query().upsert(name("a"), "name").statement().unwrap();
    assert_eq!(
        sql,
        "INSERT INTO blog AS T (name) VALUES ('a') ON CONFLICT (name) DO NOTHING"
    );
}

#[test]
fn test_upsert_column_list_must_include_key() {
    let (_, blog, _) = models();
    let err = blog
        .query()
        .upsert_columns(name("a").with("tagline", "b"), "name", &["tagline"])
        .statement()
        .unwrap_err();
    assert!(err.is_sql_build());
    assert!(err.to_string().contains("name"));
}

#[test]
fn test_upsert_from_needs_columns() {
    let (person, blog, _) = models();
    let err = blog
        .query()
        .upsert_from(person.query().select(&["name"]), "name", &[])
        .statement()
        .unwrap_err();
    assert!(err.is_sql_build());

    let sql = blog
        .query()
        .upsert_from(person.query().select(&["name"]), "name", &["name"])
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "INSERT INTO blog AS T (name) SELECT T.name FROM person T ON CONFLICT (name) DO NOTHING"
    );
}

// ==================== Bulk ====================

#[test]
fn test_merge_inserts_missing_keys() {
    let (_, blog, _) = models();
    let sql = blog
        .query()
        .merge(vec![name("First Blog"), name("New Blog")], "name")
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "WITH V(name) AS (VALUES ('First Blog'::varchar(255)), ('New Blog')), \
         new_records AS (SELECT V.* FROM V LEFT JOIN blog ON (V.name = blog.name) \
         WHERE blog.name IS NULL) \
         INSERT INTO blog AS T (name) SELECT * FROM new_records"
    );
}

#[test]
fn test_merge_statement_kind_matches_sql() {
    let (_, blog, _) = models();
    let q = blog.query().merge(vec![name("a")], "name");
    assert_eq!(q.kind(), StatementKind::Insert);
    assert_eq!(StatementKind::from_sql(&q.statement().unwrap()), StatementKind::Insert);
}

#[test]
fn test_merge_missing_key_names_row() {
    let (_, blog, _) = models();
    let err = blog
        .query()
        .merge(vec![name("a"), Record::new().with("tagline", "t")], "name")
        .statement()
        .unwrap_err();
    assert!(err.is_sql_build());
    assert!(err.to_string().contains("row 1"));
}

#[test]
fn test_updates_match_on_key() {
    let (_, blog, _) = models();
    let sql = blog
        .query()
        .updates(
            vec![
                Record::new().with("id", 1).with("name", "a"),
                Record::new().with("id", 2).with("name", "b"),
            ],
            "id",
        )
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "WITH V(id, name) AS (VALUES (1::integer, 'a'::varchar(255)), (2, 'b')) \
         UPDATE blog T SET name = V.name FROM V WHERE T.id = V.id"
    );
}

#[test]
fn test_updates_needs_non_key_column() {
    let (_, blog, _) = models();
    let err = blog
        .query()
        .updates(vec![Record::new().with("id", 1)], "id")
        .statement()
        .unwrap_err();
    assert!(err.is_sql_build());
}

#[test]
fn test_updates_from_query() {
    let (person, blog, _) = models();
    let sql = blog
        .query()
        .updates_from(person.query().select(&["id", "name"]), "id", &[])
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "WITH V(id, name) AS (SELECT T.id, T.name FROM person T) \
         UPDATE blog T SET name = V.name FROM V WHERE T.id = V.id"
    );
}

#[test]
fn test_get_multiple() {
    let (_, blog, _) = models();
    let sql = blog
        .query()
        .get_multiple(vec![Record::new().with("id", 1), Record::new().with("id", 2)])
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "WITH V(id) AS (VALUES (1::integer), (2)) \
         SELECT T.* FROM V INNER JOIN blog T ON (V.id = T.id)"
    );
}

#[test]
fn test_get_merge_selects_given_and_stored_columns() {
    let (_, blog, _) = models();
    let sql = blog
        .query()
        .get_merge(vec![name("a"), name("b")], "name")
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "WITH V(name) AS (VALUES ('a'::varchar(255)), ('b')) \
         SELECT V.*, T.id, T.owner_id, T.tagline FROM V LEFT JOIN blog T ON (V.name = T.name)"
    );
}

#[test]
fn test_get_multiple_on_selected_columns() {
    let (_, blog, _) = models();
    let sql = blog
        .query()
        .get_multiple_columns(vec![Record::new().with("id", 1).with("name", "a")], &["id"])
        .statement()
        .unwrap();
    assert_eq!(
        sql,
        "WITH V(id) AS (VALUES (1::integer)) SELECT T.* FROM V INNER JOIN blog T ON (V.id = T.id)"
    );
}
