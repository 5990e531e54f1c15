//! Forward SELECT construction: one statement per index returning a
//! `result` JSON document and a `reference` per matching root row.

use pgsync_models::{Field, Fields, Index, RelationId, RelationKind, RelationTree, Wheres};

/// Pair budget per JSON object constructor; above this the object is split
/// into JSONB chunks merged with `||` to stay under the 100-argument limit.
const JSON_OBJECT_CHUNK: usize = 50;

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// References and other interpolated values are always rendered as
/// single-quoted literals; Postgres coerces them for integer columns.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `SELECT <document> AS "result", <ref>::TEXT AS "reference" FROM <root>`
/// plus one LEFT OUTER JOIN subtree per top-level relation. WHERE clauses
/// are appended by the caller.
pub fn forward_select(index: &Index) -> String {
    let mut pairs = field_pairs(&index.fields, &index.table);
    let mut joins = String::new();
    for &relation_id in index.relations.roots() {
        let relation = index.relations.get(relation_id);
        pairs.push((
            relation.name.clone(),
            format!("{}.\"result\"", quote_ident(&relation.name)),
        ));
        joins.push(' ');
        joins.push_str(&left_join(&index.relations, relation_id, &index.table));
    }

    format!(
        "SELECT {} AS \"result\", {}.{}::TEXT AS \"reference\" FROM {}{}",
        json_object(&pairs),
        quote_ident(&index.table),
        quote_ident(&index.reference_field),
        quote_ident(&index.table),
        joins,
    )
}

/// Root filter conditions, or None when the index declares no `wheres`.
pub fn root_where(index: &Index) -> Option<String> {
    condition_sql(&index.wheres, &index.table)
}

/// Renders ` WHERE (c1) AND (c2)…`, or nothing for an empty clause list.
pub fn where_clause(clauses: &[String]) -> String {
    if clauses.is_empty() {
        return String::new();
    }
    let joined = clauses
        .iter()
        .map(|clause| format!("({clause})"))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(" WHERE {joined}")
}

/// One keyset page: base query, filters, strictly-greater-than cursor,
/// ascending order, chunk-size limit.
pub fn paged_sql(
    base: &str,
    clauses: &[String],
    order_expr: &str,
    previous: Option<&str>,
    limit: usize,
) -> String {
    let mut clauses = clauses.to_vec();
    if let Some(previous) = previous {
        clauses.push(format!("{order_expr} > {}", quote_literal(previous)));
    }
    format!(
        "{base}{} ORDER BY {order_expr} ASC LIMIT {limit}",
        where_clause(&clauses),
    )
}

/// `"table"."column"::TEXT IN ('a','b',…)`
pub fn ref_in_clause(table: &str, column: &str, references: &[&str]) -> String {
    let list = references
        .iter()
        .map(|reference| quote_literal(reference))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "{}.{}::TEXT IN ({})",
        quote_ident(table),
        quote_ident(column),
        list,
    )
}

fn condition_sql(wheres: &Wheres, table: &str) -> Option<String> {
    if wheres.is_empty() {
        return None;
    }
    Some(
        wheres
            .iter()
            .map(|clause| {
                format!(
                    "{}.{} {}",
                    quote_ident(table),
                    quote_ident(&clause.column),
                    clause.condition,
                )
            })
            .collect::<Vec<_>>()
            .join(" AND "),
    )
}

fn field_pairs(fields: &Fields, table: &str) -> Vec<(String, String)> {
    fields
        .iter()
        .map(|field| match field {
            Field::Simple { alias, column } => (
                alias.clone(),
                format!("{}.{}", quote_ident(table), quote_ident(column)),
            ),
            Field::Scripted { alias, expression } => (
                alias.clone(),
                expression.replace("{{table}}", &quote_ident(table)),
            ),
        })
        .collect()
}

fn json_object(pairs: &[(String, String)]) -> String {
    let rendered: Vec<String> = pairs
        .iter()
        .map(|(alias, expr)| format!("{},{expr}", quote_literal(alias)))
        .collect();

    if rendered.len() <= JSON_OBJECT_CHUNK {
        return format!("JSON_BUILD_OBJECT({})", rendered.join(","));
    }

    rendered
        .chunks(JSON_OBJECT_CHUNK)
        .map(|chunk| format!("JSONB_BUILD_OBJECT({})", chunk.join(",")))
        .collect::<Vec<_>>()
        .join(" || ")
}

/// One relation subtree as an inline aggregated sub-query joined on the
/// parent's key; recurses into nested relations.
fn left_join(tree: &RelationTree, relation_id: RelationId, parent_table: &str) -> String {
    let relation = tree.get(relation_id);

    let mut pairs = field_pairs(&relation.fields, &relation.table);
    let mut joins = String::new();
    for &child_id in tree.children(relation_id) {
        let child = tree.get(child_id);
        pairs.push((
            child.name.clone(),
            format!("{}.\"result\"", quote_ident(&child.name)),
        ));
        joins.push(' ');
        joins.push_str(&left_join(tree, child_id, &relation.table));
    }

    let mut conditions = Vec::new();
    if let Some(wheres) = condition_sql(&relation.wheres, &relation.table) {
        conditions.push(wheres);
    }
    if relation.soft_delete {
        conditions.push(format!(
            "{}.\"deleted_at\" IS NULL",
            quote_ident(&relation.table),
        ));
    }
    let filter = where_clause(&conditions);

    let inner = match &relation.kind {
        RelationKind::OneToOne => format!(
            "SELECT {} AS \"result\", {}.{} AS \"parent_ref\" FROM {}{}{}",
            json_object(&pairs),
            quote_ident(&relation.table),
            quote_ident(&relation.foreign_key.local),
            quote_ident(&relation.table),
            joins,
            filter,
        ),
        RelationKind::OneToMany => format!(
            "SELECT JSON_AGG({}) AS \"result\", {}.{} AS \"parent_ref\" FROM {}{}{} GROUP BY {}.{}",
            json_object(&pairs),
            quote_ident(&relation.table),
            quote_ident(&relation.foreign_key.local),
            quote_ident(&relation.table),
            joins,
            filter,
            quote_ident(&relation.table),
            quote_ident(&relation.foreign_key.local),
        ),
        RelationKind::ManyToMany { pivot } => {
            pairs.extend(field_pairs(&pivot.fields, &pivot.table));
            format!(
                "SELECT JSON_AGG({}) AS \"result\", {}.{} AS \"parent_ref\" FROM {} INNER JOIN {} ON {}.{} = {}.{}{}{} GROUP BY {}.{}",
                json_object(&pairs),
                quote_ident(&pivot.table),
                quote_ident(&pivot.local),
                quote_ident(&pivot.table),
                quote_ident(&relation.table),
                quote_ident(&relation.table),
                quote_ident(&relation.foreign_key.local),
                quote_ident(&pivot.table),
                quote_ident(&pivot.related),
                joins,
                filter,
                quote_ident(&pivot.table),
                quote_ident(&pivot.local),
            )
        }
    };

    format!(
        "LEFT OUTER JOIN ({inner}) AS {} ON {}.\"parent_ref\" = {}.{}",
        quote_ident(&relation.name),
        quote_ident(&relation.name),
        quote_ident(parent_table),
        quote_ident(&relation.foreign_key.parent),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;
    use pgsync_config::IndexMapping;

    fn index(yaml: &str) -> Index {
        let mapping: IndexMapping = serde_yaml::from_str(yaml).unwrap();
        Index::from_mapping(&mapping).unwrap()
    }

    #[test]
    fn test_simple_forward_select() {
        let index = index(
            r#"
            name: users
            table: users
            fields: [id, name]
            "#,
        );

        expect![[r#"SELECT JSON_BUILD_OBJECT('id',"users"."id",'name',"users"."name") AS "result", "users"."id"::TEXT AS "reference" FROM "users""#]]
            .assert_eq(&forward_select(&index));
    }

    #[test]
    fn test_scripted_field_substitutes_table_token() {
        let index = index(
            r#"
            name: users
            table: users
            fields:
              - alias: full_name
                script: CONCAT({{table}}."first", ' ', {{table}}."last")
            "#,
        );

        expect![[r#"SELECT JSON_BUILD_OBJECT('full_name',CONCAT("users"."first", ' ', "users"."last")) AS "result", "users"."id"::TEXT AS "reference" FROM "users""#]]
            .assert_eq(&forward_select(&index));
    }

    #[test]
    fn test_one_to_many_left_join() {
        let index = index(
            r#"
            name: posts
            table: posts
            fields: [id, title]
            relations:
              - type: one_to_many
                name: comments
                table: comments
                foreign_key: {local: post_id, parent: id}
                fields: [id, body]
            "#,
        );

        expect![[r#"SELECT JSON_BUILD_OBJECT('id',"posts"."id",'title',"posts"."title",'comments',"comments"."result") AS "result", "posts"."id"::TEXT AS "reference" FROM "posts" LEFT OUTER JOIN (SELECT JSON_AGG(JSON_BUILD_OBJECT('id',"comments"."id",'body',"comments"."body")) AS "result", "comments"."post_id" AS "parent_ref" FROM "comments" GROUP BY "comments"."post_id") AS "comments" ON "comments"."parent_ref" = "posts"."id""#]]
            .assert_eq(&forward_select(&index));
    }

    #[test]
    fn test_one_to_one_with_soft_delete_and_wheres() {
        let index = index(
            r#"
            name: comments
            table: comments
            fields: [id]
            relations:
              - type: one_to_one
                name: author
                table: users
                soft_delete: true
                foreign_key: {local: id, parent: author_id}
                fields: [name]
                wheres:
                  - {column: banned, condition: "= false"}
            "#,
        );

        let sql = forward_select(&index);
        assert!(sql.contains(
            r#"LEFT OUTER JOIN (SELECT JSON_BUILD_OBJECT('name',"users"."name") AS "result", "users"."id" AS "parent_ref" FROM "users" WHERE ("users"."banned" = false) AND ("users"."deleted_at" IS NULL)) AS "author""#
        ));
        assert!(sql.ends_with(r#"ON "author"."parent_ref" = "comments"."author_id""#));
    }

    #[test]
    fn test_many_to_many_with_pivot_fields() {
        let index = index(
            r#"
            name: users
            table: users
            fields: [id, name]
            relations:
              - type: many_to_many
                name: roles
                table: roles
                foreign_key:
                  local: id
                  parent: id
                  pivot_table: user_role
                  pivot_local: user_id
                  pivot_related: role_id
                  pivot_fields: [granted_at]
                fields: [id, label]
            "#,
        );

        let sql = forward_select(&index);
        // Role fields and the pivot field each appear exactly once per row.
        assert!(sql.contains(
            r#"JSON_AGG(JSON_BUILD_OBJECT('id',"roles"."id",'label',"roles"."label",'granted_at',"user_role"."granted_at"))"#
        ));
        assert!(sql.contains(
            r#"FROM "user_role" INNER JOIN "roles" ON "roles"."id" = "user_role"."role_id""#
        ));
        assert!(sql.contains(r#"GROUP BY "user_role"."user_id""#));
        assert!(sql.ends_with(r#"AS "roles" ON "roles"."parent_ref" = "users"."id""#));
    }

    #[test]
    fn test_nested_relation_joins_inside_the_subquery() {
        let index = index(
            r#"
            name: posts
            table: posts
            fields: [id]
            relations:
              - type: one_to_many
                name: comments
                table: comments
                foreign_key: {local: post_id, parent: id}
                fields: [body]
                relations:
                  - type: one_to_one
                    name: author
                    table: users
                    foreign_key: {local: id, parent: author_id}
                    fields: [name]
            "#,
        );

        let sql = forward_select(&index);
        assert!(sql.contains(r#"'author',"author"."result""#));
        assert!(sql.contains(r#"ON "author"."parent_ref" = "comments"."author_id""#));
        // Exactly one join subtree per relation.
        assert_eq!(sql.matches("LEFT OUTER JOIN").count(), 2);
    }

    #[test]
    fn test_wide_field_list_chunks_into_jsonb() {
        let fields: Vec<String> = (0..60).map(|n| format!("col_{n}")).collect();
        let index = index(&format!(
            "name: wide\ntable: wide\nfields: [{}]",
            fields.join(", "),
        ));

        let sql = forward_select(&index);
        assert_eq!(sql.matches("JSONB_BUILD_OBJECT").count(), 2);
        assert!(sql.contains(") || JSONB_BUILD_OBJECT("));
        assert!(!sql.contains("JSON_BUILD_OBJECT("));
        for alias in &fields {
            assert_eq!(sql.matches(&format!("'{alias}',")).count(), 1);
        }
    }

    #[test]
    fn test_paged_sql_with_and_without_cursor() {
        let base = r#"SELECT * FROM "users""#;
        let wheres = vec![r#""users"."active" = true"#.to_string()];

        expect![[r#"SELECT * FROM "users" WHERE ("users"."active" = true) ORDER BY "users"."id" ASC LIMIT 500"#]]
            .assert_eq(&paged_sql(base, &wheres, r#""users"."id""#, None, 500));

        expect![[r#"SELECT * FROM "users" WHERE ("users"."active" = true) AND ("users"."id" > '42') ORDER BY "users"."id" ASC LIMIT 500"#]]
            .assert_eq(&paged_sql(base, &wheres, r#""users"."id""#, Some("42"), 500));
    }

    #[test]
    fn test_quote_literal_escapes_quotes() {
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
        assert_eq!(
            ref_in_clause("users", "id", &["1", "x'; --"]),
            r#""users"."id"::TEXT IN ('1','x''; --')"#
        );
    }
}
