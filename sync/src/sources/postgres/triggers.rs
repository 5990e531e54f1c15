//! Trigger DDL: per-index functions and triggers that publish change
//! notifications on the configured channel.

use super::planner::{quote_ident, quote_literal};
use pgsync_models::{Index, Relation, RelationKind, Wheres};

/// Drops and recreates the dedicated schema so every install starts from a
/// clean slate; trigger functions cascade away with it.
pub fn schema_ddl(schema: &str) -> Vec<String> {
    vec![
        format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(schema)),
        format!("CREATE SCHEMA {}", quote_ident(schema)),
    ]
}

/// All statements for one index: the root trigger plus one trigger per
/// relation and one per many-to-many pivot table.
pub fn index_ddl(schema: &str, channel: &str, index: &Index) -> Vec<String> {
    let mut statements = Vec::new();

    let root_function = root_function_name(index);
    statements.push(root_trigger_function(schema, channel, index, &root_function));
    statements.push(attach_trigger(schema, &root_function, &index.table));

    for (_, relation) in index.relations.iter() {
        let function = relation_function_name(index, relation);
        statements.push(relation_trigger_function(
            schema, channel, index, relation, &function,
        ));
        statements.push(attach_trigger(schema, &function, &relation.table));

        if let RelationKind::ManyToMany { pivot } = &relation.kind {
            let function = pivot_function_name(index, relation);
            statements.push(pivot_trigger_function(
                schema, channel, index, relation, &function,
            ));
            statements.push(attach_trigger(schema, &function, &pivot.table));
        }
    }

    statements
}

pub fn root_function_name(index: &Index) -> String {
    format!("pgsync_trigger_{}", index.name)
}

pub fn relation_function_name(index: &Index, relation: &Relation) -> String {
    format!("pgsync_trigger_{}_rel_{}", index.name, relation.unique_name)
}

pub fn pivot_function_name(index: &Index, relation: &Relation) -> String {
    format!(
        "pgsync_trigger_{}_rel_pivot_{}",
        index.name, relation.unique_name
    )
}

/// Filter conditions evaluated against a trigger row (`NEW` / `OLD`).
/// `COALESCE(…, FALSE)` absorbs the missing row on INSERT and DELETE.
fn soft_delete_expr(wheres: &Wheres, row: &str) -> String {
    if wheres.is_empty() {
        return "FALSE".to_string();
    }
    let conditions = wheres
        .iter()
        .map(|clause| format!("{row}.{} {}", quote_ident(&clause.column), clause.condition))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!("COALESCE(NOT ({conditions}), FALSE)")
}

fn root_trigger_function(schema: &str, channel: &str, index: &Index, function: &str) -> String {
    format!(
        r#"CREATE OR REPLACE FUNCTION {schema_q}.{function_q}() RETURNS trigger AS $trigger$
DECLARE
  payload TEXT;
BEGIN
  IF TG_OP = 'UPDATE' AND NEW IS NOT DISTINCT FROM OLD THEN
    RETURN NEW;
  END IF;
  payload := JSON_BUILD_OBJECT(
    'type', 'table',
    'index', {index_name},
    'action', LOWER(TG_OP),
    'reference', COALESCE(NEW.{reference}, OLD.{reference})::TEXT,
    'soft_deleted', {soft_deleted},
    'old_soft_deleted', {old_soft_deleted}
  )::TEXT;
  PERFORM PG_NOTIFY({channel_lit}, payload);
  RETURN COALESCE(NEW, OLD);
END;
$trigger$ LANGUAGE plpgsql VOLATILE"#,
        schema_q = quote_ident(schema),
        function_q = quote_ident(function),
        index_name = quote_literal(&index.name),
        reference = quote_ident(&index.reference_field),
        soft_deleted = soft_delete_expr(&index.wheres, "NEW"),
        old_soft_deleted = soft_delete_expr(&index.wheres, "OLD"),
        channel_lit = quote_literal(channel),
    )
}

fn relation_trigger_function(
    schema: &str,
    channel: &str,
    index: &Index,
    relation: &Relation,
    function: &str,
) -> String {
    format!(
        r#"CREATE OR REPLACE FUNCTION {schema_q}.{function_q}() RETURNS trigger AS $trigger$
DECLARE
  payload TEXT;
BEGIN
  IF TG_OP = 'UPDATE' AND NEW IS NOT DISTINCT FROM OLD THEN
    RETURN NEW;
  END IF;
  IF COALESCE(NEW.{local}, OLD.{local}) IS NULL THEN
    RETURN COALESCE(NEW, OLD);
  END IF;
  payload := JSON_BUILD_OBJECT(
    'type', 'relation',
    'index', {index_name},
    'relation', {relation_name},
    'reference', COALESCE(NEW.{local}, OLD.{local})::TEXT
  )::TEXT;
  PERFORM PG_NOTIFY({channel_lit}, payload);
  RETURN COALESCE(NEW, OLD);
END;
$trigger$ LANGUAGE plpgsql VOLATILE"#,
        schema_q = quote_ident(schema),
        function_q = quote_ident(function),
        index_name = quote_literal(&index.name),
        relation_name = quote_literal(&relation.unique_name),
        local = quote_ident(&relation.foreign_key.local),
        channel_lit = quote_literal(channel),
    )
}

fn pivot_trigger_function(
    schema: &str,
    channel: &str,
    index: &Index,
    relation: &Relation,
    function: &str,
) -> String {
    let pivot = match &relation.kind {
        RelationKind::ManyToMany { pivot } => pivot,
        _ => unreachable!("pivot triggers exist for many_to_many relations only"),
    };
    format!(
        r#"CREATE OR REPLACE FUNCTION {schema_q}.{function_q}() RETURNS trigger AS $trigger$
DECLARE
  payload TEXT;
BEGIN
  IF TG_OP = 'UPDATE' AND NEW IS NOT DISTINCT FROM OLD THEN
    RETURN NEW;
  END IF;
  payload := JSON_BUILD_OBJECT(
    'type', 'relation_pivot',
    'index', {index_name},
    'relation', {relation_name},
    'local', COALESCE(NEW.{local}, OLD.{local})::TEXT,
    'old_local', COALESCE(OLD.{local}, NEW.{local})::TEXT,
    'related', COALESCE(NEW.{related}, OLD.{related})::TEXT,
    'old_related', COALESCE(OLD.{related}, NEW.{related})::TEXT
  )::TEXT;
  PERFORM PG_NOTIFY({channel_lit}, payload);
  RETURN COALESCE(NEW, OLD);
END;
$trigger$ LANGUAGE plpgsql VOLATILE"#,
        schema_q = quote_ident(schema),
        function_q = quote_ident(function),
        index_name = quote_literal(&index.name),
        relation_name = quote_literal(&relation.unique_name),
        local = quote_ident(&pivot.local),
        related = quote_ident(&pivot.related),
        channel_lit = quote_literal(channel),
    )
}

fn attach_trigger(schema: &str, function: &str, table: &str) -> String {
    format!(
        "CREATE OR REPLACE TRIGGER {trigger} AFTER INSERT OR UPDATE OR DELETE ON {table_q} FOR EACH ROW EXECUTE FUNCTION {schema_q}.{function_q}()",
        trigger = quote_ident(function),
        table_q = quote_ident(table),
        schema_q = quote_ident(schema),
        function_q = quote_ident(function),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgsync_config::IndexMapping;

    fn index(yaml: &str) -> Index {
        let mapping: IndexMapping = serde_yaml::from_str(yaml).unwrap();
        Index::from_mapping(&mapping).unwrap()
    }

    #[test]
    fn test_schema_is_recreated_from_scratch() {
        let ddl = schema_ddl("pgsync");
        assert_eq!(ddl[0], r#"DROP SCHEMA IF EXISTS "pgsync" CASCADE"#);
        assert_eq!(ddl[1], r#"CREATE SCHEMA "pgsync""#);
    }

    #[test]
    fn test_root_trigger_encodes_the_filter_as_soft_delete() {
        let index = index(
            r#"
            name: users
            table: users
            fields: [id, name]
            wheres:
              - {column: active, condition: "= true"}
            "#,
        );
        let ddl = index_ddl("pgsync", "pgsync_event", &index);

        assert_eq!(ddl.len(), 2);
        let function = &ddl[0];
        assert!(function.starts_with(r#"CREATE OR REPLACE FUNCTION "pgsync"."pgsync_trigger_users"()"#));
        assert!(function.contains(r#"'soft_deleted', COALESCE(NOT (NEW."active" = true), FALSE)"#));
        assert!(function.contains(r#"'old_soft_deleted', COALESCE(NOT (OLD."active" = true), FALSE)"#));
        assert!(function.contains("IF TG_OP = 'UPDATE' AND NEW IS NOT DISTINCT FROM OLD THEN"));
        assert!(function.contains("PERFORM PG_NOTIFY('pgsync_event', payload)"));

        assert_eq!(
            ddl[1],
            r#"CREATE OR REPLACE TRIGGER "pgsync_trigger_users" AFTER INSERT OR UPDATE OR DELETE ON "users" FOR EACH ROW EXECUTE FUNCTION "pgsync"."pgsync_trigger_users"()"#
        );
    }

    #[test]
    fn test_no_wheres_means_never_soft_deleted() {
        let index = index("name: users\ntable: users\nfields: [id]");
        let ddl = index_ddl("pgsync", "pgsync_event", &index);
        assert!(ddl[0].contains("'soft_deleted', FALSE"));
        assert!(ddl[0].contains("'old_soft_deleted', FALSE"));
    }

    #[test]
    fn test_relation_and_pivot_triggers_are_installed() {
        let index = index(
            r#"
            name: users
            table: users
            fields: [id]
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
            "#,
        );
        let ddl = index_ddl("pgsync", "pgsync_event", &index);

        // Root pair, relation pair, pivot pair.
        assert_eq!(ddl.len(), 6);
        assert!(ddl[2].contains(r#""pgsync_trigger_users_rel_roles""#));
        assert!(ddl[2].contains("'type', 'relation'"));
        assert!(ddl[3].contains(r#"ON "roles""#));
        assert!(ddl[4].contains(r#""pgsync_trigger_users_rel_pivot_roles""#));
        assert!(ddl[4].contains("'type', 'relation_pivot'"));
        assert!(ddl[4].contains(r#"'local', COALESCE(NEW."user_id", OLD."user_id")::TEXT"#));
        assert!(ddl[4].contains(r#"'old_related', COALESCE(OLD."role_id", NEW."role_id")::TEXT"#));
        assert!(ddl[5].contains(r#"ON "user_role""#));
    }

    #[test]
    fn test_nested_relation_trigger_uses_unique_name() {
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
                relations:
                  - type: one_to_one
                    name: author
                    table: users
                    foreign_key: {local: id, parent: author_id}
            "#,
        );
        let ddl = index_ddl("pgsync", "pgsync_event", &index);

        let nested: Vec<_> = ddl
            .iter()
            .filter(|sql| sql.contains("pgsync_trigger_posts_rel_comments_author"))
            .collect();
        assert_eq!(nested.len(), 2);
        assert!(nested[0].contains("'relation', 'comments_author'"));
        assert!(nested[0].contains(r#"IF COALESCE(NEW."id", OLD."id") IS NULL THEN"#));
    }
}
