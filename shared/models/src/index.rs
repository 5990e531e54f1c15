use crate::error::ModelError;
use crate::fields::Fields;
use crate::relations::RelationTree;
use crate::wheres::Wheres;
use pgsync_config::IndexMapping;

/// A record-transform subprocess attached to an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformSpec {
    pub name: String,
    pub args: Vec<String>,
}

/// A validated logical index: the root table, its document shape, filters
/// and relation tree. Built once at startup and immutable afterwards.
#[derive(Debug)]
pub struct Index {
    pub name: String,
    pub table: String,
    /// Source column used as the stable document id.
    pub reference_field: String,
    pub chunk_size: usize,
    pub fields: Fields,
    pub wheres: Wheres,
    pub relations: RelationTree,
    /// Forwarded to the target on index creation only.
    pub settings: Option<serde_json::Value>,
    pub mappings: Option<serde_json::Value>,
    pub transforms: Vec<TransformSpec>,
}

impl Index {
    pub fn from_mapping(mapping: &IndexMapping) -> Result<Self, ModelError> {
        Ok(Index {
            name: mapping.name.clone(),
            table: mapping.table.clone(),
            reference_field: mapping.reference_field.clone(),
            chunk_size: mapping.chunk_size,
            fields: Fields::from_decls(&mapping.fields)?,
            wheres: Wheres::from_decls(&mapping.wheres),
            relations: RelationTree::from_decls(&mapping.relations)?,
            settings: mapping.settings.clone(),
            mappings: mapping.mappings.clone(),
            transforms: mapping
                .transforms
                .iter()
                .map(|decl| TransformSpec {
                    name: decl.name().to_string(),
                    args: decl.args().to_vec(),
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_from_mapping() {
        let mapping: IndexMapping = serde_yaml::from_str(
            r#"
            name: posts
            table: posts
            chunk_size: 100
            fields: [id, title]
            wheres:
              - {column: published, condition: "= true"}
            relations:
              - type: one_to_many
                name: comments
                table: comments
                foreign_key: {local: post_id, parent: id}
                fields: [id, body]
            "#,
        )
        .unwrap();

        let index = Index::from_mapping(&mapping).unwrap();
        assert_eq!(index.name, "posts");
        assert_eq!(index.reference_field, "id");
        assert_eq!(index.chunk_size, 100);
        assert_eq!(index.fields.len(), 2);
        assert!(!index.wheres.is_empty());
        assert!(index.relations.by_unique_name("comments").is_some());
    }

    #[test]
    fn test_invalid_relation_bubbles_up() {
        let mapping: IndexMapping = serde_yaml::from_str(
            r#"
            name: posts
            table: posts
            relations:
              - type: sideways
                name: comments
                table: comments
                foreign_key: {local: post_id, parent: id}
            "#,
        )
        .unwrap();

        assert!(Index::from_mapping(&mapping).is_err());
    }
}
