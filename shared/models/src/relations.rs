use crate::error::ModelError;
use crate::fields::Fields;
use crate::wheres::Wheres;
use pgsync_config::RelationDecl;
use std::collections::HashMap;

/// Stable handle into a [`RelationTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelationId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    OneToOne,
    OneToMany,
    ManyToMany { pivot: Pivot },
}

/// Join table of a many-to-many relation. `local` points at the parent row,
/// `related` at the related row; `fields` are merged into each per-row
/// document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pivot {
    pub table: String,
    pub local: String,
    pub related: String,
    pub fields: Fields,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// Column on the relation's own table.
    pub local: String,
    /// Column on the parent table (the index root for top-level relations).
    pub parent: String,
}

#[derive(Debug)]
pub struct Relation {
    pub kind: RelationKind,
    pub name: String,
    /// Path from the root, segments joined with `_`; addresses the relation
    /// in trigger payloads and reverse predicates.
    pub unique_name: String,
    pub table: String,
    pub soft_delete: bool,
    pub fields: Fields,
    pub wheres: Wheres,
    pub foreign_key: ForeignKey,
    pub parent: Option<RelationId>,
    children: Vec<RelationId>,
}

/// Arena of relation nodes. Children own nothing; all edges are ids, so
/// parents and children can reference each other without shared ownership.
#[derive(Debug, Default)]
pub struct RelationTree {
    nodes: Vec<Relation>,
    roots: Vec<RelationId>,
    by_unique_name: HashMap<String, RelationId>,
}

impl RelationTree {
    pub fn from_decls(decls: &[RelationDecl]) -> Result<Self, ModelError> {
        let mut tree = RelationTree::default();
        let mut roots = Vec::with_capacity(decls.len());
        check_sibling_names(decls)?;
        for decl in decls {
            roots.push(tree.insert(decl, None, None)?);
        }
        tree.roots = roots;
        Ok(tree)
    }

    fn insert(
        &mut self,
        decl: &RelationDecl,
        parent: Option<RelationId>,
        parent_unique: Option<&str>,
    ) -> Result<RelationId, ModelError> {
        let kind = parse_kind(decl)?;
        let unique_name = match parent_unique {
            Some(prefix) => format!("{prefix}_{}", decl.name),
            None => decl.name.clone(),
        };

        let id = RelationId(self.nodes.len());
        self.nodes.push(Relation {
            kind,
            name: decl.name.clone(),
            unique_name: unique_name.clone(),
            table: decl.table.clone(),
            soft_delete: decl.soft_delete,
            fields: Fields::from_decls(&decl.fields)?,
            wheres: Wheres::from_decls(&decl.wheres),
            foreign_key: ForeignKey {
                local: decl.foreign_key.local.clone(),
                parent: decl.foreign_key.parent.clone(),
            },
            parent,
            children: Vec::new(),
        });
        self.by_unique_name.insert(unique_name.clone(), id);

        check_sibling_names(&decl.relations)?;
        let mut children = Vec::with_capacity(decl.relations.len());
        for child in &decl.relations {
            children.push(self.insert(child, Some(id), Some(&unique_name))?);
        }
        self.nodes[id.0].children = children;
        Ok(id)
    }

    pub fn get(&self, id: RelationId) -> &Relation {
        &self.nodes[id.0]
    }

    pub fn roots(&self) -> &[RelationId] {
        &self.roots
    }

    pub fn children(&self, id: RelationId) -> &[RelationId] {
        &self.nodes[id.0].children
    }

    pub fn by_unique_name(&self, unique_name: &str) -> Option<RelationId> {
        self.by_unique_name.get(unique_name).copied()
    }

    /// All nodes, depth-agnostic.
    pub fn iter(&self) -> impl Iterator<Item = (RelationId, &Relation)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (RelationId(idx), node))
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Table the relation joins against: its parent's table, or the given
    /// root table for top-level relations.
    pub fn parent_table<'a>(&'a self, id: RelationId, root_table: &'a str) -> &'a str {
        match self.get(id).parent {
            Some(parent) => &self.get(parent).table,
            None => root_table,
        }
    }
}

fn parse_kind(decl: &RelationDecl) -> Result<RelationKind, ModelError> {
    match decl.kind.as_str() {
        "one_to_one" => Ok(RelationKind::OneToOne),
        "one_to_many" => Ok(RelationKind::OneToMany),
        "many_to_many" => {
            let fk = &decl.foreign_key;
            match (&fk.pivot_table, &fk.pivot_local, &fk.pivot_related) {
                (Some(table), Some(local), Some(related)) => Ok(RelationKind::ManyToMany {
                    pivot: Pivot {
                        table: table.clone(),
                        local: local.clone(),
                        related: related.clone(),
                        fields: Fields::from_decls(&fk.pivot_fields)?,
                    },
                }),
                _ => Err(ModelError::InvalidRelation(format!(
                    "many_to_many relation {} requires pivot_table, pivot_local and pivot_related",
                    decl.name
                ))),
            }
        }
        other => Err(ModelError::UnknownRelationKind(other.to_string())),
    }
}

fn check_sibling_names(decls: &[RelationDecl]) -> Result<(), ModelError> {
    let mut seen = std::collections::HashSet::new();
    for decl in decls {
        if !seen.insert(decl.name.as_str()) {
            return Err(ModelError::InvalidRelation(format!(
                "duplicate relation name among siblings: {}",
                decl.name
            )));
        }
    }
    Ok(())
}
