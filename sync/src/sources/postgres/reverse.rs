//! Reverse predicates: given a batch of relation-row changes, identify the
//! root rows whose documents must be rebuilt.

use super::planner::{quote_ident, ref_in_clause};
use pgsync_models::{Index, RelationId, RelationKind, RelationUpdateEvent};

/// At most this many interpolated reference values per SQL statement.
pub const MAX_REFERENCES_PER_QUERY: usize = 50;

/// References for one relation group, split by origin: `direct` values match
/// the relation's `local` column, `pivot` values the pivot's `pivot_local`.
#[derive(Debug, Default)]
pub struct RelationRefs<'a> {
    pub direct: Vec<&'a str>,
    pub pivot: Vec<&'a str>,
}

impl<'a> RelationRefs<'a> {
    pub fn from_events(events: &'a [RelationUpdateEvent]) -> Self {
        let mut refs = RelationRefs::default();
        for event in events {
            if event.pivot {
                refs.pivot.push(&event.reference);
            } else {
                refs.direct.push(&event.reference);
            }
        }
        refs
    }
}

/// `( <p1> OR <p2> … )` over the grouped relations, ready to be AND-combined
/// with the root filter. None when every group is empty.
pub fn relation_update_where(
    index: &Index,
    groups: &[(RelationId, Vec<RelationUpdateEvent>)],
) -> Option<String> {
    let predicates: Vec<String> = groups
        .iter()
        .filter(|(_, events)| !events.is_empty())
        .map(|(relation_id, events)| {
            predicate_for(index, *relation_id, &RelationRefs::from_events(events))
        })
        .collect();

    if predicates.is_empty() {
        return None;
    }
    Some(format!("( {} )", predicates.join(" OR ")))
}

fn predicate_for(index: &Index, relation_id: RelationId, refs: &RelationRefs) -> String {
    let relation = index.relations.get(relation_id);

    // A top-level one_to_* relation points straight at the root key; the
    // changed references select root rows without any correlated sub-query.
    if relation.parent.is_none() && !matches!(relation.kind, RelationKind::ManyToMany { .. }) {
        return ref_in_clause(&index.table, &relation.foreign_key.parent, &refs.direct);
    }

    format!("EXISTS ({})", reverse_select(index, relation_id, Some(refs), None))
}

/// Correlated sub-query for one relation node, climbing the tree so that the
/// outermost EXISTS is correlated with the root table.
fn reverse_select(
    index: &Index,
    relation_id: RelationId,
    refs: Option<&RelationRefs>,
    inner: Option<String>,
) -> String {
    let tree = &index.relations;
    let relation = tree.get(relation_id);
    let parent_table = tree.parent_table(relation_id, &index.table);

    let mut sql = match &relation.kind {
        RelationKind::OneToOne | RelationKind::OneToMany => format!(
            "SELECT * FROM {} WHERE {}.{} = {}.{}",
            quote_ident(&relation.table),
            quote_ident(parent_table),
            quote_ident(&relation.foreign_key.parent),
            quote_ident(&relation.table),
            quote_ident(&relation.foreign_key.local),
        ),
        RelationKind::ManyToMany { pivot } => format!(
            "SELECT * FROM {} INNER JOIN {} ON {}.{} = {}.{} WHERE {}.{} = {}.{}",
            quote_ident(&relation.table),
            quote_ident(&pivot.table),
            quote_ident(&relation.table),
            quote_ident(&relation.foreign_key.local),
            quote_ident(&pivot.table),
            quote_ident(&pivot.related),
            quote_ident(parent_table),
            quote_ident(&relation.foreign_key.parent),
            quote_ident(&pivot.table),
            quote_ident(&pivot.local),
        ),
    };

    if let Some(refs) = refs {
        let mut parts = Vec::new();
        if !refs.direct.is_empty() {
            parts.push(ref_in_clause(
                &relation.table,
                &relation.foreign_key.local,
                &refs.direct,
            ));
        }
        if let (RelationKind::ManyToMany { pivot }, false) = (&relation.kind, refs.pivot.is_empty())
        {
            parts.push(ref_in_clause(&pivot.table, &pivot.local, &refs.pivot));
        }
        if !parts.is_empty() {
            sql.push_str(&format!(" AND ({})", parts.join(" OR ")));
        }
    }

    if let Some(inner) = inner {
        sql.push_str(&format!(" AND EXISTS ({inner})"));
    }

    match relation.parent {
        Some(parent_id) => reverse_select(index, parent_id, None, Some(sql)),
        None => sql,
    }
}

/// Splits grouped relation updates so that no chunk carries more than `max`
/// reference values in total, preserving order.
pub fn chunk_relation_groups(
    groups: Vec<(RelationId, Vec<RelationUpdateEvent>)>,
    max: usize,
) -> Vec<Vec<(RelationId, Vec<RelationUpdateEvent>)>> {
    let mut chunks = Vec::new();
    let mut current: Vec<(RelationId, Vec<RelationUpdateEvent>)> = Vec::new();
    let mut current_len = 0;

    for (relation_id, events) in groups {
        for event in events {
            if current_len == max {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            match current.last_mut() {
                Some((last_id, last_events)) if *last_id == relation_id => {
                    last_events.push(event)
                }
                _ => current.push((relation_id, vec![event])),
            }
            current_len += 1;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
