use pgsync_config::WhereDecl;

/// A raw SQL predicate on one column, e.g. `{column: active, condition: "= true"}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Where {
    pub column: String,
    pub condition: String,
}

/// Ordered predicate list, joined with AND at SQL-generation time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Wheres(Vec<Where>);

impl Wheres {
    pub fn from_decls(decls: &[WhereDecl]) -> Self {
        Wheres(
            decls
                .iter()
                .map(|decl| Where {
                    column: decl.column.clone(),
                    condition: decl.condition.clone(),
                })
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &Where> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
