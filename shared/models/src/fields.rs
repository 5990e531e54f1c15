use crate::error::ModelError;
use pgsync_config::FieldDecl;

/// One selected column or expression of an index or relation document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// `"alias": "table"."column"`
    Simple { alias: String, column: String },
    /// `"alias": <expression>` with `{{table}}` substituted at planning time.
    Scripted { alias: String, expression: String },
}

impl Field {
    pub fn alias(&self) -> &str {
        match self {
            Field::Simple { alias, .. } => alias,
            Field::Scripted { alias, .. } => alias,
        }
    }
}

/// Ordered field list; declaration order is preserved all the way into the
/// generated SQL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields(Vec<Field>);

impl Fields {
    pub fn from_decls(decls: &[FieldDecl]) -> Result<Self, ModelError> {
        let mut fields = Vec::with_capacity(decls.len());
        for decl in decls {
            fields.push(match decl {
                FieldDecl::Name(name) => Field::Simple {
                    alias: name.clone(),
                    column: name.clone(),
                },
                FieldDecl::Full {
                    alias,
                    field: Some(column),
                    script: None,
                } => Field::Simple {
                    alias: alias.clone(),
                    column: column.clone(),
                },
                FieldDecl::Full {
                    alias,
                    field: None,
                    script: Some(expression),
                } => Field::Scripted {
                    alias: alias.clone(),
                    expression: expression.clone(),
                },
                FieldDecl::Full { alias, .. } => {
                    return Err(ModelError::InvalidField(format!(
                        "field {alias} must define exactly one of `field` or `script`"
                    )))
                }
            });
        }
        Ok(Fields(fields))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
