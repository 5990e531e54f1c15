use serde::Deserialize;

fn default_reference_field() -> String {
    "id".to_string()
}

fn default_chunk_size() -> usize {
    500
}

/// One entry of the top-level `mappings` list: the declarative form of a
/// logical index, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexMapping {
    pub name: String,
    pub table: String,

    #[serde(default = "default_reference_field")]
    pub reference_field: String,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Forwarded verbatim to the target on index creation.
    #[serde(default)]
    pub settings: Option<serde_json::Value>,

    /// Forwarded verbatim to the target on index creation.
    #[serde(default)]
    pub mappings: Option<serde_json::Value>,

    /// Source adapter instance name; falls back to `default_in`.
    #[serde(rename = "in", default)]
    pub source: Option<String>,

    /// Target adapter instance names; falls back to `default_out`.
    #[serde(rename = "out", default)]
    pub targets: Option<Vec<String>>,

    #[serde(default)]
    pub fields: Vec<FieldDecl>,

    #[serde(default)]
    pub wheres: Vec<WhereDecl>,

    #[serde(default)]
    pub relations: Vec<RelationDecl>,

    #[serde(default)]
    pub transforms: Vec<TransformDecl>,
}

/// A selected column. The plain-string form selects a column under its own
/// name; the map form either aliases a column or evaluates a SQL expression
/// (`script`) in which `{{table}}` is replaced by the current table.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FieldDecl {
    Name(String),
    Full {
        alias: String,
        #[serde(default)]
        field: Option<String>,
        #[serde(default)]
        script: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhereDecl {
    pub column: String,
    pub condition: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelationDecl {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub table: String,

    #[serde(default)]
    pub soft_delete: bool,

    pub foreign_key: ForeignKeyDecl,

    #[serde(default)]
    pub fields: Vec<FieldDecl>,

    #[serde(default)]
    pub wheres: Vec<WhereDecl>,

    #[serde(default)]
    pub relations: Vec<RelationDecl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForeignKeyDecl {
    pub local: String,
    pub parent: String,

    #[serde(default)]
    pub pivot_table: Option<String>,

    #[serde(default)]
    pub pivot_local: Option<String>,

    #[serde(default)]
    pub pivot_related: Option<String>,

    #[serde(default)]
    pub pivot_fields: Vec<FieldDecl>,
}

/// An external record-transform subprocess, looked up under `plugins/` by
/// name. The map form passes arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TransformDecl {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl TransformDecl {
    pub fn name(&self) -> &str {
        match self {
            TransformDecl::Name(name) => name,
            TransformDecl::Full { name, .. } => name,
        }
    }

    pub fn args(&self) -> &[String] {
        match self {
            TransformDecl::Name(_) => &[],
            TransformDecl::Full { args, .. } => args,
        }
    }
}
