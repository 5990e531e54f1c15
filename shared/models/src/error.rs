use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Invalid relation: {0}")]
    InvalidRelation(String),

    #[error("Unknown relation type: {0}")]
    UnknownRelationKind(String),
}
