use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Invalid source configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Malformed notification payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown source driver: {0}")]
    UnknownDriver(String),
}
