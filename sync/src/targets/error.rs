use thiserror::Error;

#[derive(Error, Debug)]
pub enum TargetError {
    #[error("Invalid target configuration: {0}")]
    InvalidConfiguration(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Target rejected request: {0}")]
    Rejected(String),

    #[error("Unknown target driver: {0}")]
    UnknownDriver(String),
}
