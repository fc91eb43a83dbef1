use thiserror::Error;

#[derive(Error, Debug)]
pub enum StormError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Input data error: {0}")]
    Input(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StormError>;
