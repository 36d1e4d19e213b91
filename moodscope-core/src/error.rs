use thiserror::Error;

#[derive(Error, Debug)]
pub enum MoodscopeError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Missing API key: environment variable {0} is not set")]
    MissingApiKey(String),
}
