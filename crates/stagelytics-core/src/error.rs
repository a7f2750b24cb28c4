use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown scope: {0}")]
    UnknownScope(String),

    #[error("unknown metric column: {0}")]
    UnknownMetric(String),
}
