use thiserror::Error;

#[derive(Debug, Error)]
pub enum FactsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
