use thiserror::Error;

use formfill_core::FillError;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("classification output could not be parsed: {0}")]
    ClassificationParse(String),
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("embedding error: {0}")]
    Embedding(String),
    #[error("model request failed: {0}")]
    Model(String),
    #[error(transparent)]
    Document(#[from] FillError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RagError>;
