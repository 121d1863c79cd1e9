use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FillError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("xml error: {0}")]
    Xml(String),
    #[error("unsupported format: {0:?}")]
    UnsupportedFormat(PathBuf),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("cell write failed at {coordinate}: {reason}")]
    CellWrite { coordinate: String, reason: String },
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("other: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, FillError>;

impl From<anyhow::Error> for FillError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}

impl From<quick_xml::Error> for FillError {
    fn from(value: quick_xml::Error) -> Self {
        Self::Xml(value.to_string())
    }
}
