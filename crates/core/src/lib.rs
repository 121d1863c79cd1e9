mod chunk;
mod document;
mod docx;
mod embedding;
mod error;
mod executor;
mod extract;
mod field;
mod format;
mod indexer;
mod package;
mod tag;
mod xlsx;
mod xml;

#[doc(hidden)]
pub mod fixtures;

pub use chunk::{ChunkConfig, Chunker};
pub use document::{CellHandle, CellNode, Container, Coordinate, DocumentKind, FieldDocument};
pub use embedding::{l2_normalize, HashEmbedder, HashEmbedderConfig};
pub use error::{FillError, Result};
pub use executor::{
    output_file_name, ApplyOutcome, ExecutorConfig, FillEntry, FillExecutor, RestoreEntry,
    PIPELINE_SUFFIXES,
};
pub use extract::{extract_text, is_knowledge_file};
pub use field::{Field, FieldState, TransitionError};
pub use format::{FormatSnapshot, ParagraphFormat, RunStyle};
pub use indexer::{
    FieldIndexer, IndexMode, IndexedDocument, IndexerConfig, DEFAULT_PLACEHOLDERS,
};
pub use package::OoxmlPackage;
pub use tag::{strip_tag, tag_text, trailing_tag};
pub use xlsx::{cell_reference, column_letters, parse_reference};
pub use xml::{XmlDocument, XmlElement, XmlNode};
