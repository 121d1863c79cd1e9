pub mod classifier;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod keywords;
pub mod orchestrator;
pub mod pipeline;
pub mod vector;

pub use classifier::{
    extract_json_payload, parse_payload, DecisionField, DecisionRequest, DecisionResponse,
    DescribeRequest, DescriptionResponse, FieldClassifier, FieldDescription, FilledCell,
    LlmClassifier, RestoredCell, TextSplitter,
};
pub use embedding::{
    EmbeddingBackend, EmbeddingClient, EmbeddingConfig, EmbeddingProvider, OpenAiEmbeddingClient,
};
pub use engine::{IndexStats, RetrievalConfig, RetrievalEngine};
pub use error::{RagError, Result};
pub use ingest::{ChunkingMode, IngestConfig, KnowledgeIngestor};
pub use keywords::{query_for_field, KEYWORD_GROUPS};
pub use orchestrator::{DecisionOrchestrator, OrchestratorConfig, Reconciliation, UndescribedPolicy};
pub use pipeline::{DecisionRecord, FillPipeline, FillReport};
pub use vector::VectorIndex;
pub use formfill_llm::{ImageAttachment, LlmClient, LlmConfig, LlmProvider};
