use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use formfill_core::{ExecutorConfig, IndexerConfig};
use formfill_llm::LlmConfig;
use formfill_rag::{
    EmbeddingConfig, EmbeddingProvider, IngestConfig, OrchestratorConfig, RetrievalConfig,
};

pub const DEFAULT_CONFIG_FILE: &str = "formfill.toml";
pub const DEFAULT_PATTERN: &str = "*.txt,*.md,*.markdown,*.docx,*.pdf";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FormfillConfig {
    /// When set, replaces the indexer and retrieval working directories.
    pub working_dir: Option<PathBuf>,
    pub pattern: String,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub indexer: IndexerConfig,
    pub executor: ExecutorConfig,
    pub orchestrator: OrchestratorConfig,
    pub ingest: IngestConfig,
}

impl Default for FormfillConfig {
    fn default() -> Self {
        Self {
            working_dir: None,
            pattern: DEFAULT_PATTERN.to_string(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            indexer: IndexerConfig::default(),
            executor: ExecutorConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

impl FormfillConfig {
    /// Reads `path`, or `formfill.toml` when present, then applies
    /// `FORMFILL_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        let mut config = config.apply_env(|key| env::var(key).ok())?;
        config.llm = config.llm.with_env_overrides()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        Ok(config.resolve_working_dir())
    }

    /// Overlays working/output directories and the embedding backend.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("FORMFILL_WORKING_DIR") {
            self.working_dir = Some(PathBuf::from(dir));
            self = self.resolve_working_dir();
        }
        if let Some(dir) = lookup("FORMFILL_OUTPUT_DIR") {
            self.executor.output_dir = PathBuf::from(dir);
        }
        if let Some(provider) = lookup("FORMFILL_EMBEDDING_PROVIDER") {
            self.embedding.provider = match provider.trim().to_lowercase().as_str() {
                "hash" => EmbeddingProvider::Hash,
                "openai" | "openai-compatible" => EmbeddingProvider::OpenAi,
                other => return Err(anyhow!("unknown FORMFILL_EMBEDDING_PROVIDER '{other}'")),
            };
        }
        if let Some(model) = lookup("FORMFILL_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        Ok(self)
    }

    fn resolve_working_dir(mut self) -> Self {
        if let Some(dir) = &self.working_dir {
            self.indexer.working_dir = dir.clone();
            self.retrieval.working_dir = dir.clone();
        }
        self
    }
}
