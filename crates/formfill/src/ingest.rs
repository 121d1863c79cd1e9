use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use glob::Pattern;
use tracing::{info, warn};
use walkdir::WalkDir;

use formfill_core::{is_knowledge_file, FillError};
use formfill_index::KnowledgeChunk;
use formfill_llm::LlmClient;
use formfill_rag::{
    ChunkingMode, EmbeddingClient, KnowledgeIngestor, LlmClassifier, RagError, RetrievalEngine,
    TextSplitter,
};

use crate::config::FormfillConfig;

pub fn run(config: &FormfillConfig, input: &Path, pattern: &str, semantic: bool) -> Result<()> {
    let mut ingest = config.ingest.clone();
    if semantic {
        ingest.mode = ChunkingMode::Semantic;
    }
    let splitter = match ingest.mode {
        ChunkingMode::Semantic => Some(LlmClassifier::new(
            LlmClient::new(config.llm.clone()).context("semantic chunking needs a model")?,
        )),
        ChunkingMode::Fixed => None,
    };
    let ingestor =
        KnowledgeIngestor::new(ingest, splitter.as_ref().map(|s| s as &dyn TextSplitter));
    let engine = RetrievalEngine::new(
        config.retrieval.clone(),
        EmbeddingClient::new(&config.embedding)?,
    );
    let added = run_with(
        input,
        pattern,
        |path| ingestor.chunk_file_under(input, path),
        |chunks| engine.add(chunks),
    )?;
    let stats = engine.stats();
    println!(
        "added {added} chunks; index holds {} chunks ({})",
        stats.document_count,
        stats.model_name.unwrap_or_else(|| "empty".to_string())
    );
    Ok(())
}

fn run_with<FChunk, FAdd>(input: &Path, pattern: &str, chunk_fn: FChunk, add_fn: FAdd) -> Result<usize>
where
    FChunk: Fn(&Path) -> formfill_rag::Result<Vec<KnowledgeChunk>>,
    FAdd: FnOnce(Vec<KnowledgeChunk>) -> formfill_rag::Result<usize>,
{
    if !input.exists() {
        return Err(anyhow!("input path {} does not exist", input.display()));
    }
    let files = if input.is_file() {
        vec![input.to_path_buf()]
    } else {
        discover_files(input, pattern)?
    };
    if files.is_empty() {
        warn!(pattern, root = %input.display(), "no knowledge files matched");
        return Ok(0);
    }
    info!(files = files.len(), root = %input.display(), "ingesting knowledge files");
    let mut chunks = Vec::new();
    for file in &files {
        match chunk_fn(file) {
            Ok(found) => chunks.extend(found),
            Err(RagError::Document(FillError::UnsupportedFormat(path))) => {
                warn!(path = %path.display(), "skipping unsupported format");
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to ingest {}", file.display()))
            }
        }
    }
    Ok(add_fn(chunks)?)
}

fn discover_files(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let patterns = build_patterns(pattern)?;
    let mut files = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() || !is_knowledge_file(entry.path()) {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or_else(|_| entry.path());
        let rel_norm = rel.to_string_lossy().replace('\\', "/").to_lowercase();
        if !patterns.is_empty() && !patterns.iter().any(|pat| pat.matches(&rel_norm)) {
            continue;
        }
        files.push(entry.path().to_path_buf());
    }
    files.sort();
    Ok(files)
}

fn build_patterns(pattern: &str) -> Result<Vec<Pattern>> {
    let mut patterns = Vec::new();
    for raw in pattern.split(',') {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let normalized = if trimmed.contains('/') {
            trimmed.to_lowercase()
        } else {
            format!("**/{}", trimmed.to_lowercase())
        };
        patterns.push(Pattern::new(&normalized).map_err(|e| anyhow!(e.msg))?);
    }
    Ok(patterns)
}
