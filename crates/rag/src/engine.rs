use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use formfill_core::{l2_normalize, Field};
use formfill_index::{KnowledgeChunk, KnowledgeStore, SearchResult};

use crate::embedding::EmbeddingClient;
use crate::error::{RagError, Result};
use crate::keywords::query_for_field;
use crate::vector::VectorIndex;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub working_dir: PathBuf,
    pub index_file: String,
    pub chunks_file: String,
    pub default_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("work"),
            index_file: "rag_index.bin".to_string(),
            chunks_file: "rag_chunks.json".to_string(),
            default_top_k: 5,
        }
    }
}

impl RetrievalConfig {
    pub fn index_path(&self) -> PathBuf {
        self.working_dir.join(&self.index_file)
    }

    pub fn chunks_path(&self) -> PathBuf {
        self.working_dir.join(&self.chunks_file)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub status: String,
    pub document_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

#[derive(Default)]
struct EngineState {
    store: KnowledgeStore,
    index: VectorIndex,
}

/// Knowledge store plus vector index, rebuilt together on every `add`.
///
/// Swapping in a rebuilt index takes the write lock; searches share the
/// read lock. `writer` admits one `add` at a time.
pub struct RetrievalEngine {
    config: RetrievalConfig,
    embeddings: EmbeddingClient,
    state: RwLock<EngineState>,
    writer: Mutex<()>,
}

impl RetrievalEngine {
    pub fn new(config: RetrievalConfig, embeddings: EmbeddingClient) -> Self {
        Self {
            config,
            embeddings,
            state: RwLock::new(EngineState::default()),
            writer: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn model_name(&self) -> String {
        self.embeddings.model_name()
    }

    /// Appends chunks, re-embeds the whole store and persists both files.
    /// Returns the number of chunks actually added.
    ///
    /// Embedding runs on a snapshot, so searches keep the read lock while
    /// the new index is built. Concurrent adds are serialized.
    pub fn add(&self, chunks: Vec<KnowledgeChunk>) -> Result<usize> {
        if chunks.is_empty() {
            info!("no chunks to add; index unchanged");
            return Ok(0);
        }
        let _writer = self.writer.lock();
        self.load_for_update();

        let mut store = self.state.read().store.clone();
        let changed = store.changed_ids(&chunks);
        if !changed.is_empty() {
            warn!(
                count = changed.len(),
                ids = ?changed,
                "chunk ids already indexed with different text; keeping the stored text"
            );
        }
        let added = store.append(chunks);
        if added == 0 {
            info!("all chunks already indexed");
            return Ok(0);
        }
        let contents: Vec<String> = store.chunks().iter().map(|c| c.content.clone()).collect();
        let mut vectors = self.embeddings.embed_batch(&contents)?;
        if vectors.len() != store.len() {
            return Err(RagError::Embedding(format!(
                "embedded {} of {} chunks",
                vectors.len(),
                store.len()
            )));
        }
        for vector in vectors.iter_mut() {
            l2_normalize(vector);
        }
        let index = VectorIndex::from_vectors(&vectors)?;

        let mut state = self.state.write();
        state.store = store;
        state.index = index;
        let state = RwLockWriteGuard::downgrade(state);
        info!(
            added,
            total = state.store.len(),
            model = %self.embeddings.model_name(),
            "rebuilt vector index"
        );
        if let Err(err) = self.persist(&state) {
            warn!(error = %err, "index kept in memory only");
        }
        Ok(added)
    }

    /// Replaces the in-memory state with the persisted files.
    pub fn load(&self) -> Result<usize> {
        let (store, index) = self.read_persisted()?;
        let mut state = self.state.write();
        state.store = store;
        state.index = index;
        debug!(chunks = state.store.len(), "loaded persisted index");
        Ok(state.store.len())
    }

    /// Nearest chunks to `query`, best first. Fails with
    /// [`RagError::RetrievalUnavailable`] when no index exists.
    pub fn try_search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        self.ensure_loaded()?;
        let mut vector = self.embeddings.embed(query)?;
        l2_normalize(&mut vector);
        let state = self.state.read();
        let hits = state.index.search(&vector, top_k)?;
        Ok(hits
            .into_iter()
            .enumerate()
            .filter_map(|(rank, (position, score))| {
                state
                    .store
                    .get(position)
                    .map(|chunk| SearchResult::from_chunk(chunk, score, rank + 1))
            })
            .collect())
    }

    /// Like [`RetrievalEngine::try_search`] but returns no results on any failure.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<SearchResult> {
        match self.try_search(query, top_k) {
            Ok(results) => results,
            Err(RagError::RetrievalUnavailable(reason)) => {
                debug!(%reason, "retrieval unavailable");
                Vec::new()
            }
            Err(err) => {
                warn!(error = %err, "search failed");
                Vec::new()
            }
        }
    }

    /// Pools one query per field, keeps the best hit per chunk id and
    /// re-ranks the survivors from 1.
    pub fn semantic_search(&self, fields: &[Field], top_k: usize) -> Vec<SearchResult> {
        let mut pooled = Vec::new();
        for field in fields {
            let query = query_for_field(field);
            if query.is_empty() {
                continue;
            }
            debug!(field = field.index, %query, "semantic query");
            pooled.extend(self.search(&query, top_k));
        }
        merge_results(pooled, top_k)
    }

    pub fn stats(&self) -> IndexStats {
        if let Err(err) = self.ensure_loaded() {
            debug!(error = %err, "stats without index");
        }
        let state = self.state.read();
        if state.index.is_empty() {
            return IndexStats {
                status: "Not initialized".to_string(),
                document_count: 0,
                index_size: None,
                model_name: None,
            };
        }
        IndexStats {
            status: "Initialized".to_string(),
            document_count: state.store.len(),
            index_size: Some(state.index.len()),
            model_name: Some(self.embeddings.model_name()),
        }
    }

    fn ensure_loaded(&self) -> Result<()> {
        let loaded = !self.state.read().index.is_empty();
        if loaded {
            return Ok(());
        }
        let mut state = self.state.write();
        if !state.index.is_empty() {
            return Ok(());
        }
        if !self.persisted_files_exist() {
            return Err(RagError::RetrievalUnavailable(
                "no persisted index".to_string(),
            ));
        }
        let (store, index) = self
            .read_persisted()
            .map_err(|err| RagError::RetrievalUnavailable(err.to_string()))?;
        state.store = store;
        state.index = index;
        Ok(())
    }

    /// Picks up persisted state before the first add of a fresh engine.
    fn load_for_update(&self) {
        if !self.state.read().store.is_empty() || !self.persisted_files_exist() {
            return;
        }
        match self.read_persisted() {
            Ok((store, index)) => {
                let mut state = self.state.write();
                if state.store.is_empty() {
                    state.store = store;
                    state.index = index;
                }
            }
            Err(err) => warn!(error = %err, "ignoring unreadable persisted index"),
        }
    }

    fn persisted_files_exist(&self) -> bool {
        self.config.index_path().exists() && self.config.chunks_path().exists()
    }

    fn read_persisted(&self) -> Result<(KnowledgeStore, VectorIndex)> {
        let store = KnowledgeStore::load(&self.config.chunks_path())
            .map_err(|err| RagError::Persistence(format!("{err:#}")))?;
        let (index, fingerprint) = VectorIndex::load(&self.config.index_path())?;
        if fingerprint != store.fingerprint() {
            return Err(RagError::Persistence(
                "index was built from a different chunk list".to_string(),
            ));
        }
        if index.len() != store.len() {
            return Err(RagError::Persistence(format!(
                "index holds {} vectors for {} chunks",
                index.len(),
                store.len()
            )));
        }
        Ok((store, index))
    }

    fn persist(&self, state: &EngineState) -> Result<()> {
        let dir = &self.config.working_dir;
        fs::create_dir_all(dir)
            .map_err(|err| RagError::Persistence(format!("{}: {err}", dir.display())))?;
        let chunks_path = self.config.chunks_path();
        let index_path = self.config.index_path();
        let chunks_tmp = tmp_path(&chunks_path);
        let index_tmp = tmp_path(&index_path);
        state
            .store
            .save(&chunks_tmp)
            .map_err(|err| RagError::Persistence(format!("{err:#}")))?;
        state.index.save(&index_tmp, &state.store.fingerprint())?;
        rename(&chunks_tmp, &chunks_path)?;
        rename(&index_tmp, &index_path)?;
        Ok(())
    }
}

fn merge_results(mut pooled: Vec<SearchResult>, top_k: usize) -> Vec<SearchResult> {
    pooled.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
    let mut seen = HashSet::new();
    pooled.retain(|result| seen.insert(result.id.clone()));
    pooled.truncate(top_k);
    for (rank, result) in pooled.iter_mut().enumerate() {
        result.rank = rank + 1;
    }
    pooled
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to)
        .map_err(|err| RagError::Persistence(format!("{} -> {}: {err}", from.display(), to.display())))
}
