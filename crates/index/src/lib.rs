use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A unit of knowledge-base text. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct KnowledgeChunk {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl KnowledgeChunk {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            embedding: None,
        }
    }
}

/// A chunk copy annotated with its similarity to a query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    pub similarity_score: f32,
    pub rank: usize,
}

impl SearchResult {
    pub fn from_chunk(chunk: &KnowledgeChunk, similarity_score: f32, rank: usize) -> Self {
        Self {
            id: chunk.id.clone(),
            content: chunk.content.clone(),
            similarity_score,
            rank,
        }
    }
}

/// Ordered, append-only list of chunks backing the vector index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeStore {
    chunks: Vec<KnowledgeChunk>,
}

impl KnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_chunks(chunks: Vec<KnowledgeChunk>) -> Self {
        let mut store = Self::new();
        store.append(chunks);
        store
    }

    /// Appends chunks whose id is not yet present. Returns how many were kept.
    pub fn append(&mut self, chunks: Vec<KnowledgeChunk>) -> usize {
        let mut seen: HashSet<String> = self.chunks.iter().map(|c| c.id.clone()).collect();
        let mut added = 0usize;
        for mut chunk in chunks {
            if !seen.insert(chunk.id.clone()) {
                continue;
            }
            chunk.embedding = None;
            self.chunks.push(chunk);
            added += 1;
        }
        added
    }

    /// Ids in `chunks` that are already stored with different content.
    /// [`KnowledgeStore::append`] keeps the stored text for these.
    pub fn changed_ids<'a>(&self, chunks: &'a [KnowledgeChunk]) -> Vec<&'a str> {
        let stored: HashMap<&str, &str> = self
            .chunks
            .iter()
            .map(|c| (c.id.as_str(), c.content.as_str()))
            .collect();
        chunks
            .iter()
            .filter(|c| matches!(stored.get(c.id.as_str()), Some(content) if *content != c.content))
            .map(|c| c.id.as_str())
            .collect()
    }

    pub fn chunks(&self) -> &[KnowledgeChunk] {
        &self.chunks
    }

    pub fn get(&self, position: usize) -> Option<&KnowledgeChunk> {
        self.chunks.get(position)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// SHA-256 over ids and contents in store order.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for chunk in &self.chunks {
            hasher.update((chunk.id.len() as u64).to_be_bytes());
            hasher.update(chunk.id.as_bytes());
            hasher.update((chunk.content.len() as u64).to_be_bytes());
            hasher.update(chunk.content.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let body = serde_json::to_vec_pretty(&self.chunks)?;
        fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let chunks: Vec<KnowledgeChunk> = serde_json::from_slice(&raw)
            .with_context(|| format!("invalid chunk list {}", path.display()))?;
        Ok(Self { chunks })
    }
}

pub struct JsonlWriter<W> {
    writer: W,
}

impl<W: Write> JsonlWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_record<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let mut buf = serde_json::to_vec(record)?;
        buf.push(b'\n');
        self.writer.write_all(&buf)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_skips_duplicate_ids_and_strips_embeddings() {
        let mut store = KnowledgeStore::new();
        let mut first = KnowledgeChunk::new("a", "alpha");
        first.embedding = Some(vec![1.0, 0.0]);
        assert_eq!(store.append(vec![first, KnowledgeChunk::new("b", "beta")]), 2);
        assert_eq!(
            store.append(vec![
                KnowledgeChunk::new("b", "beta again"),
                KnowledgeChunk::new("c", "gamma"),
            ]),
            1
        );
        let ids: Vec<&str> = store.chunks().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(store.get(0).unwrap().embedding.is_none());
        assert_eq!(store.get(1).unwrap().content, "beta");
    }

    #[test]
    fn changed_ids_reports_known_ids_with_new_text() {
        let store = KnowledgeStore::from_chunks(vec![
            KnowledgeChunk::new("notes.txt_0", "Email: alice@example.com"),
            KnowledgeChunk::new("notes.txt_1", "Phone: 555-0100"),
        ]);
        let incoming = vec![
            KnowledgeChunk::new("notes.txt_0", "Email: alice@example.com"),
            KnowledgeChunk::new("notes.txt_1", "Phone: 555-0199"),
            KnowledgeChunk::new("cv.md_0", "Rust"),
        ];
        assert_eq!(store.changed_ids(&incoming), vec!["notes.txt_1"]);
    }

    #[test]
    fn fingerprint_tracks_order_and_content() {
        let a = KnowledgeStore::from_chunks(vec![
            KnowledgeChunk::new("1", "x"),
            KnowledgeChunk::new("2", "y"),
        ]);
        let b = KnowledgeStore::from_chunks(vec![
            KnowledgeChunk::new("2", "y"),
            KnowledgeChunk::new("1", "x"),
        ]);
        let c = KnowledgeStore::from_chunks(vec![
            KnowledgeChunk::new("1", "x"),
            KnowledgeChunk::new("2", "y"),
        ]);
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn store_roundtrips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/rag_chunks.json");
        let store = KnowledgeStore::from_chunks(vec![KnowledgeChunk::new("k_0", "姓名: 张三")]);
        store.save(&path).unwrap();
        let loaded = KnowledgeStore::load(&path).unwrap();
        assert_eq!(loaded.chunks(), store.chunks());
        assert_eq!(loaded.fingerprint(), store.fingerprint());
    }

    #[test]
    fn jsonl_writer_terminates_records() {
        let mut writer = JsonlWriter::new(Vec::new());
        writer
            .write_record(&KnowledgeChunk::new("doc_1", "Test"))
            .unwrap();
        let buf = writer.into_inner();
        assert!(buf.ends_with(b"\n"));
        let parsed: KnowledgeChunk = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed.id, "doc_1");
        assert!(parsed.embedding.is_none());
    }
}
