use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use formfill_core::{extract_text, ChunkConfig, Chunker};
use formfill_index::KnowledgeChunk;

use crate::classifier::TextSplitter;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingMode {
    #[default]
    Fixed,
    Semantic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub mode: ChunkingMode,
    pub chunk: ChunkConfig,
    /// Upper bound passed to the model when splitting semantically.
    pub semantic_max_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            mode: ChunkingMode::Fixed,
            chunk: ChunkConfig::default(),
            semantic_max_chars: 300,
        }
    }
}

/// Turns knowledge files into chunks ready for the retrieval engine.
pub struct KnowledgeIngestor<'a> {
    config: IngestConfig,
    chunker: Chunker,
    splitter: Option<&'a dyn TextSplitter>,
}

impl<'a> KnowledgeIngestor<'a> {
    pub fn new(config: IngestConfig, splitter: Option<&'a dyn TextSplitter>) -> Self {
        Self {
            chunker: Chunker::new(config.chunk),
            config,
            splitter,
        }
    }

    /// Chunk ids are prefixed with the file name, so re-ingesting a file
    /// adds nothing new.
    pub fn chunk_file(&self, path: &Path) -> Result<Vec<KnowledgeChunk>> {
        let prefix = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "knowledge".to_string());
        self.chunk_file_as(path, &prefix)
    }

    /// Like [`KnowledgeIngestor::chunk_file`], with ids prefixed by the path
    /// relative to `root` (`a/notes.txt_0`), so same-named files in
    /// different directories stay distinct.
    pub fn chunk_file_under(&self, root: &Path, path: &Path) -> Result<Vec<KnowledgeChunk>> {
        match path.strip_prefix(root) {
            Ok(rel) if !rel.as_os_str().is_empty() => {
                let prefix = rel.to_string_lossy().replace('\\', "/");
                self.chunk_file_as(path, &prefix)
            }
            _ => self.chunk_file(path),
        }
    }

    fn chunk_file_as(&self, path: &Path, prefix: &str) -> Result<Vec<KnowledgeChunk>> {
        let text = extract_text(path)?;
        let chunks = self.chunk_text(&text, prefix);
        info!(path = %path.display(), prefix, chunks = chunks.len(), "chunked knowledge file");
        Ok(chunks)
    }

    pub fn chunk_text(&self, text: &str, prefix: &str) -> Vec<KnowledgeChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        if self.config.mode == ChunkingMode::Semantic {
            match self.splitter {
                Some(splitter) => match splitter.split(text, self.config.semantic_max_chars) {
                    Ok(parts) if !parts.is_empty() => {
                        return parts
                            .into_iter()
                            .enumerate()
                            .map(|(j, part)| KnowledgeChunk::new(format!("{prefix}_{j}"), part))
                            .collect();
                    }
                    Ok(_) => warn!(prefix, "semantic split returned nothing; using fixed windows"),
                    Err(err) => {
                        warn!(prefix, error = %err, "semantic split failed; using fixed windows")
                    }
                },
                None => warn!("semantic chunking requested without a model; using fixed windows"),
            }
        }
        self.chunker.chunk_text(text, prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;
    use tempfile::tempdir;

    struct FixedSplit(Option<Vec<String>>);

    impl TextSplitter for FixedSplit {
        fn split(&self, _text: &str, _max_chars: usize) -> Result<Vec<String>> {
            self.0
                .clone()
                .ok_or_else(|| RagError::ClassificationParse("not json".into()))
        }
    }

    fn semantic() -> IngestConfig {
        IngestConfig {
            mode: ChunkingMode::Semantic,
            chunk: ChunkConfig {
                chunk_size: 5,
                overlap: 0,
            },
            ..IngestConfig::default()
        }
    }

    #[test]
    fn semantic_chunks_are_numbered_by_file() {
        let splitter = FixedSplit(Some(vec!["姓名: 张三".into(), "部门: 研发".into()]));
        let ingestor = KnowledgeIngestor::new(semantic(), Some(&splitter));
        let chunks = ingestor.chunk_text("姓名: 张三\n部门: 研发", "hr.docx");
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["hr.docx_0", "hr.docx_1"]);
    }

    #[test]
    fn failed_or_empty_split_falls_back_to_windows() {
        for splitter in [FixedSplit(None), FixedSplit(Some(Vec::new()))] {
            let ingestor = KnowledgeIngestor::new(semantic(), Some(&splitter));
            let chunks = ingestor.chunk_text("abcdefghij", "kb");
            let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
            assert_eq!(contents, vec!["abcde", "fghij"]);
        }
        let ingestor = KnowledgeIngestor::new(semantic(), None);
        assert_eq!(ingestor.chunk_text("abc", "kb").len(), 1);
    }

    #[test]
    fn files_are_prefixed_with_their_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "Email: alice@example.com\n\nPhone: 555-0100").unwrap();
        let ingestor = KnowledgeIngestor::new(IngestConfig::default(), None);
        let chunks = ingestor.chunk_file(&path).unwrap();
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["notes.md_0", "notes.md_1"]);
        assert!(ingestor.chunk_file(&dir.path().join("x.csv")).is_err());
    }

    #[test]
    fn same_named_files_under_a_root_get_distinct_ids() {
        let dir = tempdir().unwrap();
        for (sub, text) in [("a", "Email: alice@example.com"), ("b", "Phone: 555-0100")] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
            std::fs::write(dir.path().join(sub).join("notes.txt"), text).unwrap();
        }
        let ingestor = KnowledgeIngestor::new(IngestConfig::default(), None);
        let a = ingestor
            .chunk_file_under(dir.path(), &dir.path().join("a/notes.txt"))
            .unwrap();
        let b = ingestor
            .chunk_file_under(dir.path(), &dir.path().join("b/notes.txt"))
            .unwrap();
        assert_eq!(a[0].id, "a/notes.txt_0");
        assert_eq!(b[0].id, "b/notes.txt_0");

        let single = dir.path().join("a/notes.txt");
        let alone = ingestor.chunk_file_under(&single, &single).unwrap();
        assert_eq!(alone[0].id, "notes.txt_0");
    }
}
