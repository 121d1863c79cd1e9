use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use formfill_index::KnowledgeChunk;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Window length in characters (grapheme clusters).
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 300,
            overlap: 50,
        }
    }
}

/// Fixed-length sliding windows over each blank-line separated paragraph.
pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// Chunk ids are `<prefix>_<n>`, numbered across the whole text.
    pub fn chunk_text(&self, text: &str, prefix: &str) -> Vec<KnowledgeChunk> {
        let size = self.config.chunk_size.max(1);
        let step = size.saturating_sub(self.config.overlap).max(1);
        let normalized = text.replace("\r\n", "\n");
        let mut chunks = Vec::new();
        for paragraph in normalized.split("\n\n") {
            let graphemes: Vec<&str> = paragraph.trim().graphemes(true).collect();
            let mut start = 0usize;
            while start < graphemes.len() {
                let end = (start + size).min(graphemes.len());
                let content = graphemes[start..end].concat();
                let content = content.trim();
                if !content.is_empty() {
                    chunks.push(KnowledgeChunk::new(
                        format!("{prefix}_{}", chunks.len()),
                        content,
                    ));
                }
                if end == graphemes.len() {
                    break;
                }
                start += step;
            }
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_per_paragraph_with_overlap() {
        let chunker = Chunker::new(ChunkConfig {
            chunk_size: 4,
            overlap: 1,
        });
        let chunks = chunker.chunk_text("abcdefg\n\nxy", "kb");
        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["abcd", "defg", "xy"]);
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["kb_0", "kb_1", "kb_2"]);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let chunker = Chunker::new(ChunkConfig {
            chunk_size: 2,
            overlap: 0,
        });
        let chunks = chunker.chunk_text("姓名张三", "p");
        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["姓名", "张三"]);
    }

    #[test]
    fn blank_input_yields_nothing() {
        let chunker = Chunker::new(ChunkConfig::default());
        assert!(chunker.chunk_text("\n\n  \n\n", "p").is_empty());
    }
}
