use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::document::FieldDocument;
use crate::error::{FillError, Result};
use crate::field::Field;
use crate::tag::{strip_tag, tag_text, trailing_tag};

/// Placeholder texts treated as blank in `empty` mode.
pub const DEFAULT_PLACEHOLDERS: &[&str] = &["To be filled", "Blank", "_____", "待填写", "空白"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    #[default]
    All,
    #[serde(alias = "empty_only")]
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub mode: IndexMode,
    pub working_dir: PathBuf,
    pub placeholders: Vec<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            mode: IndexMode::All,
            working_dir: PathBuf::from("work"),
            placeholders: DEFAULT_PLACEHOLDERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

pub struct IndexedDocument {
    pub fields: Vec<Field>,
    pub document: FieldDocument,
    pub tagged_path: PathBuf,
}

pub struct FieldIndexer {
    config: IndexerConfig,
}

impl FieldIndexer {
    pub fn new(config: IndexerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Tags every eligible untagged cell in traversal order and returns
    /// one field per distinct physical cell carrying a tag.
    ///
    /// Cells that already end in `[<n>]` keep their index; new indices
    /// continue after the largest one found. A repeated `[<n>]` on a later
    /// cell is replaced with a fresh index so every field stays unique.
    pub fn index_document(&self, doc: &mut FieldDocument) -> Vec<Field> {
        let surface: Vec<_> = doc.surface_cells().collect();
        let mut next_index = surface
            .iter()
            .filter_map(|(_, handle)| trailing_tag(doc.text(*handle)))
            .max()
            .unwrap_or(0)
            .checked_add(1);

        let mut seen = HashSet::new();
        let mut used = HashSet::new();
        let mut fields = Vec::new();
        let mut skipped = 0usize;
        for (coordinate, handle) in surface {
            if !seen.insert(handle) {
                continue;
            }
            let raw = doc.text(handle).trim().to_string();
            let format = doc.cell(handle).format.clone();
            let text = match trailing_tag(&raw) {
                Some(existing) if used.insert(existing) => {
                    fields.push(Field::new(existing, coordinate, strip_tag(&raw), format));
                    continue;
                }
                Some(existing) => {
                    warn!(index = existing, %coordinate, "duplicate tag; assigning a fresh index");
                    strip_tag(&raw)
                }
                None if self.config.mode == IndexMode::Empty && !self.is_blank(&raw) => continue,
                None => raw,
            };

            let Some(index) = next_index else {
                skipped += 1;
                warn!(%coordinate, "index space exhausted; cell left as is");
                continue;
            };
            next_index = index.checked_add(1);
            used.insert(index);
            match doc.set_text(handle, &tag_text(&text, index), Some(&format)) {
                Ok(()) => fields.push(Field::new(index, coordinate, text, format)),
                Err(err) => {
                    skipped += 1;
                    warn!(index, %coordinate, error = %err, "skipping cell, index consumed");
                }
            }
        }
        info!(
            fields = fields.len(),
            skipped,
            next_index = ?next_index,
            "indexed document"
        );
        fields
    }

    /// Opens `path`, tags it and saves the working copy as
    /// `<stem>_numbered.<ext>` under the working directory.
    pub fn index_file(&self, path: &Path) -> Result<IndexedDocument> {
        let mut document = FieldDocument::open(path)?;
        let fields = self.index_document(&mut document);
        let tagged_path = self.tagged_path(path)?;
        document.save(&tagged_path)?;
        info!(
            input = %path.display(),
            output = %tagged_path.display(),
            "saved tagged working copy"
        );
        Ok(IndexedDocument {
            fields,
            document,
            tagged_path,
        })
    }

    pub fn tagged_path(&self, path: &Path) -> Result<PathBuf> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| FillError::UnsupportedFormat(path.to_path_buf()))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        Ok(self
            .config
            .working_dir
            .join(format!("{stem}_numbered.{ext}")))
    }

    fn is_blank(&self, text: &str) -> bool {
        text.is_empty() || self.config.placeholders.iter().any(|p| p == text)
    }
}
