use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::document::{CellHandle, Coordinate, FieldDocument};
use crate::error::{FillError, Result};
use crate::format::FormatSnapshot;
use crate::tag::trailing_tag;

/// File-name markers added by intermediate pipeline stages.
pub const PIPELINE_SUFFIXES: &[&str] = &["_numbered", "_highlighted", "_restored", "_tagged"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub output_dir: PathBuf,
    /// Shading colour for filled word-processor cells, e.g. `FFFF00`.
    pub highlight: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            highlight: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEntry {
    pub index: u32,
    pub coordinate: Coordinate,
    pub content: String,
    pub format: FormatSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreEntry {
    pub index: u32,
    pub coordinate: Coordinate,
    pub text: String,
    pub format: FormatSnapshot,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyOutcome {
    pub output_path: PathBuf,
    pub restored: Vec<u32>,
    pub filled: Vec<u32>,
    pub skipped: Vec<u32>,
}

pub struct FillExecutor {
    config: ExecutorConfig,
}

impl FillExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Writes restores, then fills, then saves under the output directory
    /// using the input name with pipeline suffixes removed.
    pub fn apply(
        &self,
        doc: &mut FieldDocument,
        fills: &[FillEntry],
        restores: &[RestoreEntry],
    ) -> Result<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();

        for entry in restores {
            let Some(handle) = locate_tagged(doc, entry.index, entry.coordinate) else {
                warn!(index = entry.index, "no cell carries this tag, restore skipped");
                outcome.skipped.push(entry.index);
                continue;
            };
            match doc.set_text(handle, &entry.text, Some(&entry.format)) {
                Ok(()) => outcome.restored.push(entry.index),
                Err(err) => {
                    warn!(index = entry.index, error = %err, "restore failed");
                    outcome.skipped.push(entry.index);
                }
            }
        }

        for entry in fills {
            match self.fill_one(doc, entry) {
                Ok(()) => outcome.filled.push(entry.index),
                Err(err) => {
                    warn!(index = entry.index, error = %err, "fill skipped");
                    outcome.skipped.push(entry.index);
                }
            }
        }

        let output_path = self.output_path(doc.source())?;
        doc.save(&output_path)?;
        info!(
            output = %output_path.display(),
            restored = outcome.restored.len(),
            filled = outcome.filled.len(),
            skipped = outcome.skipped.len(),
            "wrote filled document"
        );
        outcome.output_path = output_path;
        Ok(outcome)
    }

    fn fill_one(&self, doc: &mut FieldDocument, entry: &FillEntry) -> Result<()> {
        let handle = doc
            .handle_at(entry.coordinate)
            .ok_or_else(|| FillError::CellWrite {
                coordinate: entry.coordinate.to_string(),
                reason: "coordinate outside the document".to_string(),
            })?;
        let canonical = doc.canonical_coordinate(handle);
        if canonical != entry.coordinate {
            return Err(FillError::CellWrite {
                coordinate: entry.coordinate.to_string(),
                reason: format!("inside a merged region anchored at {canonical}"),
            });
        }
        doc.set_text(handle, &entry.content, Some(&entry.format))?;
        if let Some(color) = &self.config.highlight {
            if let Err(err) = doc.highlight(handle, color) {
                debug!(index = entry.index, error = %err, "highlight not applied");
            }
        }
        Ok(())
    }

    pub fn output_path(&self, source: &Path) -> Result<PathBuf> {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FillError::UnsupportedFormat(source.to_path_buf()))?;
        Ok(self.config.output_dir.join(output_file_name(name)))
    }
}

/// Finds the cell tagged `index`: the cell at `coordinate` when its tag
/// matches, else the first cell in traversal order ending in that tag.
fn locate_tagged(doc: &FieldDocument, index: u32, coordinate: Coordinate) -> Option<CellHandle> {
    if let Some(handle) = doc.handle_at(coordinate) {
        if trailing_tag(doc.text(handle)) == Some(index) {
            return Some(handle);
        }
    }
    let mut seen = HashSet::new();
    doc.surface_cells()
        .map(|(_, handle)| handle)
        .filter(|handle| seen.insert(*handle))
        .find(|handle| trailing_tag(doc.text(*handle)) == Some(index))
}

/// `report_numbered.docx` becomes `report.docx`.
pub fn output_file_name(name: &str) -> String {
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => (&name[..dot], &name[dot..]),
        _ => (name, ""),
    };
    let cut = PIPELINE_SUFFIXES
        .iter()
        .filter_map(|suffix| stem.find(suffix))
        .min()
        .unwrap_or(stem.len());
    format!("{}{}", &stem[..cut], ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentKind;
    use crate::fixtures;
    use crate::indexer::{FieldIndexer, IndexerConfig};

    #[test]
    fn output_names_drop_pipeline_suffixes() {
        assert_eq!(output_file_name("form_numbered.docx"), "form.docx");
        assert_eq!(output_file_name("form_numbered_restored.xlsx"), "form.xlsx");
        assert_eq!(output_file_name("form.docx"), "form.docx");
        assert_eq!(output_file_name("my_form_tagged.docx"), "my_form.docx");
    }

    #[test]
    fn restores_and_fills_at_original_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = fixtures::docx_with_tables(&[vec![vec!["Name", ""], vec!["Age", ""]]]);
        let mut doc = FieldDocument::from_bytes(
            DocumentKind::WordProcessor,
            &bytes,
            dir.path().join("form_numbered.docx"),
        )
        .unwrap();
        let fields = FieldIndexer::new(IndexerConfig::default()).index_document(&mut doc);

        let restores: Vec<RestoreEntry> = fields
            .iter()
            .filter(|f| f.index % 2 == 1)
            .map(|f| RestoreEntry {
                index: f.index,
                coordinate: f.coordinate,
                text: f.original_text.clone(),
                format: f.format.clone(),
            })
            .collect();
        let fills = vec![FillEntry {
            index: 2,
            coordinate: fields[1].coordinate,
            content: "Alice".into(),
            format: fields[1].format.clone(),
        }];
        let executor = FillExecutor::new(ExecutorConfig {
            output_dir: dir.path().join("out"),
            highlight: Some("FFFF00".into()),
        });
        let outcome = executor.apply(&mut doc, &fills, &restores).unwrap();
        assert_eq!(outcome.output_path, dir.path().join("out/form.docx"));
        assert_eq!(outcome.restored, vec![1, 3]);
        assert_eq!(outcome.filled, vec![2]);

        let written = FieldDocument::open(&outcome.output_path).unwrap();
        assert_eq!(written.render_text(), "Name | Alice\nAge | [4]");
    }

    #[test]
    fn restore_falls_back_to_tag_scan() {
        let bytes = fixtures::docx_with_tables(&[vec![vec!["Name [1]", "[2]"]]]);
        let dir = tempfile::tempdir().unwrap();
        let mut doc = FieldDocument::from_bytes(
            DocumentKind::WordProcessor,
            &bytes,
            dir.path().join("form.docx"),
        )
        .unwrap();
        let restore = RestoreEntry {
            index: 2,
            coordinate: Coordinate::new(3, 0, 0),
            text: String::new(),
            format: FormatSnapshot::default(),
        };
        let executor = FillExecutor::new(ExecutorConfig {
            output_dir: dir.path().join("out"),
            highlight: None,
        });
        let outcome = executor.apply(&mut doc, &[], &[restore]).unwrap();
        assert_eq!(outcome.restored, vec![2]);
        assert_eq!(doc.render_text(), "Name [1] | ");
    }

    #[test]
    fn fills_inside_merged_regions_are_skipped() {
        let bytes = fixtures::docx_from_body(
            r#"<w:tbl><w:tr><w:tc><w:tcPr><w:gridSpan w:val="2"/></w:tcPr><w:p/></w:tc></w:tr></w:tbl>"#,
        );
        let dir = tempfile::tempdir().unwrap();
        let mut doc = FieldDocument::from_bytes(
            DocumentKind::WordProcessor,
            &bytes,
            dir.path().join("merged.docx"),
        )
        .unwrap();
        let fill = |col| FillEntry {
            index: 1,
            coordinate: Coordinate::new(0, 0, col),
            content: "x".into(),
            format: FormatSnapshot::default(),
        };
        let executor = FillExecutor::new(ExecutorConfig {
            output_dir: dir.path().join("out"),
            highlight: None,
        });
        let outcome = executor
            .apply(&mut doc, &[fill(1), fill(5)], &[])
            .unwrap();
        assert!(outcome.filled.is_empty());
        assert_eq!(outcome.skipped, vec![1, 1]);
    }
}
