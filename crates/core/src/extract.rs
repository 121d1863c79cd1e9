use std::fs;
use std::path::Path;

use tracing::debug;

use crate::docx;
use crate::error::{FillError, Result};
use crate::package::OoxmlPackage;

/// Plain knowledge text from `.txt`, `.md`, `.docx` or `.pdf`.
///
/// Paragraph blocks are separated by blank lines so the chunker keeps
/// them apart.
pub fn extract_text(path: &Path) -> Result<String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let text = match ext.as_str() {
        "txt" | "md" | "markdown" => {
            let raw = fs::read(path)?;
            String::from_utf8_lossy(&raw).into_owned()
        }
        "docx" => {
            let package = OoxmlPackage::open(path)?;
            docx::text_blocks(&package)?.join("\n\n")
        }
        "pdf" => pdf_extract::extract_text(path).map_err(|e| {
            FillError::InvalidDocument(format!("pdf extraction failed for {}: {e}", path.display()))
        })?,
        _ => return Err(FillError::UnsupportedFormat(path.to_path_buf())),
    };
    debug!(path = %path.display(), chars = text.chars().count(), "extracted knowledge text");
    Ok(text)
}

pub fn is_knowledge_file(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("txt" | "md" | "markdown" | "docx" | "pdf")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn docx_paragraphs_and_table_rows_become_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.docx");
        let bytes = fixtures::docx_from_body(
            r#"<w:p><w:r><w:t>Employee profile</w:t></w:r></w:p><w:tbl><w:tr><w:tc><w:p><w:r><w:t>Name</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>Alice</w:t></w:r></w:p></w:tc></w:tr></w:tbl>"#,
        );
        fs::write(&path, bytes).unwrap();
        assert_eq!(extract_text(&path).unwrap(), "Employee profile\n\nName | Alice");
    }

    #[test]
    fn text_files_pass_through_and_others_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let txt = dir.path().join("notes.md");
        fs::write(&txt, "# Skills\n\nRust").unwrap();
        assert_eq!(extract_text(&txt).unwrap(), "# Skills\n\nRust");
        assert!(is_knowledge_file(&txt));

        let csv = dir.path().join("data.csv");
        fs::write(&csv, "a,b").unwrap();
        assert!(!is_knowledge_file(&csv));
        assert!(matches!(extract_text(&csv), Err(FillError::UnsupportedFormat(_))));
    }
}
