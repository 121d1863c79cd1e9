use serde::{Deserialize, Serialize};

/// Run-level character style captured from a word-processor cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    /// Underline kind such as `single` or `double`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_name: Option<String>,
    /// Size in half-points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u32>,
    /// Hex RGB, e.g. `FF0000`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParagraphFormat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<String>,
    #[serde(default)]
    pub runs: Vec<RunStyle>,
}

/// Formatting captured before a cell is mutated and reapplied on every
/// later write to that cell.
///
/// Word-processor cells fill `paragraphs`; spreadsheet cells carry the
/// cell style index only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatSnapshot {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paragraphs: Vec<ParagraphFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_index: Option<u32>,
}

impl FormatSnapshot {
    pub fn spreadsheet(style_index: Option<u32>) -> Self {
        Self {
            paragraphs: Vec::new(),
            style_index,
        }
    }

    pub fn primary_alignment(&self) -> Option<&str> {
        self.paragraphs
            .first()
            .and_then(|p| p.alignment.as_deref())
    }

    /// Style of the first run of the first paragraph; writes collapse the
    /// cell into one run carrying this style.
    pub fn primary_run(&self) -> Option<&RunStyle> {
        self.paragraphs.first().and_then(|p| p.runs.first())
    }

    pub fn is_empty(&self) -> bool {
        self.paragraphs.is_empty() && self.style_index.is_none()
    }
}
