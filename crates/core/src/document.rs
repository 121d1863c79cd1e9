use std::fmt;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::docx::{self, WordBackend, WordLocator};
use crate::error::{FillError, Result};
use crate::format::FormatSnapshot;
use crate::package::OoxmlPackage;
use crate::xlsx::{self, SheetBackend, SheetLocator};

/// Opaque identity of one physical cell. Every surface position covered
/// by a merged region resolves to the same handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellHandle(usize);

/// Zero-based `(container, row, column)`: table/row/grid column for
/// word-processor tables, sheet/row/column for spreadsheets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coordinate {
    pub container: usize,
    pub row: usize,
    pub col: usize,
}

impl Coordinate {
    pub fn new(container: usize, row: usize, col: usize) -> Self {
        Self {
            container,
            row,
            col,
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.container, self.row, self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    WordProcessor,
    Spreadsheet,
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("docx") => Ok(Self::WordProcessor),
            Some("xlsx" | "xlsm") => Ok(Self::Spreadsheet),
            _ => Err(FillError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// A table or sheet as a grid of surface positions.
#[derive(Debug, Clone)]
pub struct Container {
    pub name: String,
    rows: Vec<Vec<Option<CellHandle>>>,
}

impl Container {
    pub(crate) fn new(name: impl Into<String>, rows: Vec<Vec<Option<CellHandle>>>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    pub fn rows(&self) -> &[Vec<Option<CellHandle>>] {
        &self.rows
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Locator {
    Word(WordLocator),
    Sheet(SheetLocator),
}

#[derive(Debug, Clone)]
pub struct CellNode {
    pub text: String,
    pub format: FormatSnapshot,
    /// Top-left surface coordinate of the cell.
    pub anchor: Coordinate,
    pub(crate) locator: Locator,
    /// Reason the cell cannot be written, if any.
    pub(crate) locked: Option<String>,
    pub(crate) dirty: bool,
    pub(crate) shading: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct Layout {
    pub containers: Vec<Container>,
    pub cells: Vec<CellNode>,
}

impl Layout {
    pub(crate) fn push_cell(&mut self, cell: CellNode) -> CellHandle {
        self.cells.push(cell);
        CellHandle(self.cells.len() - 1)
    }
}

enum Backend {
    Word(WordBackend),
    Sheet(SheetBackend),
}

/// A table-bearing document as an arena of cells plus per-container grids.
///
/// Cell writes only touch the arena; `save` flushes dirty cells into the
/// package and writes it out.
pub struct FieldDocument {
    kind: DocumentKind,
    source: PathBuf,
    backend: Backend,
    containers: Vec<Container>,
    cells: Vec<CellNode>,
}

impl FieldDocument {
    pub fn open(path: &Path) -> Result<Self> {
        let kind = DocumentKind::from_path(path)?;
        let package = OoxmlPackage::open(path)?;
        Self::from_package(kind, package, path.to_path_buf())
    }

    pub fn from_bytes(kind: DocumentKind, bytes: &[u8], source: impl Into<PathBuf>) -> Result<Self> {
        let package = OoxmlPackage::from_bytes(bytes)?;
        Self::from_package(kind, package, source.into())
    }

    fn from_package(kind: DocumentKind, package: OoxmlPackage, source: PathBuf) -> Result<Self> {
        let (backend, layout) = match kind {
            DocumentKind::WordProcessor => {
                let (backend, layout) = docx::load(package)?;
                (Backend::Word(backend), layout)
            }
            DocumentKind::Spreadsheet => {
                let (backend, layout) = xlsx::load(package)?;
                (Backend::Sheet(backend), layout)
            }
        };
        debug!(
            path = %source.display(),
            containers = layout.containers.len(),
            cells = layout.cells.len(),
            "loaded document"
        );
        Ok(Self {
            kind,
            source,
            backend,
            containers: layout.containers,
            cells: layout.cells,
        })
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn containers(&self) -> &[Container] {
        &self.containers
    }

    pub fn cell(&self, handle: CellHandle) -> &CellNode {
        &self.cells[handle.0]
    }

    pub fn text(&self, handle: CellHandle) -> &str {
        &self.cells[handle.0].text
    }

    pub fn handle_at(&self, coordinate: Coordinate) -> Option<CellHandle> {
        self.containers
            .get(coordinate.container)?
            .rows
            .get(coordinate.row)?
            .get(coordinate.col)
            .copied()
            .flatten()
    }

    pub fn canonical_coordinate(&self, handle: CellHandle) -> Coordinate {
        self.cells[handle.0].anchor
    }

    /// Every surface position in traversal order: container, then row,
    /// then column. Merged regions repeat their handle.
    pub fn surface_cells(&self) -> impl Iterator<Item = (Coordinate, CellHandle)> + '_ {
        self.containers
            .iter()
            .enumerate()
            .flat_map(|(c, container)| {
                container.rows.iter().enumerate().flat_map(move |(r, row)| {
                    row.iter()
                        .enumerate()
                        .filter_map(move |(col, slot)| slot.map(|h| (Coordinate::new(c, r, col), h)))
                })
            })
    }

    /// Replaces the cell text, reapplying `format` when given and the
    /// cell's own snapshot otherwise.
    pub fn set_text(
        &mut self,
        handle: CellHandle,
        text: &str,
        format: Option<&FormatSnapshot>,
    ) -> Result<()> {
        let cell = &mut self.cells[handle.0];
        if let Some(reason) = &cell.locked {
            return Err(FillError::CellWrite {
                coordinate: cell.anchor.to_string(),
                reason: reason.clone(),
            });
        }
        cell.text = text.to_string();
        if let Some(format) = format {
            cell.format = format.clone();
        }
        cell.dirty = true;
        Ok(())
    }

    pub fn highlight(&mut self, handle: CellHandle, color: &str) -> Result<()> {
        let cell = &mut self.cells[handle.0];
        if matches!(cell.locator, Locator::Sheet(_)) {
            return Err(FillError::CellWrite {
                coordinate: cell.anchor.to_string(),
                reason: "highlighting is only supported for word-processor cells".to_string(),
            });
        }
        cell.shading = Some(color.to_string());
        cell.dirty = true;
        Ok(())
    }

    /// Plain-text rendering: one line per row, cells joined by ` | `,
    /// sheets headed by `=== Sheet: <name> ===`.
    pub fn render_text(&self) -> String {
        let mut lines = Vec::new();
        for container in &self.containers {
            if self.kind == DocumentKind::Spreadsheet {
                lines.push(format!("=== Sheet: {} ===", container.name));
            }
            for row in &container.rows {
                lines.push(
                    row.iter()
                        .map(|slot| slot.map(|h| self.cells[h.0].text.trim()).unwrap_or(""))
                        .join(" | "),
                );
            }
        }
        lines.join("\n")
    }

    pub fn save(&mut self, path: &Path) -> Result<()> {
        let mut written = 0usize;
        for cell in self.cells.iter_mut().filter(|cell| cell.dirty) {
            match (&mut self.backend, cell.locator) {
                (Backend::Word(backend), Locator::Word(locator)) => {
                    backend.write_cell(locator, &cell.text, &cell.format, cell.shading.as_deref())?
                }
                (Backend::Sheet(backend), Locator::Sheet(locator)) => {
                    backend.write_cell(locator, &cell.text, &cell.format)?
                }
                _ => {
                    return Err(FillError::InvalidDocument(
                        "cell locator does not match document kind".to_string(),
                    ))
                }
            }
            cell.dirty = false;
            written += 1;
        }
        let package = match &mut self.backend {
            Backend::Word(backend) => backend.package(),
            Backend::Sheet(backend) => backend.package(),
        };
        package.save(path)?;
        debug!(path = %path.display(), cells = written, "saved document");
        Ok(())
    }
}
