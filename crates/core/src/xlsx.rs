//! Spreadsheet backend: worksheet cells over the used range of each sheet.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::document::{CellHandle, CellNode, Container, Coordinate, Layout, Locator};
use crate::error::{FillError, Result};
use crate::format::FormatSnapshot;
use crate::package::OoxmlPackage;
use crate::tag::trailing_tag;
use crate::xml::{XmlDocument, XmlElement, XmlNode};

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";

/// One-based worksheet position of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SheetLocator {
    pub sheet: usize,
    pub row: u32,
    pub col: u32,
}

struct SheetPart {
    part: String,
    xml: XmlDocument,
}

pub(crate) struct SheetBackend {
    package: OoxmlPackage,
    sheets: Vec<SheetPart>,
}

struct RawCell {
    text: String,
    style: Option<u32>,
}

struct MergeRange {
    first: (u32, u32),
    last: (u32, u32),
}

impl MergeRange {
    fn contains(&self, row: u32, col: u32) -> bool {
        (self.first.0..=self.last.0).contains(&row) && (self.first.1..=self.last.1).contains(&col)
    }
}

pub(crate) fn load(package: OoxmlPackage) -> Result<(SheetBackend, Layout)> {
    let workbook = package.xml_part(WORKBOOK_PART)?;
    let targets = relationship_targets(&package)?;
    let shared = shared_strings(&package)?;

    let mut layout = Layout::default();
    let mut sheets = Vec::new();
    let entries: Vec<(String, String)> = workbook
        .root
        .child("sheets")
        .map(|list| {
            list.elements_named("sheet")
                .map(|sheet| {
                    (
                        sheet.attr("name").unwrap_or_default().to_string(),
                        sheet.attr("r:id").unwrap_or_default().to_string(),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    for (sheet_idx, (name, rel_id)) in entries.into_iter().enumerate() {
        let target = targets.get(&rel_id).ok_or_else(|| {
            FillError::InvalidDocument(format!("sheet {name} has no relationship {rel_id}"))
        })?;
        let part = resolve_target(target);
        let mut xml = package.xml_part(&part)?;
        let cells = read_cells(&mut xml.root, &shared);
        let merges = read_merges(&xml.root);

        let max_row = cells
            .keys()
            .map(|(row, _)| *row)
            .chain(merges.iter().map(|m| m.last.0))
            .max()
            .unwrap_or(0);
        let max_col = cells
            .keys()
            .map(|(_, col)| *col)
            .chain(merges.iter().map(|m| m.last.1))
            .max()
            .unwrap_or(0);

        let mut anchors: HashMap<(u32, u32), CellHandle> = HashMap::new();
        let mut rows = Vec::with_capacity(max_row as usize);
        for row in 1..=max_row {
            let mut line = Vec::with_capacity(max_col as usize);
            for col in 1..=max_col {
                let merged = merges.iter().find(|m| m.contains(row, col));
                if let Some(range) = merged {
                    if let Some(handle) = anchors.get(&range.first) {
                        line.push(Some(*handle));
                        continue;
                    }
                }
                let raw = cells.get(&(row, col));
                let handle = layout.push_cell(CellNode {
                    text: raw.map(|c| c.text.clone()).unwrap_or_default(),
                    format: FormatSnapshot::spreadsheet(raw.and_then(|c| c.style)),
                    anchor: Coordinate::new(sheet_idx, (row - 1) as usize, (col - 1) as usize),
                    locator: Locator::Sheet(SheetLocator {
                        sheet: sheet_idx,
                        row,
                        col,
                    }),
                    locked: None,
                    dirty: false,
                    shading: None,
                });
                if merged.is_some() {
                    anchors.insert((row, col), handle);
                }
                line.push(Some(handle));
            }
            rows.push(line);
        }
        debug!(sheet = %name, rows = max_row, cols = max_col, "loaded sheet");
        layout.containers.push(Container::new(name, rows));
        sheets.push(SheetPart { part, xml });
    }

    Ok((SheetBackend { package, sheets }, layout))
}

impl SheetBackend {
    pub(crate) fn write_cell(
        &mut self,
        locator: SheetLocator,
        text: &str,
        format: &FormatSnapshot,
    ) -> Result<()> {
        let reference = cell_reference(locator.row, locator.col);
        let sheet = self
            .sheets
            .get_mut(locator.sheet)
            .ok_or_else(|| FillError::CellWrite {
                coordinate: reference.clone(),
                reason: format!("sheet {} not present", locator.sheet),
            })?;
        let data = sheet
            .xml
            .root
            .child_mut("sheetData")
            .ok_or_else(|| FillError::CellWrite {
                coordinate: reference.clone(),
                reason: "worksheet has no sheetData".to_string(),
            })?;
        let row = child_by_ref(data, "row", &locator.row.to_string(), |el| {
            el.attr("r").and_then(|r| r.parse::<u32>().ok()).unwrap_or(0) > locator.row
        });
        let cell = child_by_ref(row, "c", &reference, |el| {
            el.attr("r")
                .and_then(parse_reference)
                .map(|(_, col)| col > locator.col)
                .unwrap_or(false)
        });
        write_value(cell, text, format.style_index);
        Ok(())
    }

    pub(crate) fn package(&mut self) -> &OoxmlPackage {
        for sheet in &self.sheets {
            self.package.set_xml_part(&sheet.part, &sheet.xml);
        }
        &self.package
    }
}

/// Finds the child named `name` whose `r` attribute equals `reference`,
/// inserting one before the first sibling for which `after` holds.
fn child_by_ref<'a>(
    parent: &'a mut XmlElement,
    name: &str,
    reference: &str,
    after: impl Fn(&XmlElement) -> bool,
) -> &'a mut XmlElement {
    let existing = parent.children.iter().position(|node| match node {
        XmlNode::Element(el) => el.name == name && el.attr("r") == Some(reference),
        XmlNode::Text(_) => false,
    });
    let idx = match existing {
        Some(idx) => idx,
        None => {
            let at = parent
                .children
                .iter()
                .position(|node| match node {
                    XmlNode::Element(el) => el.name == name && after(el),
                    XmlNode::Text(_) => false,
                })
                .unwrap_or(parent.children.len());
            parent.children.insert(
                at,
                XmlNode::Element(XmlElement::new(name).with_attr("r", reference)),
            );
            at
        }
    };
    match &mut parent.children[idx] {
        XmlNode::Element(el) => el,
        XmlNode::Text(_) => unreachable!("index points at an element"),
    }
}

fn write_value(cell: &mut XmlElement, text: &str, style: Option<u32>) {
    cell.children.clear();
    cell.remove_attr("t");
    if let Some(style) = style {
        cell.set_attr("s", style.to_string());
    }
    if text.is_empty() {
        return;
    }
    if let Some(formula) = text.strip_prefix('=') {
        if !formula.is_empty() && trailing_tag(text).is_none() {
            cell.push(XmlElement::new("f").with_text(formula));
            return;
        }
    }
    cell.set_attr("t", "inlineStr");
    cell.push(
        XmlElement::new("is").with_child(
            XmlElement::new("t")
                .with_attr("xml:space", "preserve")
                .with_text(text),
        ),
    );
}

fn relationship_targets(package: &OoxmlPackage) -> Result<HashMap<String, String>> {
    let Some(rels) = package.optional_xml_part(WORKBOOK_RELS_PART)? else {
        return Ok(HashMap::new());
    };
    Ok(rels
        .root
        .elements_named("Relationship")
        .filter_map(|rel| Some((rel.attr("Id")?.to_string(), rel.attr("Target")?.to_string())))
        .collect())
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{target}"),
    }
}

fn shared_strings(package: &OoxmlPackage) -> Result<Vec<String>> {
    let Some(table) = package.optional_xml_part(SHARED_STRINGS_PART)? else {
        return Ok(Vec::new());
    };
    Ok(table.root.elements_named("si").map(rich_text).collect())
}

/// Text of an `si` or `is` element: a plain `t` or the runs' `t` parts.
fn rich_text(element: &XmlElement) -> String {
    match element.child("t") {
        Some(t) => t.text(),
        None => element
            .elements_named("r")
            .filter_map(|r| r.child("t"))
            .map(XmlElement::text)
            .collect(),
    }
}

/// Reads cell values keyed by one-based (row, col). Rows and cells that
/// omit their `r` attribute get one assigned so later writes can find them.
fn read_cells(root: &mut XmlElement, shared: &[String]) -> BTreeMap<(u32, u32), RawCell> {
    let mut cells = BTreeMap::new();
    let Some(data) = root.child_mut("sheetData") else {
        return cells;
    };
    let mut next_row = 1u32;
    for row in data.elements_mut().filter(|el| el.name == "row") {
        let row_number = row
            .attr("r")
            .and_then(|r| r.parse::<u32>().ok())
            .unwrap_or(next_row);
        row.set_attr("r", row_number.to_string());
        next_row = row_number + 1;

        let mut next_col = 1u32;
        for cell in row.elements_mut().filter(|el| el.name == "c") {
            let (row_at, col) = cell
                .attr("r")
                .and_then(parse_reference)
                .unwrap_or((row_number, next_col));
            cell.set_attr("r", cell_reference(row_at, col));
            next_col = col + 1;
            let style = cell.attr("s").and_then(|s| s.parse().ok());
            cells.insert(
                (row_at, col),
                RawCell {
                    text: cell_value(cell, shared),
                    style,
                },
            );
        }
    }
    cells
}

fn cell_value(cell: &XmlElement, shared: &[String]) -> String {
    if let Some(formula) = cell.child("f").map(XmlElement::text) {
        if !formula.is_empty() {
            return format!("={formula}");
        }
    }
    let raw = cell.child("v").map(XmlElement::text).unwrap_or_default();
    match cell.attr("t") {
        Some("s") => raw
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|idx| shared.get(idx).cloned())
            .unwrap_or_default(),
        Some("inlineStr") => cell.child("is").map(rich_text).unwrap_or_default(),
        Some("b") => match raw.trim() {
            "1" => "TRUE".to_string(),
            "0" => "FALSE".to_string(),
            other => other.to_string(),
        },
        _ => raw,
    }
}

fn read_merges(root: &XmlElement) -> Vec<MergeRange> {
    root.child("mergeCells")
        .map(|merges| {
            merges
                .elements_named("mergeCell")
                .filter_map(|m| m.attr("ref"))
                .filter_map(|reference| {
                    let (first, last) = reference.split_once(':')?;
                    let first = parse_reference(first)?;
                    let last = parse_reference(last)?;
                    Some(MergeRange {
                        first: (first.0.min(last.0), first.1.min(last.1)),
                        last: (first.0.max(last.0), first.1.max(last.1)),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parses `B12` into one-based `(row, col)`.
pub fn parse_reference(reference: &str) -> Option<(u32, u32)> {
    let reference = reference.trim().trim_start_matches('$');
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    let letters = letters.trim_end_matches('$');
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let mut col = 0u32;
    for c in letters.chars() {
        col = col.checked_mul(26)? + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
    }
    let row = digits.parse::<u32>().ok()?;
    (row > 0).then_some((row, col))
}

pub fn column_letters(mut col: u32) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        col = (col - 1) / 26;
    }
    letters.iter().rev().collect()
}

pub fn cell_reference(row: u32, col: u32) -> String {
    format!("{}{row}", column_letters(col))
}
