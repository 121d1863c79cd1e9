//! Word-processor backend: table cells of `word/document.xml`.

use crate::document::{CellHandle, CellNode, Container, Coordinate, Layout, Locator};
use crate::error::{FillError, Result};
use crate::format::{FormatSnapshot, ParagraphFormat, RunStyle};
use crate::package::OoxmlPackage;
use crate::xml::{XmlDocument, XmlElement, XmlNode};

const DOCUMENT_PART: &str = "word/document.xml";

const PPR_ORDER: &[&str] = &[
    "w:pStyle",
    "w:keepNext",
    "w:keepLines",
    "w:pageBreakBefore",
    "w:framePr",
    "w:widowControl",
    "w:numPr",
    "w:suppressLineNumbers",
    "w:pBdr",
    "w:shd",
    "w:tabs",
    "w:suppressAutoHyphens",
    "w:kinsoku",
    "w:wordWrap",
    "w:overflowPunct",
    "w:topLinePunct",
    "w:autoSpaceDE",
    "w:autoSpaceDN",
    "w:bidi",
    "w:adjustRightInd",
    "w:snapToGrid",
    "w:spacing",
    "w:ind",
    "w:contextualSpacing",
    "w:mirrorIndents",
    "w:suppressOverlap",
    "w:jc",
    "w:textDirection",
    "w:textAlignment",
    "w:textboxTightWrap",
    "w:outlineLvl",
    "w:divId",
    "w:cnfStyle",
    "w:rPr",
    "w:sectPr",
    "w:pPrChange",
];

const RPR_ORDER: &[&str] = &[
    "w:rStyle",
    "w:rFonts",
    "w:b",
    "w:bCs",
    "w:i",
    "w:iCs",
    "w:caps",
    "w:smallCaps",
    "w:strike",
    "w:dstrike",
    "w:outline",
    "w:shadow",
    "w:emboss",
    "w:imprint",
    "w:noProof",
    "w:snapToGrid",
    "w:vanish",
    "w:webHidden",
    "w:color",
    "w:spacing",
    "w:w",
    "w:kern",
    "w:position",
    "w:sz",
    "w:szCs",
    "w:highlight",
    "w:u",
    "w:effect",
    "w:bdr",
    "w:shd",
    "w:fitText",
    "w:vertAlign",
    "w:rtl",
    "w:cs",
    "w:em",
    "w:lang",
    "w:eastAsianLayout",
    "w:specVanish",
    "w:oMath",
];

const TCPR_ORDER: &[&str] = &[
    "w:cnfStyle",
    "w:tcW",
    "w:gridSpan",
    "w:hMerge",
    "w:vMerge",
    "w:tcBorders",
    "w:shd",
    "w:noWrap",
    "w:tcMar",
    "w:textDirection",
    "w:tcFitText",
    "w:vAlign",
    "w:hideMark",
    "w:headers",
    "w:cellIns",
    "w:cellDel",
    "w:cellMerge",
    "w:tcPrChange",
];

/// Position of a `w:tc` as element indices under body, table and row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WordLocator {
    pub table: usize,
    pub row: usize,
    pub cell: usize,
}

pub(crate) struct WordBackend {
    package: OoxmlPackage,
    document: XmlDocument,
}

pub(crate) fn load(package: OoxmlPackage) -> Result<(WordBackend, Layout)> {
    let document = package.xml_part(DOCUMENT_PART)?;
    let body = document
        .root
        .child("w:body")
        .ok_or_else(|| FillError::InvalidDocument("document has no w:body".to_string()))?;

    let mut layout = Layout::default();
    for (table_idx, table) in body.elements_named("w:tbl").enumerate() {
        let mut rows: Vec<Vec<Option<CellHandle>>> = Vec::new();
        for (row_idx, tr) in table.elements_named("w:tr").enumerate() {
            let mut row: Vec<Option<CellHandle>> = Vec::new();
            let grid_before = tr
                .child("w:trPr")
                .and_then(|pr| pr.child("w:gridBefore"))
                .and_then(|el| el.attr("w:val"))
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0);
            row.extend(std::iter::repeat(None).take(grid_before));

            for (cell_idx, tc) in tr.elements_named("w:tc").enumerate() {
                let props = tc.child("w:tcPr");
                let span = props
                    .and_then(|pr| pr.child("w:gridSpan"))
                    .and_then(|el| el.attr("w:val"))
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(1)
                    .max(1);
                let continues_merge = props
                    .and_then(|pr| pr.child("w:vMerge"))
                    .map(|el| el.attr("w:val") != Some("restart"))
                    .unwrap_or(false);
                let grid_col = row.len();
                let above = if continues_merge {
                    rows.last()
                        .and_then(|prev| prev.get(grid_col).copied())
                        .flatten()
                } else {
                    None
                };
                let handle = match above {
                    Some(handle) => handle,
                    None => layout.push_cell(CellNode {
                        text: cell_text(tc),
                        format: snapshot(tc),
                        anchor: Coordinate::new(table_idx, row_idx, grid_col),
                        locator: Locator::Word(WordLocator {
                            table: table_idx,
                            row: row_idx,
                            cell: cell_idx,
                        }),
                        locked: tc
                            .has_descendant("w:tbl")
                            .then(|| "cell contains a nested table".to_string()),
                        dirty: false,
                        shading: None,
                    }),
                };
                row.extend(std::iter::repeat(Some(handle)).take(span));
            }
            rows.push(row);
        }
        layout.containers.push(Container::new(format!("Table {}", table_idx + 1), rows));
    }

    Ok((WordBackend { package, document }, layout))
}

impl WordBackend {
    pub(crate) fn write_cell(
        &mut self,
        locator: WordLocator,
        text: &str,
        format: &FormatSnapshot,
        shading: Option<&str>,
    ) -> Result<()> {
        let tc = self
            .document
            .root
            .child_mut("w:body")
            .and_then(|body| body.nth_named_mut("w:tbl", locator.table))
            .and_then(|table| table.nth_named_mut("w:tr", locator.row))
            .and_then(|tr| tr.nth_named_mut("w:tc", locator.cell))
            .ok_or_else(|| FillError::CellWrite {
                coordinate: format!(
                    "table {} row {} cell {}",
                    locator.table, locator.row, locator.cell
                ),
                reason: "cell no longer present".to_string(),
            })?;
        rewrite_cell(tc, text, format);
        if let Some(color) = shading {
            shade_cell(tc, color);
        }
        Ok(())
    }

    pub(crate) fn package(&mut self) -> &OoxmlPackage {
        self.package.set_xml_part(DOCUMENT_PART, &self.document);
        &self.package
    }
}

/// Cell text as Word shows it: direct paragraphs joined by newlines.
pub(crate) fn cell_text(tc: &XmlElement) -> String {
    tc.elements_named("w:p")
        .map(paragraph_text)
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn paragraph_text(paragraph: &XmlElement) -> String {
    let mut out = String::new();
    collect_run_text(paragraph, &mut out);
    out
}

fn collect_run_text(element: &XmlElement, out: &mut String) {
    for child in element.elements() {
        match child.name.as_str() {
            "w:t" => out.push_str(&child.text()),
            "w:tab" => out.push('\t'),
            "w:br" | "w:cr" => out.push('\n'),
            "w:pPr" | "w:rPr" | "w:del" | "w:delText" | "w:instrText" => {}
            _ => collect_run_text(child, out),
        }
    }
}

/// Body paragraphs and table rows as plain text blocks, for knowledge
/// ingestion.
pub(crate) fn text_blocks(package: &OoxmlPackage) -> Result<Vec<String>> {
    let document = package.xml_part(DOCUMENT_PART)?;
    let mut blocks = Vec::new();
    if let Some(body) = document.root.child("w:body") {
        for element in body.elements() {
            match element.name.as_str() {
                "w:p" => {
                    let text = paragraph_text(element);
                    if !text.trim().is_empty() {
                        blocks.push(text.trim().to_string());
                    }
                }
                "w:tbl" => {
                    for tr in element.elements_named("w:tr") {
                        let cells: Vec<String> = tr
                            .elements_named("w:tc")
                            .map(|tc| cell_text(tc).trim().to_string())
                            .filter(|text| !text.is_empty())
                            .collect();
                        if !cells.is_empty() {
                            blocks.push(cells.join(" | "));
                        }
                    }
                }
                _ => {}
            }
        }
    }

    let mut extra: Vec<&str> = package
        .part_names()
        .filter(|name| {
            name.starts_with("word/header") || name.starts_with("word/footer")
        })
        .filter(|name| name.ends_with(".xml"))
        .collect();
    extra.sort_unstable();
    for name in extra {
        let part = package.xml_part(name)?;
        let label = if name.starts_with("word/header") {
            "Header"
        } else {
            "Footer"
        };
        let mut lines = Vec::new();
        collect_paragraphs(&part.root, &mut lines);
        for line in lines {
            blocks.push(format!("[{label}] {line}"));
        }
    }
    Ok(blocks)
}

fn collect_paragraphs(element: &XmlElement, out: &mut Vec<String>) {
    for child in element.elements() {
        if child.name == "w:p" {
            let text = paragraph_text(child);
            if !text.trim().is_empty() {
                out.push(text.trim().to_string());
            }
        } else {
            collect_paragraphs(child, out);
        }
    }
}

fn snapshot(tc: &XmlElement) -> FormatSnapshot {
    let paragraphs = tc
        .elements_named("w:p")
        .map(|p| ParagraphFormat {
            alignment: p
                .child("w:pPr")
                .and_then(|pr| pr.child("w:jc"))
                .and_then(|jc| jc.attr("w:val"))
                .map(str::to_string),
            runs: p
                .elements_named("w:r")
                .map(|r| run_style(r.child("w:rPr")))
                .collect(),
        })
        .collect();
    FormatSnapshot {
        paragraphs,
        style_index: None,
    }
}

fn run_style(props: Option<&XmlElement>) -> RunStyle {
    let Some(props) = props else {
        return RunStyle::default();
    };
    RunStyle {
        bold: toggle(props.child("w:b")),
        italic: toggle(props.child("w:i")),
        underline: props
            .child("w:u")
            .map(|u| u.attr("w:val").unwrap_or("single").to_string()),
        font_name: props.child("w:rFonts").and_then(|fonts| {
            fonts
                .attr("w:ascii")
                .or_else(|| fonts.attr("w:hAnsi"))
                .or_else(|| fonts.attr("w:eastAsia"))
                .map(str::to_string)
        }),
        font_size: props
            .child("w:sz")
            .and_then(|sz| sz.attr("w:val"))
            .and_then(|v| v.parse().ok()),
        color: props
            .child("w:color")
            .and_then(|c| c.attr("w:val"))
            .map(str::to_string),
    }
}

fn toggle(element: Option<&XmlElement>) -> Option<bool> {
    element.map(|el| !matches!(el.attr("w:val"), Some("0" | "false" | "off")))
}

/// Collapses the cell into a single paragraph with a single run holding
/// `text`, styled from the snapshot over the cell's current properties.
fn rewrite_cell(tc: &mut XmlElement, text: &str, format: &FormatSnapshot) {
    let first = tc.child("w:p");
    let paragraph_attrs = first.map(|p| p.attrs.clone()).unwrap_or_default();
    let mut paragraph_props = first.and_then(|p| p.child("w:pPr")).cloned();
    let base_run_props = first
        .and_then(|p| p.child("w:r"))
        .and_then(|r| r.child("w:rPr"))
        .or_else(|| {
            first
                .and_then(|p| p.child("w:pPr"))
                .and_then(|pr| pr.child("w:rPr"))
        })
        .cloned();

    if let Some(paragraph) = format.paragraphs.first() {
        match paragraph.alignment.as_deref() {
            Some(alignment) => paragraph_props
                .get_or_insert_with(|| XmlElement::new("w:pPr"))
                .insert_ordered(
                    XmlElement::new("w:jc").with_attr("w:val", alignment),
                    PPR_ORDER,
                ),
            None => {
                if let Some(props) = paragraph_props.as_mut() {
                    props.remove_named("w:jc");
                }
            }
        }
    }

    let mut run = XmlElement::new("w:r");
    if let Some(props) = run_props(base_run_props, format.primary_run()) {
        if !props.children.is_empty() {
            run.push(props);
        }
    }
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            run.push(XmlElement::new("w:br"));
        }
        if !line.is_empty() {
            run.push(
                XmlElement::new("w:t")
                    .with_attr("xml:space", "preserve")
                    .with_text(line),
            );
        }
    }

    let mut paragraph = XmlElement::new("w:p");
    paragraph.attrs = paragraph_attrs;
    if let Some(props) = paragraph_props {
        paragraph.push(props);
    }
    paragraph.push(run);

    let position = tc
        .children
        .iter()
        .position(|node| matches!(node, XmlNode::Element(el) if el.name == "w:p"))
        .unwrap_or(tc.children.len());
    tc.remove_named("w:p");
    let position = position.min(tc.children.len());
    tc.children.insert(position, XmlNode::Element(paragraph));
}

fn run_props(base: Option<XmlElement>, style: Option<&RunStyle>) -> Option<XmlElement> {
    let Some(style) = style else {
        return base;
    };
    let mut props = base.unwrap_or_else(|| XmlElement::new("w:rPr"));
    set_toggle(&mut props, "w:b", style.bold);
    set_toggle(&mut props, "w:i", style.italic);
    match &style.underline {
        Some(kind) => props.insert_ordered(
            XmlElement::new("w:u").with_attr("w:val", kind.as_str()),
            RPR_ORDER,
        ),
        None => props.remove_named("w:u"),
    }
    if let Some(font) = &style.font_name {
        let fonts = props
            .child("w:rFonts")
            .cloned()
            .unwrap_or_else(|| XmlElement::new("w:rFonts"))
            .with_attr("w:ascii", font.as_str())
            .with_attr("w:hAnsi", font.as_str());
        props.insert_ordered(fonts, RPR_ORDER);
    }
    if let Some(size) = style.font_size {
        props.insert_ordered(
            XmlElement::new("w:sz").with_attr("w:val", size.to_string()),
            RPR_ORDER,
        );
    }
    if let Some(color) = &style.color {
        props.insert_ordered(
            XmlElement::new("w:color").with_attr("w:val", color.as_str()),
            RPR_ORDER,
        );
    }
    Some(props)
}

fn set_toggle(props: &mut XmlElement, name: &str, value: Option<bool>) {
    match value {
        Some(true) => props.insert_ordered(XmlElement::new(name), RPR_ORDER),
        Some(false) => {
            props.insert_ordered(XmlElement::new(name).with_attr("w:val", "0"), RPR_ORDER)
        }
        None => props.remove_named(name),
    }
}

fn shade_cell(tc: &mut XmlElement, color: &str) {
    let props = tc.ensure_child("w:tcPr", 0);
    props.insert_ordered(
        XmlElement::new("w:shd")
            .with_attr("w:val", "clear")
            .with_attr("w:color", "auto")
            .with_attr("w:fill", color),
        TCPR_ORDER,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str) -> XmlElement {
        XmlDocument::parse(xml).unwrap().root
    }

    #[test]
    fn cell_text_joins_paragraphs_and_honours_tabs() {
        let tc = parse(
            r#"<w:tc><w:p><w:r><w:t>Name</w:t><w:tab/><w:t>x</w:t></w:r></w:p><w:p><w:hyperlink><w:r><w:t>link</w:t></w:r></w:hyperlink></w:p></w:tc>"#,
        );
        assert_eq!(cell_text(&tc), "Name\tx\nlink");
    }

    #[test]
    fn rewrite_keeps_run_style_and_alignment() {
        let mut tc = parse(
            r#"<w:tc><w:tcPr><w:tcW w:w="100"/></w:tcPr><w:p><w:pPr><w:jc w:val="center"/></w:pPr><w:r><w:rPr><w:rFonts w:ascii="Arial"/><w:b/><w:sz w:val="24"/></w:rPr><w:t>Name</w:t></w:r></w:p><w:p><w:r><w:t>second</w:t></w:r></w:p></w:tc>"#,
        );
        let format = snapshot(&tc);
        assert_eq!(format.primary_alignment(), Some("center"));
        let style = format.primary_run().unwrap();
        assert_eq!(style.bold, Some(true));
        assert_eq!(style.font_name.as_deref(), Some("Arial"));
        assert_eq!(style.font_size, Some(24));

        rewrite_cell(&mut tc, "Name [1]", &format);
        assert_eq!(cell_text(&tc), "Name [1]");
        assert_eq!(tc.elements_named("w:p").count(), 1);
        let after = snapshot(&tc);
        assert_eq!(after.primary_alignment(), Some("center"));
        assert_eq!(after.primary_run(), format.primary_run());
        assert_eq!(tc.elements().next().map(|el| el.name.as_str()), Some("w:tcPr"));
    }

    #[test]
    fn rewrite_splits_lines_into_breaks() {
        let mut tc = parse(r#"<w:tc><w:p/></w:tc>"#);
        rewrite_cell(&mut tc, "line one\nline two", &FormatSnapshot::default());
        assert_eq!(cell_text(&tc), "line one\nline two");
    }

    #[test]
    fn shading_lands_before_vertical_alignment() {
        let mut tc = parse(r#"<w:tc><w:tcPr><w:tcW w:w="1"/><w:vAlign w:val="top"/></w:tcPr><w:p/></w:tc>"#);
        shade_cell(&mut tc, "FFFF00");
        let names: Vec<&str> = tc
            .child("w:tcPr")
            .unwrap()
            .elements()
            .map(|el| el.name.as_str())
            .collect();
        assert_eq!(names, vec!["w:tcW", "w:shd", "w:vAlign"]);
    }
}
