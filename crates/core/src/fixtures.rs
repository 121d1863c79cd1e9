//! Minimal `.docx` / `.xlsx` packages for tests.

use quick_xml::escape::escape;

use crate::package::OoxmlPackage;
use crate::xlsx::cell_reference;

const WORD_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const SHEET_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// One body table per entry, plain text in every cell.
pub fn docx_with_tables(tables: &[Vec<Vec<&str>>]) -> Vec<u8> {
    let mut body = String::new();
    for table in tables {
        body.push_str("<w:tbl>");
        for row in table {
            body.push_str("<w:tr>");
            for text in row {
                body.push_str("<w:tc><w:p>");
                if !text.is_empty() {
                    body.push_str(&format!(
                        "<w:r><w:t xml:space=\"preserve\">{}</w:t></w:r>",
                        escape(*text)
                    ));
                }
                body.push_str("</w:p></w:tc>");
            }
            body.push_str("</w:tr>");
        }
        body.push_str("</w:tbl>");
    }
    docx_from_body(&body)
}

/// Wraps raw `w:body` content in a complete package.
pub fn docx_from_body(body: &str) -> Vec<u8> {
    let mut package = OoxmlPackage::default();
    package.set_part(
        "[Content_Types].xml",
        br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#
            .to_vec(),
    );
    package.set_part(
        "_rels/.rels",
        br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#
            .to_vec(),
    );
    package.set_part(
        "word/document.xml",
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?><w:document xmlns:w=\"{WORD_NS}\"><w:body>{body}<w:sectPr/></w:body></w:document>"
        )
        .into_bytes(),
    );
    package
        .to_bytes()
        .expect("in-memory package always serializes")
}

/// Workbook with one sheet per entry. Empty strings leave the cell out,
/// numeric text is stored as a number and anything else as a shared
/// string. `merges` pairs a sheet position with a range such as `A1:B1`.
pub fn xlsx_with_sheets(sheets: &[(&str, Vec<Vec<&str>>)], merges: &[(usize, &str)]) -> Vec<u8> {
    let mut shared: Vec<String> = Vec::new();
    let mut package = OoxmlPackage::default();

    let mut content_types = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/>"#,
    );
    let mut sheet_list = String::new();
    let mut rels = String::new();
    let mut sheet_parts = Vec::new();

    for (idx, (name, rows)) in sheets.iter().enumerate() {
        let n = idx + 1;
        content_types.push_str(&format!(
            "<Override PartName=\"/xl/worksheets/sheet{n}.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/>"
        ));
        sheet_list.push_str(&format!(
            "<sheet name=\"{}\" sheetId=\"{n}\" r:id=\"rId{n}\"/>",
            escape(*name)
        ));
        rels.push_str(&format!(
            "<Relationship Id=\"rId{n}\" Type=\"{REL_NS}/worksheet\" Target=\"worksheets/sheet{n}.xml\"/>"
        ));

        let mut data = String::new();
        for (r, row) in rows.iter().enumerate() {
            let row_number = r as u32 + 1;
            let mut cells = String::new();
            for (c, text) in row.iter().enumerate() {
                if text.is_empty() {
                    continue;
                }
                let reference = cell_reference(row_number, c as u32 + 1);
                if text.parse::<f64>().is_ok() {
                    cells.push_str(&format!("<c r=\"{reference}\"><v>{text}</v></c>"));
                } else {
                    shared.push(text.to_string());
                    cells.push_str(&format!(
                        "<c r=\"{reference}\" t=\"s\"><v>{}</v></c>",
                        shared.len() - 1
                    ));
                }
            }
            data.push_str(&format!("<row r=\"{row_number}\">{cells}</row>"));
        }
        let merge_refs: Vec<&str> = merges
            .iter()
            .filter(|(sheet, _)| *sheet == idx)
            .map(|(_, range)| *range)
            .collect();
        let merge_xml = if merge_refs.is_empty() {
            String::new()
        } else {
            let inner: String = merge_refs
                .iter()
                .map(|range| format!("<mergeCell ref=\"{range}\"/>"))
                .collect();
            format!("<mergeCells count=\"{}\">{inner}</mergeCells>", merge_refs.len())
        };
        sheet_parts.push((
            format!("xl/worksheets/sheet{n}.xml"),
            format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?><worksheet xmlns=\"{SHEET_NS}\" xmlns:r=\"{REL_NS}\"><sheetData>{data}</sheetData>{merge_xml}</worksheet>"
            ),
        ));
    }
    content_types.push_str("</Types>");
    let shared_xml: String = shared
        .iter()
        .map(|s| format!("<si><t xml:space=\"preserve\">{}</t></si>", escape(s.as_str())))
        .collect();
    rels.push_str(&format!(
        "<Relationship Id=\"rIdStrings\" Type=\"{REL_NS}/sharedStrings\" Target=\"sharedStrings.xml\"/>"
    ));

    package.set_part("[Content_Types].xml", content_types.into_bytes());
    package.set_part(
        "_rels/.rels",
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?><Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\"><Relationship Id=\"rId1\" Type=\"{REL_NS}/officeDocument\" Target=\"xl/workbook.xml\"/></Relationships>"
        )
        .into_bytes(),
    );
    package.set_part(
        "xl/workbook.xml",
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?><workbook xmlns=\"{SHEET_NS}\" xmlns:r=\"{REL_NS}\"><sheets>{sheet_list}</sheets></workbook>"
        )
        .into_bytes(),
    );
    package.set_part(
        "xl/_rels/workbook.xml.rels",
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?><Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">{rels}</Relationships>"
        )
        .into_bytes(),
    );
    package.set_part(
        "xl/sharedStrings.xml",
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?><sst xmlns=\"{SHEET_NS}\" count=\"{0}\" uniqueCount=\"{0}\">{shared_xml}</sst>",
            shared.len()
        )
        .into_bytes(),
    );
    for (name, xml) in sheet_parts {
        package.set_part(&name, xml.into_bytes());
    }
    package
        .to_bytes()
        .expect("in-memory package always serializes")
}
