use std::fs::{self, File};
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{FillError, Result};
use crate::xml::XmlDocument;

#[derive(Debug, Clone)]
struct PackagePart {
    name: String,
    data: Vec<u8>,
}

/// In-memory OOXML package. Part order from the source archive is kept
/// so `[Content_Types].xml` stays first on write.
#[derive(Debug, Clone, Default)]
pub struct OoxmlPackage {
    parts: Vec<PackagePart>,
}

impl OoxmlPackage {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_reader(Cursor::new(bytes))
    }

    fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;
        let mut parts = Vec::with_capacity(archive.len());
        for idx in 0..archive.len() {
            let mut entry = archive.by_index(idx)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut data)?;
            parts.push(PackagePart { name, data });
        }
        debug!(parts = parts.len(), "opened package");
        Ok(Self { parts })
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|part| part.name.as_str())
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.parts
            .iter()
            .find(|part| part.name == name)
            .map(|part| part.data.as_slice())
    }

    pub fn xml_part(&self, name: &str) -> Result<XmlDocument> {
        let data = self
            .part(name)
            .ok_or_else(|| FillError::InvalidDocument(format!("missing package part {name}")))?;
        XmlDocument::parse_bytes(data)
    }

    pub fn optional_xml_part(&self, name: &str) -> Result<Option<XmlDocument>> {
        match self.part(name) {
            Some(data) => XmlDocument::parse_bytes(data).map(Some),
            None => Ok(None),
        }
    }

    pub fn set_part(&mut self, name: &str, data: Vec<u8>) {
        match self.parts.iter_mut().find(|part| part.name == name) {
            Some(part) => part.data = data,
            None => self.parts.push(PackagePart {
                name: name.to_string(),
                data,
            }),
        }
    }

    pub fn set_xml_part(&mut self, name: &str, doc: &XmlDocument) {
        self.set_part(name, doc.to_xml_string().into_bytes());
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for part in &self.parts {
            writer.start_file(part.name.as_str(), options)?;
            writer.write_all(&part.data)?;
        }
        let cursor = writer.finish()?;
        Ok(cursor.into_inner())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let bytes = self.to_bytes()?;
        fs::write(path, bytes)
            .map_err(|e| FillError::Persistence(format!("failed to write {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_survive_a_write_cycle() {
        let mut package = OoxmlPackage::default();
        package.set_part("[Content_Types].xml", b"<Types/>".to_vec());
        package.set_part("word/document.xml", b"<w:document/>".to_vec());
        let bytes = package.to_bytes().unwrap();

        let mut reopened = OoxmlPackage::from_bytes(&bytes).unwrap();
        let names: Vec<&str> = reopened.part_names().collect();
        assert_eq!(names, vec!["[Content_Types].xml", "word/document.xml"]);

        reopened.set_part("word/document.xml", b"<w:document><w:body/></w:document>".to_vec());
        let doc = reopened.xml_part("word/document.xml").unwrap();
        assert_eq!(doc.root.child("w:body").map(|b| b.name.as_str()), Some("w:body"));
        assert!(reopened.xml_part("xl/workbook.xml").is_err());
        assert!(reopened.optional_xml_part("xl/workbook.xml").unwrap().is_none());
    }

    #[test]
    fn rejects_non_zip_input() {
        assert!(OoxmlPackage::from_bytes(b"plain text").is_err());
    }
}
