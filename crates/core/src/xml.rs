//! Minimal mutable XML tree for OOXML parts.
//!
//! Parts are small enough to hold in memory, and cell rewrites need
//! random access to siblings, so events from `quick_xml` are folded
//! into an owned tree and serialized back out on save.

use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{FillError, Result};

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n";

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmlElement {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((key, value)),
        }
    }

    pub fn remove_attr(&mut self, key: &str) {
        self.attrs.retain(|(k, _)| k != key);
    }

    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(el) => Some(el),
            XmlNode::Text(_) => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut XmlElement> {
        self.children.iter_mut().filter_map(|node| match node {
            XmlNode::Element(el) => Some(el),
            XmlNode::Text(_) => None,
        })
    }

    pub fn elements_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.elements().filter(move |el| el.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|el| el.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut XmlElement> {
        self.elements_mut().find(|el| el.name == name)
    }

    pub fn nth_named_mut(&mut self, name: &str, n: usize) -> Option<&mut XmlElement> {
        self.elements_mut().filter(|el| el.name == name).nth(n)
    }

    pub fn has_descendant(&self, name: &str) -> bool {
        self.elements()
            .any(|el| el.name == name || el.has_descendant(name))
    }

    /// Concatenated text of the direct text children.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            if let XmlNode::Text(text) = node {
                out.push_str(text);
            }
        }
        out
    }

    pub fn push(&mut self, child: XmlElement) {
        self.children.push(XmlNode::Element(child));
    }

    pub fn remove_named(&mut self, name: &str) {
        self.children.retain(|node| match node {
            XmlNode::Element(el) => el.name != name,
            XmlNode::Text(_) => true,
        });
    }

    /// Returns the named child, creating it at `position` among the
    /// children when absent.
    pub fn ensure_child(&mut self, name: &str, position: usize) -> &mut XmlElement {
        let existing = self.children.iter().position(
            |node| matches!(node, XmlNode::Element(el) if el.name == name),
        );
        let idx = match existing {
            Some(idx) => idx,
            None => {
                let at = position.min(self.children.len());
                self.children
                    .insert(at, XmlNode::Element(XmlElement::new(name)));
                at
            }
        };
        match &mut self.children[idx] {
            XmlNode::Element(el) => el,
            XmlNode::Text(_) => unreachable!("position holds the element inserted above"),
        }
    }

    /// Inserts `child` before the first sibling that ranks after it in
    /// `order`, replacing any existing element of the same name. Names
    /// missing from `order` are left where they are.
    pub fn insert_ordered(&mut self, child: XmlElement, order: &[&str]) {
        self.remove_named(&child.name);
        let rank = order.iter().position(|name| *name == child.name);
        let at = rank.and_then(|rank| {
            self.children.iter().position(|node| match node {
                XmlNode::Element(el) => order
                    .iter()
                    .position(|name| *name == el.name)
                    .map(|other| other > rank)
                    .unwrap_or(false),
                XmlNode::Text(_) => false,
            })
        });
        match at {
            Some(idx) => self.children.insert(idx, XmlNode::Element(child)),
            None => self.children.push(XmlNode::Element(child)),
        }
    }

    fn write_into(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attrs {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value));
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for node in &self.children {
            match node {
                XmlNode::Element(el) => el.write_into(out),
                XmlNode::Text(text) => out.push_str(&escape(text)),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct XmlDocument {
    pub root: XmlElement,
}

impl XmlDocument {
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;
        loop {
            let event = reader
                .read_event()
                .map_err(|e| FillError::Xml(format!("at byte {}: {e}", reader.buffer_position())))?;
            match event {
                Event::Start(start) => stack.push(element_from(&start)?),
                Event::Empty(start) => {
                    let element = element_from(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| FillError::Xml("unbalanced closing tag".to_string()))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    if let Some(parent) = stack.last_mut() {
                        let value = text
                            .unescape()
                            .map_err(|e| FillError::Xml(e.to_string()))?;
                        if !value.is_empty() {
                            parent.children.push(XmlNode::Text(value.into_owned()));
                        }
                    }
                }
                Event::CData(data) => {
                    if let Some(parent) = stack.last_mut() {
                        let value = String::from_utf8_lossy(&data.into_inner()).into_owned();
                        parent.children.push(XmlNode::Text(value));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        if !stack.is_empty() {
            return Err(FillError::Xml("unclosed element at end of input".to_string()));
        }
        root.map(|root| Self { root })
            .ok_or_else(|| FillError::Xml("document has no root element".to_string()))
    }

    pub fn parse_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| FillError::Xml(format!("part is not utf-8: {e}")))?;
        Self::parse(text.trim_start_matches('\u{feff}'))
    }

    pub fn to_xml_string(&self) -> String {
        let mut out = String::from(XML_DECLARATION);
        self.root.write_into(&mut out);
        out
    }
}

fn element_from(start: &BytesStart<'_>) -> Result<XmlElement> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut element = XmlElement::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| FillError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| FillError::Xml(e.to_string()))?
            .into_owned();
        element.attrs.push((key, value));
    }
    Ok(element)
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(element)),
        None => {
            if root.is_some() {
                return Err(FillError::Xml("multiple root elements".to_string()));
            }
            *root = Some(element);
        }
    }
    Ok(())
}

fn escape(raw: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_serializes_nested_elements() {
        let xml = r#"<?xml version="1.0"?><w:tc><w:tcPr><w:gridSpan w:val="2"/></w:tcPr><w:p><w:r><w:t xml:space="preserve">A &amp; B</w:t></w:r></w:p></w:tc>"#;
        let doc = XmlDocument::parse(xml).unwrap();
        assert_eq!(doc.root.name, "w:tc");
        let span = doc.root.child("w:tcPr").unwrap().child("w:gridSpan").unwrap();
        assert_eq!(span.attr("w:val"), Some("2"));
        let run = doc.root.child("w:p").unwrap().child("w:r").unwrap();
        assert_eq!(run.child("w:t").unwrap().text(), "A & B");
        let out = doc.to_xml_string();
        assert!(out.contains("<w:gridSpan w:val=\"2\"/>"));
        assert!(out.contains("A &amp; B"));
        let again = XmlDocument::parse(&out).unwrap();
        assert_eq!(again, doc);
    }

    #[test]
    fn insert_ordered_respects_schema_order() {
        let mut rpr = XmlElement::new("w:rPr")
            .with_child(XmlElement::new("w:rFonts"))
            .with_child(XmlElement::new("w:sz"));
        rpr.insert_ordered(XmlElement::new("w:b"), &["w:rFonts", "w:b", "w:i", "w:sz"]);
        rpr.insert_ordered(XmlElement::new("w:i"), &["w:rFonts", "w:b", "w:i", "w:sz"]);
        let names: Vec<&str> = rpr.elements().map(|el| el.name.as_str()).collect();
        assert_eq!(names, vec!["w:rFonts", "w:b", "w:i", "w:sz"]);
    }

    #[test]
    fn rejects_unbalanced_input() {
        assert!(XmlDocument::parse("<a><b></a>").is_err());
        assert!(XmlDocument::parse("").is_err());
    }
}
