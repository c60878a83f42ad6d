//! Hand-written recursive-descent parser for CityGML text.
//!
//! Attribute text is kept verbatim and never unescaped, tag names are matched as
//! literal prefixed strings, and whitespace-only runs between tags are dropped.

use tracing::{debug, warn};

use crate::error::ParseError;
use crate::model::{Child, Document, Element, NodeId};

const BOM: char = '\u{feff}';

pub fn parse_document(text: &str) -> Result<Document, ParseError> {
    let text = text.strip_prefix(BOM).unwrap_or(text);
    let mut parser = Parser {
        src: text,
        pos: 0,
        nodes: Vec::new(),
    };

    parser.skip_whitespace();
    let header = parser.parse_header()?;
    parser.skip_whitespace();
    let root = parser.parse_element()?;

    parser.skip_whitespace();
    if parser.pos < text.len() {
        warn!(
            "Ignoring {} bytes after the root element",
            text.len() - parser.pos
        );
    }

    debug!(
        "Parsed document: header {} bytes, {} elements",
        header.len(),
        parser.nodes.len()
    );
    Ok(Document::from_parts(header, parser.nodes, root))
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    nodes: Vec<Element>,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        let src = self.src;
        &src[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    /// Absolute offset of the next `needle` at or after `from`.
    fn find_from(&self, from: usize, needle: char) -> Option<usize> {
        self.src[from..].find(needle).map(|i| from + i)
    }

    fn eof(&self, open: &str) -> ParseError {
        ParseError::UnexpectedEof {
            offset: self.src.len(),
            open: open.to_string(),
        }
    }

    fn parse_header(&mut self) -> Result<String, ParseError> {
        if !self.rest().starts_with("<?xml") {
            return Ok(String::new());
        }
        let end = self
            .rest()
            .find("?>")
            .ok_or_else(|| self.eof("<?xml declaration"))?;
        let header = self.rest()[..end + 2].to_string();
        self.pos += end + 2;
        Ok(header)
    }

    fn parse_element(&mut self) -> Result<NodeId, ParseError> {
        let src = self.src;
        let start = self.pos;
        if !self.rest().starts_with('<') {
            return Err(ParseError::UnexpectedContent { offset: start });
        }
        let close = self
            .find_from(start + 1, '>')
            .ok_or_else(|| self.eof("a tag header"))?;
        let raw = &src[start + 1..close];
        self.pos = close + 1;

        let name_end = raw
            .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
            .unwrap_or(raw.len());
        let (tag, rest) = raw.split_at(name_end);
        if tag.is_empty() {
            return Err(ParseError::UnexpectedContent { offset: start + 1 });
        }

        let mut attrs = rest.trim();
        let self_closing = attrs.ends_with('/');
        if self_closing {
            attrs = attrs[..attrs.len() - 1].trim_end();
        }
        let mut element = Element::new(tag, attrs);
        if self_closing {
            return Ok(Document::alloc(&mut self.nodes, element));
        }

        loop {
            let rest = self.rest();
            if rest.is_empty() {
                return Err(self.eof(tag));
            }

            if rest.starts_with("</") {
                let end = self
                    .find_from(self.pos, '>')
                    .ok_or_else(|| self.eof(tag))?;
                let found = &src[self.pos + 2..end];
                if found != tag {
                    return Err(ParseError::MismatchedTag {
                        offset: self.pos,
                        expected: tag.to_string(),
                        found: found.to_string(),
                    });
                }
                self.pos = end + 1;
                break;
            } else if rest.starts_with('<') {
                let child = self.parse_element()?;
                element.children.push(Child::Element(child));
            } else {
                let end = self
                    .find_from(self.pos, '<')
                    .ok_or_else(|| self.eof(tag))?;
                let text = src[self.pos..end].trim();
                if !text.is_empty() {
                    element.children.push(Child::Text(text.to_string()));
                }
                self.pos = end;
            }
        }

        Ok(Document::alloc(&mut self.nodes, element))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(doc: &Document) -> Vec<String> {
        doc.descendants(doc.root())
            .map(|id| doc.element(id).tag.clone())
            .collect()
    }

    #[test]
    fn test_parse_header_and_root() {
        let xml = "\u{feff}<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<core:CityModel xmlns:core=\"x\">\n  <core:cityObjectMember/>\n</core:CityModel>\n";
        let doc = parse_document(xml).unwrap();

        assert_eq!(doc.header(), r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        let root = doc.element(doc.root());
        assert_eq!(root.tag, "core:CityModel");
        assert_eq!(root.attrs, r#"xmlns:core="x""#);
        assert_eq!(tags(&doc), vec!["core:CityModel", "core:cityObjectMember"]);
    }

    #[test]
    fn test_parse_without_header() {
        let doc = parse_document("<a><b>text</b></a>").unwrap();
        assert_eq!(doc.header(), "");
        let b = doc.child_elements(doc.root()).next().unwrap();
        assert_eq!(doc.only_text_child(b).unwrap(), "text");
    }

    #[test]
    fn test_attribute_text_kept_verbatim_across_lines() {
        let xml = "<bldg:Building gml:id=\"B1\"\n\t\tfoo='1'  bar=\"&amp;\">x</bldg:Building>";
        let doc = parse_document(xml).unwrap();
        let root = doc.element(doc.root());
        assert_eq!(root.attrs, "gml:id=\"B1\"\n\t\tfoo='1'  bar=\"&amp;\"");
        assert_eq!(root.gml_id(), Some("B1"));
    }

    #[test]
    fn test_self_closing_elements() {
        let doc = parse_document(r#"<a><b x="1"/><c/><d /></a>"#).unwrap();
        let children: Vec<_> = doc.child_elements(doc.root()).collect();
        assert_eq!(children.len(), 3);
        assert_eq!(doc.element(children[0]).attrs, r#"x="1""#);
        assert_eq!(doc.element(children[1]).attrs, "");
        assert_eq!(doc.element(children[2]).tag, "d");
        assert!(children
            .iter()
            .all(|&id| doc.element(id).children.is_empty()));
    }

    #[test]
    fn test_whitespace_only_text_is_dropped() {
        let doc = parse_document("<a>\n   <b/>\n  tail  \n</a>").unwrap();
        let root = doc.element(doc.root());
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[1], Child::Text("tail".to_string()));
    }

    #[test]
    fn test_content_must_start_with_tag() {
        let err = parse_document("<?xml version=\"1.0\"?>  hello").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedContent { .. }));
    }

    #[test]
    fn test_mismatched_closing_tag() {
        let err = parse_document("<a><b></c></a>").unwrap_err();
        match err {
            ParseError::MismatchedTag {
                expected, found, ..
            } => {
                assert_eq!(expected, "b");
                assert_eq!(found, "c");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_closing_tag_name_must_match_exactly() {
        let err = parse_document("<a>x</a >").unwrap_err();
        assert!(matches!(err, ParseError::MismatchedTag { ref found, .. } if found == "a "));

        let err = parse_document("<a>x</ a>").unwrap_err();
        assert!(matches!(err, ParseError::MismatchedTag { .. }));
    }

    #[test]
    fn test_truncated_document() {
        let err = parse_document("<a><b>text").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedEof { ref open, .. } if open == "b"));

        let err = parse_document("<a><b").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedEof { .. }));

        let err = parse_document("<a>").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedEof { ref open, .. } if open == "a"));
    }
}
