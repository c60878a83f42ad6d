use crate::model::{Child, Document, Element, NodeId};

#[derive(Default)]
pub struct GmlWriter {}

impl GmlWriter {
    pub fn new() -> Self {
        Self {}
    }

    /// Serializes the tree reachable from the root. Elements holding only text
    /// are written on one line; any element child puts every child on its own line.
    pub fn write(&self, doc: &Document) -> String {
        let mut out = String::new();
        if !doc.header().is_empty() {
            out.push_str(doc.header());
            out.push('\n');
        }
        self.write_element(doc, doc.root(), &mut out);
        out
    }

    fn write_element(&self, doc: &Document, id: NodeId, out: &mut String) {
        let element = doc.element(id);
        self.write_start_tag(element, out);

        if !element.has_element_children() {
            // テキストのみ（または空）の要素は1行で出力
            for child in &element.children {
                if let Child::Text(text) = child {
                    out.push_str(text);
                }
            }
        } else {
            out.push('\n');
            for child in &element.children {
                match child {
                    Child::Element(child_id) => self.write_element(doc, *child_id, out),
                    Child::Text(text) => {
                        out.push_str(text);
                        out.push('\n');
                    }
                }
            }
        }

        out.push_str("</");
        out.push_str(&element.tag);
        out.push_str(">\n");
    }

    fn write_start_tag(&self, element: &Element, out: &mut String) {
        out.push('<');
        out.push_str(&element.tag);
        if !element.attrs.is_empty() {
            out.push(' ');
            out.push_str(&element.attrs);
        }
        out.push('>');
    }
}
