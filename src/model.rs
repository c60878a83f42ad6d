//! Arena-backed tag tree.
//!
//! Every element lives in a flat `Vec` owned by [`Document`] and is addressed by
//! [`NodeId`]. Pruning only edits child lists, so detached slots simply become
//! unreachable and no reference can dangle.

use crate::error::{FilterError, Result};

/// Index of an element in the document arena. Two structurally identical
/// elements always have distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Child {
    Element(NodeId),
    Text(String),
}

impl Child {
    pub fn as_element(&self) -> Option<NodeId> {
        match self {
            Child::Element(id) => Some(*id),
            Child::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Qualified tag name, e.g. `core:cityObjectMember`.
    pub tag: String,
    /// Attribute text exactly as written, trimmed and without a self-closing `/`.
    pub attrs: String,
    pub children: Vec<Child>,
}

impl Element {
    pub fn new(tag: impl Into<String>, attrs: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: attrs.into(),
            children: Vec::new(),
        }
    }

    /// All `gml:id` values found by whitespace-tokenizing the attribute text.
    ///
    /// A quoted value containing whitespace is split like any other token, so
    /// such ids are not recognised.
    pub fn gml_ids(&self) -> impl Iterator<Item = &str> {
        attr_values(&self.attrs, "gml:id")
    }

    pub fn gml_id(&self) -> Option<&str> {
        self.gml_ids().next()
    }

    /// Domain objects (buildings, roads, building parts...) carry an id and live
    /// outside the `gml:` prefix; raw geometry primitives do not count.
    pub fn is_feature(&self) -> bool {
        self.gml_id().is_some() && !self.tag.starts_with("gml:")
    }

    pub fn has_element_children(&self) -> bool {
        self.children
            .iter()
            .any(|c| matches!(c, Child::Element(_)))
    }
}

/// Values of `name="VALUE"` tokens in raw attribute text.
pub(crate) fn attr_values<'a>(attrs: &'a str, name: &'a str) -> impl Iterator<Item = &'a str> {
    attrs.split_whitespace().filter_map(move |token| {
        token
            .strip_prefix(name)
            .and_then(|rest| rest.strip_prefix('='))
            .map(|value| value.trim_matches('"'))
    })
}

/// Parsed GML document: optional `<?xml ...?>` header plus one root element.
#[derive(Debug, Clone)]
pub struct Document {
    header: String,
    nodes: Vec<Element>,
    root: NodeId,
}

impl Document {
    pub(crate) fn from_parts(header: String, nodes: Vec<Element>, root: NodeId) -> Self {
        Self {
            header,
            nodes,
            root,
        }
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn element(&self, id: NodeId) -> &Element {
        &self.nodes[id.0]
    }

    pub fn element_mut(&mut self, id: NodeId) -> &mut Element {
        &mut self.nodes[id.0]
    }

    pub(crate) fn alloc(nodes: &mut Vec<Element>, element: Element) -> NodeId {
        nodes.push(element);
        NodeId(nodes.len() - 1)
    }

    /// Element children of `id`, in document order.
    pub fn child_elements(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.element(id).children.iter().filter_map(Child::as_element)
    }

    /// `id` and every element below it, depth-first pre-order.
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        Descendants {
            doc: self,
            stack: vec![id],
        }
    }

    /// The single child of `id`, which must be an element.
    pub fn only_element_child(&self, id: NodeId) -> Result<NodeId> {
        let element = self.element(id);
        match element.children.as_slice() {
            [Child::Element(child)] => Ok(*child),
            [Child::Text(_)] => Err(FilterError::structure(format!(
                "<{}> has a text child where an element was expected",
                element.tag
            ))),
            children => Err(FilterError::structure(format!(
                "<{}> has {} children, expected exactly one",
                element.tag,
                children.len()
            ))),
        }
    }

    /// The single child of `id`, which must be text.
    pub fn only_text_child(&self, id: NodeId) -> Result<&str> {
        let element = self.element(id);
        match element.children.as_slice() {
            [Child::Text(text)] => Ok(text),
            [Child::Element(_)] => Err(FilterError::structure(format!(
                "<{}> has an element child where text was expected",
                element.tag
            ))),
            children => Err(FilterError::structure(format!(
                "<{}> has {} children, expected exactly one",
                element.tag,
                children.len()
            ))),
        }
    }
}

pub struct Descendants<'a> {
    doc: &'a Document,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        let children = &self.doc.element(id).children;
        self.stack
            .extend(children.iter().rev().filter_map(Child::as_element));
        Some(id)
    }
}
