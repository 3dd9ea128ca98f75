#![forbid(unsafe_code)]

//! Owned arena DOM.
//!
//! Nodes live in a single `Vec` and refer to each other by [`NodeId`], so
//! node identity (which canonicalization depends on for node-set
//! membership) is just id equality. Namespace nodes are materialized per
//! element for every in-scope binding, including the implicit `xml`
//! binding, which is what lets `//namespace::*` queries drive
//! document-subset canonicalization.

use solna_core::{ns, Error, Result};

use crate::nodeset::NodeSet;
use crate::xpath::{self, XPathContext};

/// Identity of a node within its [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// The arena index of this node.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A qualified name. An empty `prefix` means the name is unprefixed; an
/// empty `uri` means the name is in no namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QName {
    pub prefix: String,
    pub local: String,
    pub uri: String,
}

impl QName {
    pub fn new(prefix: &str, local: &str, uri: &str) -> Self {
        Self {
            prefix: prefix.to_owned(),
            local: local.to_owned(),
            uri: uri.to_owned(),
        }
    }
}

/// Attribute type, as declared by a DTD.
///
/// Parsed documents carry `Undeclared` (the tokenizer does not read
/// ATTLIST declarations); a DTD-aware embedder can supply declared types
/// through [`Document::set_attribute_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Cdata,
    Id,
    Idref,
    Idrefs,
    Nmtoken,
    Nmtokens,
    Entity,
    Entities,
    Notation,
    Undeclared,
}

impl AttrType {
    /// Whether attribute-value normalization collapses spaces for this
    /// type. `Cdata` and `Undeclared` values are emitted verbatim.
    pub fn is_tokenized(self) -> bool {
        !matches!(self, Self::Cdata | Self::Undeclared)
    }
}

#[derive(Debug, Clone)]
pub struct ElementData {
    pub name: QName,
    /// Namespace declarations made on this element, in document order.
    /// An empty URI for the empty prefix records `xmlns=""`.
    pub declarations: Vec<(String, String)>,
    /// Namespace nodes for every binding in scope on this element,
    /// sorted by prefix. Includes the implicit `xml` binding; excludes
    /// an undeclared default.
    pub namespaces: Vec<NodeId>,
    /// Attribute nodes, in document order.
    pub attributes: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct AttributeData {
    pub name: QName,
    pub value: String,
    pub ty: AttrType,
}

#[derive(Debug, Clone)]
pub struct NamespaceData {
    pub prefix: String,
    pub uri: String,
}

#[derive(Debug, Clone)]
pub struct PiData {
    pub target: String,
    pub data: String,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Document,
    Element(ElementData),
    Attribute(AttributeData),
    Namespace(NamespaceData),
    Text(String),
    Comment(String),
    ProcessingInstruction(PiData),
    DocType(String),
}

#[derive(Debug)]
struct NodeData {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
}

/// An XML document tree. Immutable once parsed, apart from
/// [`Document::set_attribute_type`].
#[derive(Debug)]
pub struct Document {
    nodes: Vec<NodeData>,
}

const NO_CHILDREN: &[NodeId] = &[];

impl Document {
    pub(crate) fn new() -> Self {
        Self {
            nodes: vec![NodeData {
                parent: None,
                children: Vec::new(),
                kind: NodeKind::Document,
            }],
        }
    }

    /// Parse a document from XML text.
    pub fn parse(text: &str) -> Result<Self> {
        crate::parser::parse(text)
    }

    /// Resolve an XPath expression to a node-set in document order.
    pub fn query(&self, expr: &str, context: &XPathContext) -> Result<NodeSet> {
        xpath::query(self, expr, context)
    }

    /// The document node.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// The document element, if the tree has one.
    pub fn root_element(&self) -> Option<NodeId> {
        self.children(self.root())
            .iter()
            .copied()
            .find(|&id| self.element(id).is_some())
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.nodes.get(id.index()).map(|n| &n.kind)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.index()).and_then(|n| n.parent)
    }

    /// The nearest ancestor that is an element.
    pub fn parent_element(&self, id: NodeId) -> Option<NodeId> {
        let mut current = self.parent(id);
        while let Some(p) = current {
            if self.element(p).is_some() {
                return Some(p);
            }
            current = self.parent(p);
        }
        None
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.index())
            .map_or(NO_CHILDREN, |n| &n.children)
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match self.kind(id) {
            Some(NodeKind::Element(e)) => Some(e),
            _ => None,
        }
    }

    pub fn attribute(&self, id: NodeId) -> Option<&AttributeData> {
        match self.kind(id) {
            Some(NodeKind::Attribute(a)) => Some(a),
            _ => None,
        }
    }

    pub fn namespace(&self, id: NodeId) -> Option<&NamespaceData> {
        match self.kind(id) {
            Some(NodeKind::Namespace(n)) => Some(n),
            _ => None,
        }
    }

    /// Pre-order traversal of the node and its tree descendants.
    /// Attribute and namespace nodes are not visited.
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        Descendants {
            doc: self,
            stack: vec![id],
        }
    }

    /// The URI bound to `prefix` in scope on `element`, or `None` if the
    /// prefix is unbound there.
    pub fn in_scope_uri(&self, element: NodeId, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(ns::XML);
        }
        let elem = self.element(element)?;
        elem.namespaces
            .iter()
            .filter_map(|&id| self.namespace(id))
            .find(|n| n.prefix == prefix)
            .map(|n| n.uri.as_str())
    }

    /// Find an attribute of `element` by local name and namespace URI.
    pub fn find_attribute(&self, element: NodeId, local: &str, uri: &str) -> Option<NodeId> {
        let elem = self.element(element)?;
        elem.attributes.iter().copied().find(|&id| {
            self.attribute(id)
                .is_some_and(|a| a.name.local == local && a.name.uri == uri)
        })
    }

    /// Record the DTD-declared type of an attribute.
    pub fn set_attribute_type(&mut self, attribute: NodeId, ty: AttrType) {
        if let Some(node) = self.nodes.get_mut(attribute.index()) {
            if let NodeKind::Attribute(a) = &mut node.kind {
                a.ty = ty;
            }
        }
    }

    // ── construction (used by the parser) ────────────────────────────

    pub(crate) fn push_child(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(NodeData {
            parent: Some(parent),
            children: Vec::new(),
            kind,
        });
        self.nodes[parent.index()].children.push(id);
        id
    }

    pub(crate) fn push_attribute(&mut self, element: NodeId, data: AttributeData) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(NodeData {
            parent: Some(element),
            children: Vec::new(),
            kind: NodeKind::Attribute(data),
        });
        if let NodeKind::Element(e) = &mut self.nodes[element.index()].kind {
            e.attributes.push(id);
        }
        id
    }

    pub(crate) fn push_namespace(&mut self, element: NodeId, data: NamespaceData) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(NodeData {
            parent: Some(element),
            children: Vec::new(),
            kind: NodeKind::Namespace(data),
        });
        if let NodeKind::Element(e) = &mut self.nodes[element.index()].kind {
            e.namespaces.push(id);
        }
        id
    }

    pub(crate) fn last_child(&self, parent: NodeId) -> Option<NodeId> {
        self.children(parent).last().copied()
    }

    pub(crate) fn append_to_text(&mut self, id: NodeId, more: &str) -> bool {
        match self.nodes.get_mut(id.index()) {
            Some(NodeData {
                kind: NodeKind::Text(t),
                ..
            }) => {
                t.push_str(more);
                true
            }
            _ => false,
        }
    }
}

/// Iterator returned by [`Document::descendants`].
pub struct Descendants<'a> {
    doc: &'a Document,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        let children = self.doc.children(id);
        self.stack.extend(children.iter().rev().copied());
        Some(id)
    }
}

impl std::fmt::Display for QName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.prefix.is_empty() {
            f.write_str(&self.local)
        } else {
            write!(f, "{}:{}", self.prefix, self.local)
        }
    }
}

/// A well-formed qualified name with a non-empty prefix must carry a
/// non-empty namespace URI.
pub(crate) fn check_qname(name: &QName) -> Result<()> {
    if !name.prefix.is_empty() && name.uri.is_empty() {
        return Err(Error::XmlParse(format!(
            "prefix '{}' is not bound to a namespace",
            name.prefix
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_and_parents() {
        let doc = Document::parse(r#"<a><b/><b/></a>"#).unwrap();
        let root = doc.root_element().unwrap();
        let kids = doc.children(root);
        assert_eq!(kids.len(), 2);
        // structurally equal elements are still distinct nodes
        assert_ne!(kids[0], kids[1]);
        assert_eq!(doc.parent(kids[0]), Some(root));
        assert_eq!(doc.parent_element(kids[1]), Some(root));
    }

    #[test]
    fn in_scope_lookup() {
        let doc = Document::parse(r#"<a xmlns:p="http://p/"><b/></a>"#).unwrap();
        let a = doc.root_element().unwrap();
        let b = doc.children(a)[0];
        assert_eq!(doc.in_scope_uri(b, "p"), Some("http://p/"));
        assert_eq!(doc.in_scope_uri(b, "q"), None);
        assert_eq!(
            doc.in_scope_uri(b, "xml"),
            Some("http://www.w3.org/XML/1998/namespace")
        );
    }

    #[test]
    fn descendants_order() {
        let doc = Document::parse(r#"<a><b><c/></b><d/></a>"#).unwrap();
        let names: Vec<String> = doc
            .descendants(doc.root())
            .filter_map(|id| doc.element(id).map(|e| e.name.local.clone()))
            .collect();
        assert_eq!(names, ["a", "b", "c", "d"]);
    }

    #[test]
    fn attribute_types_start_undeclared() {
        let mut doc = Document::parse(r#"<a x="  v  "/>"#).unwrap();
        let a = doc.root_element().unwrap();
        let attr = doc.find_attribute(a, "x", "").unwrap();
        assert_eq!(doc.attribute(attr).unwrap().ty, AttrType::Undeclared);
        doc.set_attribute_type(attr, AttrType::Nmtokens);
        assert!(doc.attribute(attr).unwrap().ty.is_tokenized());
    }
}
