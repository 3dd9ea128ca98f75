#![forbid(unsafe_code)]

//! The canonical serializer: document driver, element walker, start and
//! end tags, namespace pruning and attribute ordering.
//!
//! One `Serializer` lives for the duration of one write call; it owns the
//! namespace scope and borrows the sink. Elements are walked with an
//! explicit `(element, child_index)` stack so that attacker-deep trees
//! cannot exhaust the call stack.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io::Write;

use solna_core::{ns, Result};
use solna_xml::{Document, NodeId, NodeKind, NodeSet, QName};

use crate::escape;
use crate::scope::NamespaceScope;

pub(crate) struct Serializer<'a, W: Write> {
    doc: &'a Document,
    out: &'a mut W,
    /// `None` canonicalizes the whole document; `Some` a subset.
    nodes: Option<&'a NodeSet>,
    scope: NamespaceScope,
    with_comments: bool,
    exclusive: bool,
}

struct Frame {
    element: NodeId,
    child: usize,
}

impl<'a, W: Write> Serializer<'a, W> {
    pub(crate) fn new(
        doc: &'a Document,
        out: &'a mut W,
        nodes: Option<&'a NodeSet>,
        with_comments: bool,
        exclusive: bool,
    ) -> Self {
        Self {
            doc,
            out,
            nodes,
            scope: NamespaceScope::new(),
            with_comments,
            exclusive,
        }
    }

    fn selected(&self, id: NodeId) -> bool {
        self.nodes.map_or(true, |set| set.contains(id))
    }

    /// Serialize the document: prolog nodes, the document element, then
    /// epilog nodes. A line feed follows each emitted prolog PI (and
    /// comment, when comments are on) and precedes each emitted epilog
    /// one. The document element is always walked — even when it is not
    /// itself selected, descendants may be.
    pub(crate) fn write_document(&mut self) -> Result<()> {
        let doc = self.doc;
        let children = doc.children(doc.root());

        let mut position = 0;
        while position < children.len() {
            let child = children[position];
            let is_element = doc.element(child).is_some();
            if is_element || self.selected(child) {
                self.write_child(child)?;
                match doc.kind(child) {
                    Some(NodeKind::ProcessingInstruction(_)) => self.out.write_all(b"\n")?,
                    Some(NodeKind::Comment(_)) if self.with_comments => {
                        self.out.write_all(b"\n")?;
                    }
                    _ => {}
                }
            }
            position += 1;
            if is_element {
                break;
            }
        }

        for &child in &children[position..] {
            if self.selected(child) {
                match doc.kind(child) {
                    Some(NodeKind::ProcessingInstruction(_)) => self.out.write_all(b"\n")?,
                    Some(NodeKind::Comment(_)) if self.with_comments => {
                        self.out.write_all(b"\n")?;
                    }
                    _ => {}
                }
                self.write_child(child)?;
            }
        }
        Ok(())
    }

    fn write_child(&mut self, id: NodeId) -> Result<()> {
        let doc = self.doc;
        match doc.kind(id) {
            Some(NodeKind::Element(_)) => self.write_element(id)?,
            Some(NodeKind::Text(text)) => {
                if self.selected(id) {
                    escape::text(self.out, text)?;
                }
            }
            Some(NodeKind::Comment(text)) => {
                if self.with_comments && self.selected(id) {
                    self.out.write_all(b"<!--")?;
                    self.out.write_all(text.as_bytes())?;
                    self.out.write_all(b"-->")?;
                }
            }
            Some(NodeKind::ProcessingInstruction(pi)) => {
                if self.selected(id) {
                    self.out.write_all(b"<?")?;
                    self.out.write_all(pi.target.as_bytes())?;
                    if !pi.data.is_empty() {
                        self.out.write_all(b" ")?;
                        escape::pi(self.out, &pi.data)?;
                    }
                    self.out.write_all(b"?>")?;
                }
            }
            // Document types never appear in canonical form; the
            // remaining kinds cannot occur as children.
            _ => {}
        }
        Ok(())
    }

    /// Depth-first walk of an element with an explicit stack. Children
    /// are always visited: an unselected element still contributes its
    /// selected descendants.
    fn write_element(&mut self, element: NodeId) -> Result<()> {
        let doc = self.doc;
        self.write_start_tag(element)?;
        if doc.children(element).is_empty() {
            return self.write_end_tag(element);
        }
        let mut stack = vec![Frame { element, child: 0 }];
        while let Some(top) = stack.len().checked_sub(1) {
            let current = stack[top].element;
            let index = stack[top].child;
            let children = doc.children(current);
            if index < children.len() {
                stack[top].child += 1;
                let node = children[index];
                if doc.element(node).is_some() {
                    self.write_start_tag(node)?;
                    if doc.children(node).is_empty() {
                        self.write_end_tag(node)?;
                    } else {
                        stack.push(Frame {
                            element: node,
                            child: 0,
                        });
                    }
                } else {
                    self.write_child(node)?;
                }
            } else {
                self.write_end_tag(current)?;
                stack.pop();
            }
        }
        Ok(())
    }

    fn write_start_tag(&mut self, element: NodeId) -> Result<()> {
        let doc = self.doc;
        let Some(elem) = doc.element(element) else {
            return Ok(());
        };
        let selected = self.selected(element);

        if selected {
            self.scope.push_context();
            self.out.write_all(b"<")?;
            self.write_qname(&elem.name)?;
        }

        // Namespace declarations, keyed by prefix so the default
        // declaration sorts first and the rest are in prefix order.
        let mut declarations: BTreeMap<&'a str, &'a str> = BTreeMap::new();
        match self.nodes {
            None => {
                let parent_default = doc
                    .parent_element(element)
                    .map(|p| doc.in_scope_uri(p, "").unwrap_or(""));
                for (prefix, uri) in &elem.declarations {
                    if self.scope.uri(prefix) == Some(uri.as_str()) {
                        continue;
                    }
                    if self.exclusive {
                        if self.visibly_utilized(element, prefix, uri) {
                            declarations.insert(prefix, uri);
                        }
                    } else if uri.is_empty() {
                        // xmlns="" only matters when it undeclares a
                        // default namespace inherited from the parent.
                        if matches!(parent_default, Some(d) if !d.is_empty()) {
                            declarations.insert(prefix, uri);
                        }
                    } else {
                        declarations.insert(prefix, uri);
                    }
                }
            }
            Some(set) => {
                let position = set.index_of(element);
                // An element with no namespace of its own may need
                // xmlns="" to undeclare a default inherited from the
                // nearest selected ancestor in the output tree.
                if position.is_some() && elem.name.uri.is_empty() {
                    if let Some(ancestor) = self.nearest_selected_ancestor(element) {
                        if !doc.in_scope_uri(ancestor, "").unwrap_or("").is_empty() {
                            declarations.insert("", "");
                        }
                    }
                }
                // The namespace nodes selected for this element are the
                // run immediately following it in the node-set.
                if let Some(position) = position {
                    for i in position + 1..set.len() {
                        let Some(namespace) = set.get(i).and_then(|id| doc.namespace(id)) else {
                            break;
                        };
                        if self.scope.uri(&namespace.prefix) == Some(namespace.uri.as_str()) {
                            continue;
                        }
                        if self.exclusive {
                            if self.visibly_utilized(element, &namespace.prefix, &namespace.uri) {
                                declarations.insert(&namespace.prefix, &namespace.uri);
                            }
                        } else {
                            declarations.insert(&namespace.prefix, &namespace.uri);
                        }
                    }
                }
            }
        }

        for (prefix, uri) in &declarations {
            self.out.write_all(b" xmlns")?;
            if !prefix.is_empty() {
                self.out.write_all(b":")?;
                self.out.write_all(prefix.as_bytes())?;
            }
            self.out.write_all(b"=\"")?;
            escape::attribute(self.out, uri)?;
            self.out.write_all(b"\"")?;
            self.scope.declare_prefix(prefix, uri);
        }

        for attr in self.sorted_attributes(element) {
            let Some(data) = doc.attribute(attr) else {
                continue;
            };
            let emit = match self.nodes {
                None => true,
                // In subset mode an attribute is emitted when selected,
                // or when it is an xml:* attribute inherited from an
                // ancestor (its parent is not this element).
                Some(set) => {
                    set.contains(attr)
                        || (data.name.uri == ns::XML && doc.parent(attr) != Some(element))
                }
            };
            if emit {
                self.out.write_all(b" ")?;
                self.write_qname(&data.name)?;
                self.out.write_all(b"=\"")?;
                if data.ty.is_tokenized() {
                    escape::attribute_tokenized(self.out, &data.value)?;
                } else {
                    escape::attribute(self.out, &data.value)?;
                }
                self.out.write_all(b"\"")?;
            }
        }

        if selected {
            self.out.write_all(b">")?;
        }
        Ok(())
    }

    fn write_end_tag(&mut self, element: NodeId) -> Result<()> {
        if !self.selected(element) {
            return Ok(());
        }
        let doc = self.doc;
        let Some(elem) = doc.element(element) else {
            return Ok(());
        };
        self.out.write_all(b"</")?;
        self.write_qname(&elem.name)?;
        self.out.write_all(b">")?;
        self.scope.pop_context();
        Ok(())
    }

    fn write_qname(&mut self, name: &QName) -> Result<()> {
        if !name.prefix.is_empty() {
            self.out.write_all(name.prefix.as_bytes())?;
            self.out.write_all(b":")?;
        }
        self.out.write_all(name.local.as_bytes())?;
        Ok(())
    }

    /// The element's own attributes plus, in inclusive subset mode,
    /// `xml:*` attributes inherited from unselected ancestors — nearest
    /// ancestor wins, and a selected ancestor blocks inheritance of that
    /// local name (it emits the attribute on its own start tag). Sorted
    /// with [`compare_attributes`].
    fn sorted_attributes(&self, element: NodeId) -> Vec<NodeId> {
        let doc = self.doc;
        let Some(elem) = doc.element(element) else {
            return Vec::new();
        };
        let mut attrs = elem.attributes.clone();

        if !self.exclusive {
            if let Some(set) = self.nodes {
                if set.contains(element) {
                    let mut nearest: BTreeMap<&str, Option<NodeId>> = BTreeMap::new();
                    let mut ancestor = doc.parent_element(element);
                    while let Some(current) = ancestor {
                        if let Some(data) = doc.element(current) {
                            for &attr in &data.attributes {
                                let Some(a) = doc.attribute(attr) else {
                                    continue;
                                };
                                if a.name.uri != ns::XML {
                                    continue;
                                }
                                if doc
                                    .find_attribute(element, &a.name.local, ns::XML)
                                    .is_some()
                                {
                                    continue;
                                }
                                nearest.entry(&a.name.local).or_insert_with(|| {
                                    if set.contains(current) {
                                        None
                                    } else {
                                        Some(attr)
                                    }
                                });
                            }
                        }
                        ancestor = doc.parent_element(current);
                    }
                    attrs.extend(nearest.values().flatten());
                }
            }
        }

        attrs.sort_by(|a, b| compare_attributes(doc, *a, *b));
        attrs
    }

    /// Exclusive mode: a declaration (prefix → uri) on `element` is
    /// emitted only when the prefix is visibly utilized within the
    /// output under `element` and the binding in force from the nearest
    /// selected ancestor would be wrong.
    fn visibly_utilized(&self, element: NodeId, prefix: &str, uri: &str) -> bool {
        self.prefix_used_in_output(element, prefix, uri)
            && self.no_selected_ancestor_binds(element, prefix, uri)
    }

    /// Does any emitted element name or attribute under `element` use
    /// `prefix`? A re-declaration of the prefix to a different URI
    /// shadows the binding for that whole subtree. Unprefixed attributes
    /// are in no namespace and never count as uses of the default.
    fn prefix_used_in_output(&self, element: NodeId, prefix: &str, uri: &str) -> bool {
        let doc = self.doc;
        let mut stack = vec![element];
        while let Some(id) = stack.pop() {
            let Some(elem) = doc.element(id) else {
                continue;
            };
            if id != element
                && elem
                    .declarations
                    .iter()
                    .any(|(p, u)| p == prefix && u != uri)
            {
                continue;
            }
            if elem.name.prefix == prefix && self.selected(id) {
                return true;
            }
            for &attr in &elem.attributes {
                let Some(a) = doc.attribute(attr) else {
                    continue;
                };
                if !a.name.prefix.is_empty() && a.name.prefix == prefix && self.selected(attr) {
                    return true;
                }
            }
            for &child in doc.children(id) {
                if doc.element(child).is_some() {
                    stack.push(child);
                }
            }
        }
        false
    }

    /// Walking upward, the nearest selected ancestor that declares
    /// `prefix` decides: a different URI (or no such ancestor) keeps the
    /// declaration, the same URI makes it redundant.
    fn no_selected_ancestor_binds(&self, element: NodeId, prefix: &str, uri: &str) -> bool {
        let doc = self.doc;
        let mut ancestor = doc.parent_element(element);
        while let Some(current) = ancestor {
            if self.selected(current) {
                if let Some(elem) = doc.element(current) {
                    if let Some((_, bound)) =
                        elem.declarations.iter().find(|(p, _)| p == prefix)
                    {
                        return bound != uri;
                    }
                }
            }
            ancestor = doc.parent_element(current);
        }
        true
    }

    fn nearest_selected_ancestor(&self, element: NodeId) -> Option<NodeId> {
        let mut ancestor = self.doc.parent_element(element);
        while let Some(current) = ancestor {
            if self.selected(current) {
                return Some(current);
            }
            ancestor = self.doc.parent_element(current);
        }
        None
    }
}

/// The canonical attribute ordering: unprefixed attributes first, ordered
/// by local name; then by namespace URI, then local name, in code point
/// order.
pub(crate) fn compare_attributes(doc: &Document, a: NodeId, b: NodeId) -> Ordering {
    let (Some(left), Some(right)) = (doc.attribute(a), doc.attribute(b)) else {
        return Ordering::Equal;
    };
    match (left.name.uri.is_empty(), right.name.uri.is_empty()) {
        (true, true) => left.name.local.cmp(&right.name.local),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => left
            .name
            .uri
            .cmp(&right.name.uri)
            .then_with(|| left.name.local.cmp(&right.name.local)),
    }
}
