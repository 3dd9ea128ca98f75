#![forbid(unsafe_code)]

//! Minimal XPath subset for subset canonicalization.
//!
//! Supports only what node-set selection needs: unions of location paths
//! over the child, descendant, descendant-or-self, self, parent, ancestor,
//! ancestor-or-self, attribute and namespace axes, with `*`, QName,
//! `prefix:*` and kind node tests, and the `//`, `@`, `.` and `..`
//! abbreviations. Everything else — predicates included — is rejected
//! with [`Error::Query`].
//!
//! Results are returned in document order, with an element's namespace
//! nodes immediately after it, then its attributes, then its children.

use std::collections::{HashMap, HashSet};

use solna_core::{ns, Error, Result};

use crate::document::{Document, NodeId, NodeKind};
use crate::nodeset::NodeSet;

/// Prefix bindings used to resolve prefixed name tests in expressions.
/// The `xml` prefix is always bound.
#[derive(Debug, Clone)]
pub struct XPathContext {
    bindings: HashMap<String, String>,
}

impl XPathContext {
    pub fn new() -> Self {
        let mut bindings = HashMap::new();
        bindings.insert("xml".to_owned(), ns::XML.to_owned());
        Self { bindings }
    }

    pub fn bind(&mut self, prefix: &str, uri: &str) {
        self.bindings.insert(prefix.to_owned(), uri.to_owned());
    }

    pub fn uri(&self, prefix: &str) -> Option<&str> {
        self.bindings.get(prefix).map(String::as_str)
    }
}

impl Default for XPathContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    SelfAxis,
    Parent,
    Ancestor,
    AncestorOrSelf,
    Attribute,
    Namespace,
}

/// The node type a `*` or name test selects on a given axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Principal {
    Element,
    Attribute,
    Namespace,
}

impl Axis {
    fn principal(self) -> Principal {
        match self {
            Axis::Attribute => Principal::Attribute,
            Axis::Namespace => Principal::Namespace,
            _ => Principal::Element,
        }
    }
}

#[derive(Debug, Clone)]
enum NodeTest {
    /// `node()`
    Node,
    /// `text()`
    Text,
    /// `comment()`
    Comment,
    /// `processing-instruction()`
    Pi,
    /// `*`
    Wildcard,
    /// A QName test. `uri` is `None` for an unprefixed test (no
    /// namespace); on the namespace axis `local` matches the prefix.
    Name { uri: Option<String>, local: String },
    /// `prefix:*`
    AnyInNamespace { uri: String },
}

#[derive(Debug, Clone)]
struct Step {
    axis: Axis,
    test: NodeTest,
    /// Step was preceded by `//` (descendant-or-self::node() expansion).
    descendant_or_self: bool,
}

pub(crate) fn query(doc: &Document, expr: &str, context: &XPathContext) -> Result<NodeSet> {
    let expr = strip_outer_parens(expr.trim());
    if expr.is_empty() {
        return Err(Error::Query("empty expression".to_owned()));
    }

    let mut selected: HashSet<NodeId> = HashSet::new();
    for part in expr.split('|') {
        let steps = parse_path(part.trim(), context)?;
        selected.extend(eval_path(doc, &steps));
    }
    Ok(document_order(doc, &selected))
}

/// Strip redundant parentheses around the whole expression, e.g.
/// `(//. | //@* | //namespace::*)`.
fn strip_outer_parens(expr: &str) -> &str {
    let mut current = expr;
    while current.starts_with('(') && current.ends_with(')') {
        let inner = &current[1..current.len() - 1];
        // Only strip if the parens actually match each other.
        let mut depth = 0i32;
        let mut matched = true;
        for c in inner.chars() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 {
                        matched = false;
                        break;
                    }
                }
                _ => {}
            }
        }
        if !matched || depth != 0 {
            break;
        }
        current = inner.trim();
    }
    current
}

fn parse_path(path: &str, context: &XPathContext) -> Result<Vec<Step>> {
    if path.is_empty() {
        return Err(Error::Query("empty location path".to_owned()));
    }

    let mut steps = Vec::new();
    let mut pending_dos = false;
    let mut rest = path;

    if let Some(after) = rest.strip_prefix("//") {
        pending_dos = true;
        rest = after;
    } else if let Some(after) = rest.strip_prefix('/') {
        if after.is_empty() {
            // Bare `/` selects the root node.
            return Ok(steps);
        }
        rest = after;
    }

    loop {
        let (token, remainder, next_dos) = match rest.find('/') {
            None => (rest, "", false),
            Some(i) => {
                let after = &rest[i + 1..];
                if let Some(after) = after.strip_prefix('/') {
                    (&rest[..i], after, true)
                } else {
                    (&rest[..i], after, false)
                }
            }
        };
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::Query(format!("empty step in '{path}'")));
        }
        steps.push(parse_step(token, pending_dos, context)?);
        if remainder.is_empty() {
            if rest.contains('/') && rest.ends_with('/') {
                return Err(Error::Query(format!("trailing '/' in '{path}'")));
            }
            break;
        }
        pending_dos = next_dos;
        rest = remainder;
    }
    Ok(steps)
}

fn parse_step(token: &str, descendant_or_self: bool, context: &XPathContext) -> Result<Step> {
    if token == "." {
        return Ok(Step {
            axis: Axis::SelfAxis,
            test: NodeTest::Node,
            descendant_or_self,
        });
    }
    if token == ".." {
        return Ok(Step {
            axis: Axis::Parent,
            test: NodeTest::Node,
            descendant_or_self,
        });
    }
    if let Some(rest) = token.strip_prefix('@') {
        return Ok(Step {
            axis: Axis::Attribute,
            test: parse_node_test(rest, Axis::Attribute, context)?,
            descendant_or_self,
        });
    }
    if let Some((axis_name, rest)) = token.split_once("::") {
        let axis = match axis_name.trim() {
            "child" => Axis::Child,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "self" => Axis::SelfAxis,
            "parent" => Axis::Parent,
            "ancestor" => Axis::Ancestor,
            "ancestor-or-self" => Axis::AncestorOrSelf,
            "attribute" => Axis::Attribute,
            "namespace" => Axis::Namespace,
            other => {
                return Err(Error::Query(format!("unsupported axis '{other}'")));
            }
        };
        return Ok(Step {
            axis,
            test: parse_node_test(rest.trim(), axis, context)?,
            descendant_or_self,
        });
    }
    Ok(Step {
        axis: Axis::Child,
        test: parse_node_test(token, Axis::Child, context)?,
        descendant_or_self,
    })
}

fn parse_node_test(test: &str, axis: Axis, context: &XPathContext) -> Result<NodeTest> {
    match test {
        "*" => return Ok(NodeTest::Wildcard),
        "node()" => return Ok(NodeTest::Node),
        "text()" => return Ok(NodeTest::Text),
        "comment()" => return Ok(NodeTest::Comment),
        "processing-instruction()" => return Ok(NodeTest::Pi),
        _ => {}
    }
    if test.contains(['(', ')', '[', ']']) {
        return Err(Error::Query(format!("unsupported node test '{test}'")));
    }
    if let Some((prefix, local)) = test.split_once(':') {
        if axis == Axis::Namespace {
            return Err(Error::Query(format!(
                "prefixed name test '{test}' on the namespace axis"
            )));
        }
        let uri = context
            .uri(prefix)
            .ok_or_else(|| Error::Query(format!("prefix '{prefix}' is not bound")))?
            .to_owned();
        if local == "*" {
            return Ok(NodeTest::AnyInNamespace { uri });
        }
        check_ncname(local)?;
        Ok(NodeTest::Name {
            uri: Some(uri),
            local: local.to_owned(),
        })
    } else {
        check_ncname(test)?;
        Ok(NodeTest::Name {
            uri: None,
            local: test.to_owned(),
        })
    }
}

fn check_ncname(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.') || !c.is_ascii());
    if valid {
        Ok(())
    } else {
        Err(Error::Query(format!("invalid name test '{name}'")))
    }
}

fn eval_path(doc: &Document, steps: &[Step]) -> HashSet<NodeId> {
    let mut current: HashSet<NodeId> = HashSet::new();
    current.insert(doc.root());
    for step in steps {
        let mut next = HashSet::new();
        for &node in &current {
            if step.descendant_or_self {
                for base in doc.descendants(node) {
                    apply_axis(doc, base, step, &mut next);
                }
            } else {
                apply_axis(doc, node, step, &mut next);
            }
        }
        current = next;
    }
    current
}

fn apply_axis(doc: &Document, node: NodeId, step: &Step, out: &mut HashSet<NodeId>) {
    let principal = step.axis.principal();
    let mut visit = |id: NodeId| {
        if test_matches(doc, id, &step.test, principal) {
            out.insert(id);
        }
    };
    match step.axis {
        Axis::Child => {
            for &child in doc.children(node) {
                visit(child);
            }
        }
        Axis::Descendant => {
            for id in doc.descendants(node).skip(1) {
                visit(id);
            }
        }
        Axis::DescendantOrSelf => {
            for id in doc.descendants(node) {
                visit(id);
            }
        }
        Axis::SelfAxis => visit(node),
        Axis::Parent => {
            if let Some(parent) = doc.parent(node) {
                visit(parent);
            }
        }
        Axis::Ancestor => {
            let mut current = doc.parent(node);
            while let Some(id) = current {
                visit(id);
                current = doc.parent(id);
            }
        }
        Axis::AncestorOrSelf => {
            let mut current = Some(node);
            while let Some(id) = current {
                visit(id);
                current = doc.parent(id);
            }
        }
        Axis::Attribute => {
            if let Some(elem) = doc.element(node) {
                for &attr in &elem.attributes {
                    visit(attr);
                }
            }
        }
        Axis::Namespace => {
            if let Some(elem) = doc.element(node) {
                for &namespace in &elem.namespaces {
                    visit(namespace);
                }
            }
        }
    }
}

fn test_matches(doc: &Document, id: NodeId, test: &NodeTest, principal: Principal) -> bool {
    match test {
        NodeTest::Node => true,
        NodeTest::Text => matches!(doc.kind(id), Some(NodeKind::Text(_))),
        NodeTest::Comment => matches!(doc.kind(id), Some(NodeKind::Comment(_))),
        NodeTest::Pi => matches!(doc.kind(id), Some(NodeKind::ProcessingInstruction(_))),
        NodeTest::Wildcard => match principal {
            Principal::Element => doc.element(id).is_some(),
            Principal::Attribute => doc.attribute(id).is_some(),
            Principal::Namespace => doc.namespace(id).is_some(),
        },
        NodeTest::Name { uri, local } => match principal {
            Principal::Element => doc.element(id).is_some_and(|e| {
                e.name.local == *local
                    && match uri {
                        Some(u) => e.name.uri == *u,
                        None => e.name.uri.is_empty(),
                    }
            }),
            Principal::Attribute => doc.attribute(id).is_some_and(|a| {
                a.name.local == *local
                    && match uri {
                        Some(u) => a.name.uri == *u,
                        None => a.name.uri.is_empty(),
                    }
            }),
            Principal::Namespace => doc.namespace(id).is_some_and(|n| n.prefix == *local),
        },
        NodeTest::AnyInNamespace { uri } => match principal {
            Principal::Element => doc.element(id).is_some_and(|e| e.name.uri == *uri),
            Principal::Attribute => doc.attribute(id).is_some_and(|a| a.name.uri == *uri),
            Principal::Namespace => false,
        },
    }
}

/// Order selected nodes by document position: each element is followed by
/// its namespace nodes, then its attributes, then its children.
fn document_order(doc: &Document, selected: &HashSet<NodeId>) -> NodeSet {
    let mut out = Vec::with_capacity(selected.len());
    let mut stack = vec![doc.root()];
    while let Some(id) = stack.pop() {
        if selected.contains(&id) {
            out.push(id);
        }
        if let Some(elem) = doc.element(id) {
            for &namespace in &elem.namespaces {
                if selected.contains(&namespace) {
                    out.push(namespace);
                }
            }
            for &attr in &elem.attributes {
                if selected.contains(&attr) {
                    out.push(attr);
                }
            }
        }
        stack.extend(doc.children(id).iter().rev());
    }
    NodeSet::from_vec(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(doc: &Document, set: &NodeSet) -> Vec<String> {
        set.iter()
            .map(|id| match doc.kind(id) {
                Some(NodeKind::Document) => "#doc".to_owned(),
                Some(NodeKind::Element(e)) => e.name.local.clone(),
                Some(NodeKind::Attribute(a)) => format!("@{}", a.name.local),
                Some(NodeKind::Namespace(n)) => format!("ns:{}", n.prefix),
                Some(NodeKind::Text(_)) => "#text".to_owned(),
                Some(NodeKind::Comment(_)) => "#comment".to_owned(),
                Some(NodeKind::ProcessingInstruction(_)) => "#pi".to_owned(),
                Some(NodeKind::DocType(_)) => "#doctype".to_owned(),
                None => "#invalid".to_owned(),
            })
            .collect()
    }

    #[test]
    fn descendant_elements() {
        let doc = Document::parse("<a><b><c/></b><b/></a>").unwrap();
        let set = doc.query("//b", &XPathContext::new()).unwrap();
        assert_eq!(names(&doc, &set), ["b", "b"]);
    }

    #[test]
    fn union_in_document_order() {
        let doc = Document::parse(r#"<a x="1"><b y="2"/>t</a>"#).unwrap();
        let set = doc.query("//@* | //b | //text()", &XPathContext::new()).unwrap();
        assert_eq!(names(&doc, &set), ["@x", "b", "@y", "#text"]);
    }

    #[test]
    fn identity_expression() {
        let doc = Document::parse(r#"<a xmlns:p="http://p/" x="1"><b/></a>"#).unwrap();
        let set = doc
            .query("(//. | //@* | //namespace::*)", &XPathContext::new())
            .unwrap();
        assert_eq!(
            names(&doc, &set),
            ["#doc", "a", "ns:p", "ns:xml", "@x", "b", "ns:p", "ns:xml"]
        );
    }

    #[test]
    fn prefixed_name_test() {
        let doc = Document::parse(r#"<a xmlns:p="http://p/"><p:b/><b/></a>"#).unwrap();
        let mut ctx = XPathContext::new();
        ctx.bind("q", "http://p/");
        let set = doc.query("//q:b", &ctx).unwrap();
        assert_eq!(set.len(), 1);
        let unbound = doc.query("//nope:b", &ctx);
        assert!(matches!(unbound, Err(Error::Query(_))));
    }

    #[test]
    fn namespace_axis_by_prefix() {
        let doc = Document::parse(r#"<a xmlns:p="http://p/"><b/></a>"#).unwrap();
        let set = doc.query("//b/namespace::p", &XPathContext::new()).unwrap();
        assert_eq!(names(&doc, &set), ["ns:p"]);
    }

    #[test]
    fn parent_and_ancestor() {
        let doc = Document::parse("<a><b><c/></b></a>").unwrap();
        let set = doc.query("//c/ancestor::*", &XPathContext::new()).unwrap();
        assert_eq!(names(&doc, &set), ["a", "b"]);
        let set = doc.query("//c/..", &XPathContext::new()).unwrap();
        assert_eq!(names(&doc, &set), ["b"]);
    }

    #[test]
    fn unsupported_syntax_is_a_query_error() {
        let doc = Document::parse("<a/>").unwrap();
        let ctx = XPathContext::new();
        for expr in [
            "//a[1]",
            "//a/following-sibling::b",
            "count(//a)",
            "//a/",
            "",
            "//a//",
        ] {
            assert!(
                matches!(doc.query(expr, &ctx), Err(Error::Query(_))),
                "expected a query error for {expr:?}"
            );
        }
    }
}
