#![forbid(unsafe_code)]

//! Builds a [`Document`] from XML text.
//!
//! Tokenization is delegated to `xmlparser`; this module layers on top of
//! it the pieces a tree model needs: prefix resolution against a scope
//! stack, entity and character-reference expansion, XML 1.0 attribute-value
//! and line-end normalization, and well-formedness checks the tokenizer
//! leaves to its caller (tag matching, duplicate attributes, unbound
//! prefixes, a single document element).

use solna_core::{ns, Error, Result};
use xmlparser::{ElementEnd, EntityDefinition, Token, Tokenizer};

use crate::document::{
    AttrType, AttributeData, Document, ElementData, NamespaceData, NodeId, NodeKind, PiData, QName,
};

const MAX_ENTITY_DEPTH: u8 = 16;

struct PendingElement {
    prefix: String,
    local: String,
    declarations: Vec<(String, String)>,
    attributes: Vec<(String, String, String)>,
}

struct OpenElement {
    id: NodeId,
    prefix: String,
    local: String,
    /// Bindings this element shadowed, for restoring `in_scope` on close.
    undo: Vec<(String, Option<String>)>,
}

struct ParseState {
    doc: Document,
    /// The bindings currently in scope, without undeclared defaults.
    in_scope: std::collections::BTreeMap<String, String>,
    open: Vec<OpenElement>,
    entities: Vec<(String, String)>,
    pending: Option<PendingElement>,
    seen_root: bool,
}

pub(crate) fn parse(text: &str) -> Result<Document> {
    let mut state = ParseState {
        doc: Document::new(),
        in_scope: std::collections::BTreeMap::new(),
        open: Vec::new(),
        entities: Vec::new(),
        pending: None,
        seen_root: false,
    };

    for token in Tokenizer::from(text) {
        let token = token.map_err(|e| Error::XmlParse(e.to_string()))?;
        process_token(&mut state, token)?;
    }

    if let Some(open) = state.open.last() {
        return Err(Error::XmlParse(format!(
            "unclosed element '{}'",
            qualified(&open.prefix, &open.local)
        )));
    }
    if !state.seen_root {
        return Err(Error::XmlParse("no document element".to_owned()));
    }
    Ok(state.doc)
}

fn process_token(state: &mut ParseState, token: Token<'_>) -> Result<()> {
    match token {
        Token::Declaration { .. } | Token::DtdEnd { .. } => {}
        Token::DtdStart { name, .. } | Token::EmptyDtd { name, .. } => {
            let parent = state.doc.root();
            state
                .doc
                .push_child(parent, NodeKind::DocType(name.as_str().to_owned()));
        }
        Token::EntityDeclaration {
            name, definition, ..
        } => {
            if let EntityDefinition::EntityValue(value) = definition {
                state
                    .entities
                    .push((name.as_str().to_owned(), value.as_str().to_owned()));
            }
        }
        Token::ElementStart { prefix, local, .. } => {
            state.pending = Some(PendingElement {
                prefix: prefix.as_str().to_owned(),
                local: local.as_str().to_owned(),
                declarations: Vec::new(),
                attributes: Vec::new(),
            });
        }
        Token::Attribute {
            prefix,
            local,
            value,
            ..
        } => {
            let value = expand_attribute_value(value.as_str(), &state.entities, 0)?;
            let Some(pending) = state.pending.as_mut() else {
                return Err(Error::XmlParse("attribute outside a start tag".to_owned()));
            };
            let prefix = prefix.as_str();
            let local = local.as_str();
            if prefix == "xmlns" {
                pending.declarations.push((local.to_owned(), value));
            } else if prefix.is_empty() && local == "xmlns" {
                pending.declarations.push((String::new(), value));
            } else {
                pending
                    .attributes
                    .push((prefix.to_owned(), local.to_owned(), value));
            }
        }
        Token::ElementEnd { end, .. } => match end {
            ElementEnd::Open => {
                commit_element(state, false)?;
            }
            ElementEnd::Empty => {
                commit_element(state, true)?;
            }
            ElementEnd::Close(prefix, local) => {
                let Some(open) = state.open.pop() else {
                    return Err(Error::XmlParse(format!(
                        "unexpected closing tag '</{}>'",
                        qualified(prefix.as_str(), local.as_str())
                    )));
                };
                if open.prefix != prefix.as_str() || open.local != local.as_str() {
                    return Err(Error::XmlParse(format!(
                        "expected '</{}>', found '</{}>'",
                        qualified(&open.prefix, &open.local),
                        qualified(prefix.as_str(), local.as_str())
                    )));
                }
                revert_scope(&mut state.in_scope, open.undo);
            }
        },
        Token::Text { text } => {
            let expanded = expand_text(text.as_str(), &state.entities, 0)?;
            append_text(state, expanded)?;
        }
        Token::Cdata { text, .. } => {
            let expanded = normalize_line_ends(text.as_str());
            append_text(state, expanded)?;
        }
        Token::Comment { text, .. } => {
            let parent = current_parent(state);
            state
                .doc
                .push_child(parent, NodeKind::Comment(normalize_line_ends(text.as_str())));
        }
        Token::ProcessingInstruction {
            target, content, ..
        } => {
            let parent = current_parent(state);
            state.doc.push_child(
                parent,
                NodeKind::ProcessingInstruction(PiData {
                    target: target.as_str().to_owned(),
                    data: content.map_or_else(String::new, |c| normalize_line_ends(c.as_str())),
                }),
            );
        }
        _ => {}
    }
    Ok(())
}

fn current_parent(state: &ParseState) -> NodeId {
    state
        .open
        .last()
        .map_or_else(|| state.doc.root(), |open| open.id)
}

fn append_text(state: &mut ParseState, text: String) -> Result<()> {
    if state.open.is_empty() {
        if text.chars().all(|c| matches!(c, ' ' | '\t' | '\n' | '\r')) {
            return Ok(());
        }
        return Err(Error::XmlParse(
            "character data outside the document element".to_owned(),
        ));
    }
    let parent = current_parent(state);
    if let Some(last) = state.doc.last_child(parent) {
        if state.doc.append_to_text(last, &text) {
            return Ok(());
        }
    }
    state.doc.push_child(parent, NodeKind::Text(text));
    Ok(())
}

fn commit_element(state: &mut ParseState, self_closing: bool) -> Result<()> {
    let Some(pending) = state.pending.take() else {
        return Err(Error::XmlParse("malformed start tag".to_owned()));
    };

    check_declarations(&pending.declarations)?;
    let mut undo = Vec::with_capacity(pending.declarations.len());
    for (prefix, uri) in &pending.declarations {
        let previous = if uri.is_empty() {
            state.in_scope.remove(prefix)
        } else {
            state.in_scope.insert(prefix.clone(), uri.clone())
        };
        undo.push((prefix.clone(), previous));
    }

    let uri = resolve_prefix(&state.in_scope, &pending.prefix)?;
    let name = QName::new(&pending.prefix, &pending.local, &uri);
    crate::document::check_qname(&name)?;

    let parent = current_parent(state);
    if state.open.is_empty() {
        if state.seen_root {
            return Err(Error::XmlParse(
                "more than one document element".to_owned(),
            ));
        }
        state.seen_root = true;
    }

    let id = state.doc.push_child(
        parent,
        NodeKind::Element(ElementData {
            name,
            declarations: pending.declarations,
            namespaces: Vec::new(),
            attributes: Vec::new(),
        }),
    );

    materialize_namespaces(&mut state.doc, id, &state.in_scope);

    for (prefix, local, value) in pending.attributes {
        let uri = if prefix.is_empty() {
            String::new()
        } else {
            resolve_prefix(&state.in_scope, &prefix)?
        };
        if state.doc.find_attribute(id, &local, &uri).is_some() {
            return Err(Error::XmlParse(format!(
                "duplicate attribute '{}'",
                qualified(&prefix, &local)
            )));
        }
        let name = QName::new(&prefix, &local, &uri);
        crate::document::check_qname(&name)?;
        state.doc.push_attribute(
            id,
            AttributeData {
                name,
                value,
                ty: AttrType::Undeclared,
            },
        );
    }

    if self_closing {
        revert_scope(&mut state.in_scope, undo);
    } else {
        state.open.push(OpenElement {
            id,
            prefix: pending.prefix,
            local: pending.local,
            undo,
        });
    }
    Ok(())
}

fn revert_scope(
    in_scope: &mut std::collections::BTreeMap<String, String>,
    undo: Vec<(String, Option<String>)>,
) {
    for (prefix, previous) in undo.into_iter().rev() {
        match previous {
            Some(uri) => in_scope.insert(prefix, uri),
            None => in_scope.remove(&prefix),
        };
    }
}

fn check_declarations(declarations: &[(String, String)]) -> Result<()> {
    for (i, (prefix, uri)) in declarations.iter().enumerate() {
        if prefix == "xmlns" {
            return Err(Error::XmlParse(
                "the 'xmlns' prefix cannot be declared".to_owned(),
            ));
        }
        if prefix == "xml" && uri != ns::XML {
            return Err(Error::XmlParse(
                "the 'xml' prefix cannot be rebound".to_owned(),
            ));
        }
        if prefix != "xml" && (uri == ns::XML || uri == ns::XMLNS) {
            return Err(Error::XmlParse(format!(
                "the namespace '{uri}' cannot be bound to '{prefix}'"
            )));
        }
        if uri.is_empty() && !prefix.is_empty() {
            return Err(Error::XmlParse(format!(
                "the prefix '{prefix}' cannot be undeclared"
            )));
        }
        if declarations[..i].iter().any(|(p, _)| p == prefix) {
            return Err(Error::XmlParse(format!(
                "duplicate namespace declaration for '{prefix}'"
            )));
        }
    }
    Ok(())
}

fn resolve_prefix(
    in_scope: &std::collections::BTreeMap<String, String>,
    prefix: &str,
) -> Result<String> {
    if prefix == "xml" {
        return Ok(ns::XML.to_owned());
    }
    if let Some(uri) = in_scope.get(prefix) {
        return Ok(uri.clone());
    }
    if prefix.is_empty() {
        Ok(String::new())
    } else {
        Err(Error::XmlParse(format!(
            "prefix '{prefix}' is not bound to a namespace"
        )))
    }
}

/// Create this element's namespace nodes: one per in-scope binding, in
/// prefix order, with the implicit `xml` binding always present.
fn materialize_namespaces(
    doc: &mut Document,
    element: NodeId,
    in_scope: &std::collections::BTreeMap<String, String>,
) {
    let mut bindings = in_scope.clone();
    bindings.insert("xml".to_owned(), ns::XML.to_owned());
    for (prefix, uri) in bindings {
        doc.push_namespace(element, NamespaceData { prefix, uri });
    }
}

fn qualified(prefix: &str, local: &str) -> String {
    if prefix.is_empty() {
        local.to_owned()
    } else {
        format!("{prefix}:{local}")
    }
}

// ── reference expansion and normalization ────────────────────────────

/// Expand character and entity references in text content and normalize
/// line ends (CRLF and lone CR become LF, XML 1.0 §2.11).
fn expand_text(raw: &str, entities: &[(String, String)], depth: u8) -> Result<String> {
    if depth > MAX_ENTITY_DEPTH {
        return Err(Error::XmlParse("entity reference loop".to_owned()));
    }
    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' => {
                out.push('\n');
                i += if bytes.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
            }
            b'&' => {
                i = expand_reference(raw, i, entities, depth, false, &mut out)?;
            }
            b'<' if depth > 0 => {
                // Entities whose replacement text contains markup are not
                // supported; references to them fail instead of leaking
                // the markup as character data.
                return Err(Error::XmlParse(
                    "markup in entity replacement text is not supported".to_owned(),
                ));
            }
            _ => {
                let start = i;
                while i < bytes.len()
                    && bytes[i] != b'\r'
                    && bytes[i] != b'&'
                    && !(depth > 0 && bytes[i] == b'<')
                {
                    i += 1;
                }
                out.push_str(&raw[start..i]);
            }
        }
    }
    Ok(out)
}

/// Expand references in an attribute value and apply XML 1.0 §3.3.3
/// normalization: literal tab, LF and CR become spaces; characters that
/// arrive via character references are preserved.
fn expand_attribute_value(raw: &str, entities: &[(String, String)], depth: u8) -> Result<String> {
    if depth > MAX_ENTITY_DEPTH {
        return Err(Error::XmlParse("entity reference loop".to_owned()));
    }
    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\t' | b'\n' => {
                out.push(' ');
                i += 1;
            }
            b'\r' => {
                out.push(' ');
                i += if bytes.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
            }
            b'<' => {
                return Err(Error::XmlParse(
                    "'<' is not allowed in attribute values".to_owned(),
                ));
            }
            b'&' => {
                i = expand_reference(raw, i, entities, depth, true, &mut out)?;
            }
            _ => {
                let start = i;
                while i < bytes.len() && !matches!(bytes[i], b'\t' | b'\n' | b'\r' | b'<' | b'&') {
                    i += 1;
                }
                out.push_str(&raw[start..i]);
            }
        }
    }
    Ok(out)
}

/// Expand the reference starting at byte `at` (which holds `&`), append
/// the replacement to `out` and return the index just past the `;`.
fn expand_reference(
    raw: &str,
    at: usize,
    entities: &[(String, String)],
    depth: u8,
    in_attribute: bool,
    out: &mut String,
) -> Result<usize> {
    let rest = &raw[at + 1..];
    let Some(semi) = rest.find(';') else {
        return Err(Error::XmlParse("unterminated reference".to_owned()));
    };
    let name = &rest[..semi];
    let end = at + 1 + semi + 1;

    if let Some(code) = name.strip_prefix('#') {
        let value = if let Some(hex) = code.strip_prefix('x') {
            u32::from_str_radix(hex, 16)
        } else {
            code.parse::<u32>()
        }
        .map_err(|_| Error::XmlParse(format!("invalid character reference '&{name};'")))?;
        let c = char::from_u32(value)
            .filter(|&c| is_xml_char(c))
            .ok_or_else(|| {
                Error::XmlParse(format!("invalid character reference '&{name};'"))
            })?;
        out.push(c);
        return Ok(end);
    }

    let replacement = match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        _ => {
            let Some((_, value)) = entities.iter().find(|(n, _)| n == name) else {
                return Err(Error::XmlParse(format!("undefined entity '&{name};'")));
            };
            let expanded = if in_attribute {
                expand_attribute_value(value, entities, depth + 1)?
            } else {
                expand_text(value, entities, depth + 1)?
            };
            out.push_str(&expanded);
            return Ok(end);
        }
    };
    out.push_str(replacement);
    Ok(end)
}

fn normalize_line_ends(raw: &str) -> String {
    if !raw.contains('\r') {
        return raw.to_owned();
    }
    raw.replace("\r\n", "\n").replace('\r', "\n")
}

fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r') || (c >= ' ' && c != '\u{FFFE}' && c != '\u{FFFF}')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::NodeKind;

    #[test]
    fn prefixes_survive() {
        let doc = Document::parse(r#"<p:a xmlns:p="http://p/" p:x="1"/>"#).unwrap();
        let a = doc.root_element().unwrap();
        let elem = doc.element(a).unwrap();
        assert_eq!(elem.name.prefix, "p");
        assert_eq!(elem.name.local, "a");
        assert_eq!(elem.name.uri, "http://p/");
        let attr = doc.attribute(elem.attributes[0]).unwrap();
        assert_eq!(attr.name.prefix, "p");
        assert_eq!(attr.name.uri, "http://p/");
    }

    #[test]
    fn references_expand() {
        let doc = Document::parse("<a>x&amp;y&#x41;&#66;</a>").unwrap();
        let a = doc.root_element().unwrap();
        match doc.kind(doc.children(a)[0]) {
            Some(NodeKind::Text(t)) => assert_eq!(t, "x&yAB"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn internal_entities_expand() {
        let doc =
            Document::parse("<!DOCTYPE a [<!ENTITY who \"world\">]><a>hello &who;</a>").unwrap();
        let a = doc.root_element().unwrap();
        match doc.kind(doc.children(a)[0]) {
            Some(NodeKind::Text(t)) => assert_eq!(t, "hello world"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn attribute_value_normalization() {
        // Literal whitespace collapses to spaces; character references keep
        // the referenced character.
        let doc = Document::parse("<a x='one\ntwo' y='a&#10;b'/>").unwrap();
        let a = doc.root_element().unwrap();
        let x = doc.find_attribute(a, "x", "").unwrap();
        assert_eq!(doc.attribute(x).unwrap().value, "one two");
        let y = doc.find_attribute(a, "y", "").unwrap();
        assert_eq!(doc.attribute(y).unwrap().value, "a\nb");
    }

    #[test]
    fn text_line_ends_normalize() {
        let doc = Document::parse("<a>one\r\ntwo\rthree&#13;</a>").unwrap();
        let a = doc.root_element().unwrap();
        match doc.kind(doc.children(a)[0]) {
            Some(NodeKind::Text(t)) => assert_eq!(t, "one\ntwo\nthree\r"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn adjacent_text_and_cdata_merge() {
        let doc = Document::parse("<a>one<![CDATA[ & two]]> three</a>").unwrap();
        let a = doc.root_element().unwrap();
        assert_eq!(doc.children(a).len(), 1);
        match doc.kind(doc.children(a)[0]) {
            Some(NodeKind::Text(t)) => assert_eq!(t, "one & two three"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_attributes_rejected() {
        let err = Document::parse(
            r#"<a xmlns:p="http://p/" xmlns:q="http://p/" p:x="1" q:x="2"/>"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate attribute"));
    }

    #[test]
    fn unbound_prefix_rejected() {
        assert!(Document::parse("<p:a/>").is_err());
        assert!(Document::parse("<a p:x='1'/>").is_err());
    }

    #[test]
    fn default_namespace_undeclaration() {
        let doc = Document::parse(r#"<p xmlns="http://p/"><c xmlns=""/></p>"#).unwrap();
        let p = doc.root_element().unwrap();
        let c = doc.children(p)[0];
        assert_eq!(doc.element(c).unwrap().name.uri, "");
        assert_eq!(doc.in_scope_uri(c, ""), None);
        assert_eq!(doc.in_scope_uri(p, ""), Some("http://p/"));
    }

    #[test]
    fn prolog_and_epilog_nodes() {
        let doc =
            Document::parse("<?pi data?><!--hi--><r/><!--bye-->").unwrap();
        let kinds: Vec<&str> = doc
            .children(doc.root())
            .iter()
            .map(|&id| match doc.kind(id) {
                Some(NodeKind::ProcessingInstruction(_)) => "pi",
                Some(NodeKind::Comment(_)) => "comment",
                Some(NodeKind::Element(_)) => "element",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, ["pi", "comment", "element", "comment"]);
    }

    #[test]
    fn two_document_elements_rejected() {
        assert!(Document::parse("<a/><b/>").is_err());
    }
}
