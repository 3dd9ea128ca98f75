#![forbid(unsafe_code)]

//! Namespace scope tracking for the serializer.
//!
//! A stack of small per-element maps. `push_context` on element entry,
//! `pop_context` on exit; `declare_prefix` records a binding on the top
//! frame; `uri` walks the stack from the top. The `xml` and `xmlns`
//! prefixes are permanent synthetic bindings. An empty-string URI bound
//! to the empty prefix means "no default namespace in scope"; a prefix
//! that was never bound yields `None`.

use solna_core::ns;

#[derive(Debug)]
pub struct NamespaceScope {
    frames: Vec<Vec<(String, String)>>,
}

impl NamespaceScope {
    pub fn new() -> Self {
        Self {
            frames: vec![Vec::new()],
        }
    }

    pub fn push_context(&mut self) {
        self.frames.push(Vec::new());
    }

    pub fn pop_context(&mut self) {
        // The base frame outlives every element.
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn declare_prefix(&mut self, prefix: &str, uri: &str) {
        if let Some(frame) = self.frames.last_mut() {
            if let Some(entry) = frame.iter_mut().find(|(p, _)| p == prefix) {
                entry.1 = uri.to_owned();
            } else {
                frame.push((prefix.to_owned(), uri.to_owned()));
            }
        }
    }

    /// The innermost binding for `prefix`, or `None` if it was never
    /// declared.
    pub fn uri(&self, prefix: &str) -> Option<&str> {
        match prefix {
            "xml" => Some(ns::XML),
            "xmlns" => Some(ns::XMLNS),
            _ => self
                .frames
                .iter()
                .rev()
                .find_map(|frame| frame.iter().rev().find(|(p, _)| p == prefix))
                .map(|(_, uri)| uri.as_str()),
        }
    }
}

impl Default for NamespaceScope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn innermost_binding_wins() {
        let mut scope = NamespaceScope::new();
        scope.push_context();
        scope.declare_prefix("p", "http://outer/");
        scope.push_context();
        assert_eq!(scope.uri("p"), Some("http://outer/"));
        scope.declare_prefix("p", "http://inner/");
        assert_eq!(scope.uri("p"), Some("http://inner/"));
        scope.pop_context();
        assert_eq!(scope.uri("p"), Some("http://outer/"));
        scope.pop_context();
        assert_eq!(scope.uri("p"), None);
    }

    #[test]
    fn reserved_prefixes_are_permanent() {
        let scope = NamespaceScope::new();
        assert_eq!(scope.uri("xml"), Some(ns::XML));
        assert_eq!(scope.uri("xmlns"), Some(ns::XMLNS));
    }

    #[test]
    fn empty_default_is_a_binding() {
        let mut scope = NamespaceScope::new();
        assert_eq!(scope.uri(""), None);
        scope.push_context();
        scope.declare_prefix("", "");
        assert_eq!(scope.uri(""), Some(""));
    }
}
