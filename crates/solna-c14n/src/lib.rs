#![forbid(unsafe_code)]

//! XML Canonicalization (C14N) for the Solna XML library.
//!
//! Implements all four W3C canonicalization variants:
//! - Canonical XML 1.0 (with and without comments)
//! - Exclusive Canonical XML 1.0 (with and without comments)
//!
//! The output of a [`Canonicalizer`] is a byte-exact octet stream suited
//! for feeding a cryptographic digest: UTF-8, `\n` line ends only, no XML
//! declaration, no document type, sorted attributes, pruned namespace
//! declarations.

pub mod escape;
pub mod scope;
mod serializer;

use std::io::Write;

use solna_core::{algorithm, Error, Result};
use solna_xml::{Document, NodeSet, XPathContext};

use serializer::Serializer;

/// The canonicalization algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Canonical XML 1.0
    Inclusive,
    /// Canonical XML 1.0 with comments
    InclusiveWithComments,
    /// Exclusive Canonical XML 1.0
    Exclusive,
    /// Exclusive Canonical XML 1.0 with comments
    ExclusiveWithComments,
}

impl Algorithm {
    /// Get the algorithm URI for this variant.
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Inclusive => algorithm::C14N,
            Self::InclusiveWithComments => algorithm::C14N_WITH_COMMENTS,
            Self::Exclusive => algorithm::EXC_C14N,
            Self::ExclusiveWithComments => algorithm::EXC_C14N_WITH_COMMENTS,
        }
    }

    /// Parse an algorithm from its URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            algorithm::C14N => Some(Self::Inclusive),
            algorithm::C14N_WITH_COMMENTS => Some(Self::InclusiveWithComments),
            algorithm::EXC_C14N => Some(Self::Exclusive),
            algorithm::EXC_C14N_WITH_COMMENTS => Some(Self::ExclusiveWithComments),
            _ => None,
        }
    }

    pub fn with_comments(&self) -> bool {
        matches!(self, Self::InclusiveWithComments | Self::ExclusiveWithComments)
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Exclusive | Self::ExclusiveWithComments)
    }
}

/// Writes documents (or document subsets) onto a sink in canonical form.
///
/// The canonicalizer owns the sink for its lifetime and flushes it at the
/// end of every write; partial output may be present in the sink if a
/// write fails. It never mutates the tree it serializes.
pub struct Canonicalizer<W: Write> {
    out: W,
    with_comments: bool,
    exclusive: bool,
}

impl<W: Write> Canonicalizer<W> {
    /// Create a canonicalizer for the given variant flags.
    pub fn new(out: W, with_comments: bool, exclusive: bool) -> Self {
        Self {
            out,
            with_comments,
            exclusive,
        }
    }

    /// Create a canonicalizer for an algorithm URI. Fails with
    /// [`Error::NullAlgorithm`] when no URI is given and
    /// [`Error::UnknownAlgorithm`] when the URI is not one of the four
    /// supported algorithms.
    pub fn with_algorithm(out: W, algorithm: Option<&str>) -> Result<Self> {
        let uri = algorithm.ok_or(Error::NullAlgorithm)?;
        let algorithm =
            Algorithm::from_uri(uri).ok_or_else(|| Error::UnknownAlgorithm(uri.to_owned()))?;
        Ok(Self::new(
            out,
            algorithm.with_comments(),
            algorithm.is_exclusive(),
        ))
    }

    /// Serialize an entire document.
    pub fn write(&mut self, doc: &Document) -> Result<()> {
        let mut serializer = Serializer::new(
            doc,
            &mut self.out,
            None,
            self.with_comments,
            self.exclusive,
        );
        serializer.write_document()?;
        self.out.flush()?;
        Ok(())
    }

    /// Serialize the document subset identified by a node-set. Only
    /// selected nodes are output; selecting an element does not select
    /// its children, attributes or namespace nodes.
    pub fn write_node_set(&mut self, doc: &Document, nodes: &NodeSet) -> Result<()> {
        let mut serializer = Serializer::new(
            doc,
            &mut self.out,
            Some(nodes),
            self.with_comments,
            self.exclusive,
        );
        serializer.write_document()?;
        self.out.flush()?;
        Ok(())
    }

    /// Serialize the document subset selected by an XPath expression,
    /// resolved against the given namespace bindings. Fails with
    /// [`Error::Query`] when the expression is not valid.
    pub fn write_subset(
        &mut self,
        doc: &Document,
        xpath: &str,
        context: &XPathContext,
    ) -> Result<()> {
        let nodes = doc.query(xpath, context)?;
        self.write_node_set(doc, &nodes)
    }

    /// Consume the canonicalizer and return the sink.
    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Canonicalize a document (or a subset of it) into a byte vector.
pub fn canonicalize(
    doc: &Document,
    algorithm: Algorithm,
    node_set: Option<&NodeSet>,
) -> Result<Vec<u8>> {
    let mut canonicalizer = Canonicalizer::new(
        Vec::new(),
        algorithm.with_comments(),
        algorithm.is_exclusive(),
    );
    match node_set {
        None => canonicalizer.write(doc)?,
        Some(nodes) => canonicalizer.write_node_set(doc, nodes)?,
    }
    Ok(canonicalizer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_uris_round_trip() {
        for algorithm in [
            Algorithm::Inclusive,
            Algorithm::InclusiveWithComments,
            Algorithm::Exclusive,
            Algorithm::ExclusiveWithComments,
        ] {
            assert_eq!(Algorithm::from_uri(algorithm.uri()), Some(algorithm));
        }
        assert_eq!(Algorithm::from_uri("http://example.com/not-c14n"), None);
    }

    #[test]
    fn with_algorithm_rejects_bad_uris() {
        let err = Canonicalizer::with_algorithm(Vec::new(), None).err();
        assert!(matches!(err, Some(Error::NullAlgorithm)));
        let err = Canonicalizer::with_algorithm(Vec::new(), Some("urn:nope")).err();
        assert!(matches!(err, Some(Error::UnknownAlgorithm(_))));
    }

    #[test]
    fn with_algorithm_selects_flags() {
        let doc = Document::parse("<a><!--c--></a>").unwrap();
        let mut plain =
            Canonicalizer::with_algorithm(Vec::new(), Some(solna_core::algorithm::C14N)).unwrap();
        plain.write(&doc).unwrap();
        assert_eq!(plain.into_inner(), b"<a></a>");

        let mut commented = Canonicalizer::with_algorithm(
            Vec::new(),
            Some(solna_core::algorithm::C14N_WITH_COMMENTS),
        )
        .unwrap();
        commented.write(&doc).unwrap();
        assert_eq!(commented.into_inner(), b"<a><!--c--></a>");
    }
}
