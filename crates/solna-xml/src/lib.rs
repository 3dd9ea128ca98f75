#![forbid(unsafe_code)]

//! XML tree model for the Solna canonicalization library.
//!
//! Provides an owned, arena-backed DOM that preserves the lexical details
//! canonical output depends on (original prefixes, per-element namespace
//! declarations, attribute types), plus the `NodeSet` type and the minimal
//! XPath subset used to select document subsets.

pub mod document;
pub mod nodeset;
mod parser;
pub mod xpath;

pub use document::{
    AttrType, AttributeData, Document, ElementData, NamespaceData, NodeId, NodeKind, PiData, QName,
};
pub use nodeset::NodeSet;
pub use xpath::XPathContext;
