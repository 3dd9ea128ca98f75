#![forbid(unsafe_code)]

//! Reserved XML namespace constants.

/// The namespace permanently bound to the `xml` prefix.
pub const XML: &str = "http://www.w3.org/XML/1998/namespace";

/// The namespace permanently bound to the `xmlns` prefix.
pub const XMLNS: &str = "http://www.w3.org/2000/xmlns/";
