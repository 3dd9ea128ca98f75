#![forbid(unsafe_code)]

//! Canonicalization algorithm URI constants.
//!
//! Each constant is the canonical URI string by which W3C specifications
//! identify the algorithm.

/// Canonical XML 1.0 (omits comments)
pub const C14N: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";

/// Canonical XML 1.0 with comments
pub const C14N_WITH_COMMENTS: &str =
    "http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments";

/// Exclusive Canonical XML 1.0 (omits comments)
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

/// Exclusive Canonical XML 1.0 with comments
pub const EXC_C14N_WITH_COMMENTS: &str =
    "http://www.w3.org/2001/10/xml-exc-c14n#WithComments";
