#![forbid(unsafe_code)]

/// Errors produced by the Solna XML canonicalization library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    #[error("unknown canonicalization algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("no canonicalization algorithm provided")]
    NullAlgorithm,

    #[error("invalid XPath expression: {0}")]
    Query(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
