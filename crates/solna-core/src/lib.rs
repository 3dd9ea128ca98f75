#![forbid(unsafe_code)]

//! Shared error type and constants for the Solna XML canonicalization
//! library.

pub mod algorithm;
pub mod error;
pub mod ns;

pub use error::{Error, Result};
