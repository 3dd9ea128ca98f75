#![forbid(unsafe_code)]

//! Character escaping for canonical output.
//!
//! Per the C14N spec:
//! - Text nodes: `&` → `&amp;`, `<` → `&lt;`, `>` → `&gt;`, `\r` → `&#xD;`
//! - Attribute values: `&` → `&amp;`, `<` → `&lt;`, `"` → `&quot;`,
//!   `\t` → `&#x9;`, `\n` → `&#xA;`, `\r` → `&#xD;` (`>` stays literal)
//! - PI data: `\r` → `&#xD;`
//!
//! Tokenized attribute types additionally collapse runs of spaces and
//! strip leading and trailing spaces before escaping.
//!
//! Everything writes straight to the sink; escapes are pure ASCII, so
//! scanning bytes cannot split a multi-byte sequence.

use std::io::{self, Write};

/// Escape text node content.
pub fn text<W: Write>(out: &mut W, value: &str) -> io::Result<()> {
    let bytes = value.as_bytes();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        let replacement: &[u8] = match b {
            b'&' => b"&amp;",
            b'<' => b"&lt;",
            b'>' => b"&gt;",
            b'\r' => b"&#xD;",
            _ => continue,
        };
        out.write_all(&bytes[start..i])?;
        out.write_all(replacement)?;
        start = i + 1;
    }
    out.write_all(&bytes[start..])
}

/// Escape an attribute value of type CDATA (or of undeclared type, which
/// canonicalization treats the same way). Also used for namespace
/// declaration URIs.
pub fn attribute<W: Write>(out: &mut W, value: &str) -> io::Result<()> {
    let bytes = value.as_bytes();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        let replacement: &[u8] = match b {
            b'\t' => b"&#x9;",
            b'\n' => b"&#xA;",
            b'\r' => b"&#xD;",
            b'"' => b"&quot;",
            b'&' => b"&amp;",
            b'<' => b"&lt;",
            _ => continue,
        };
        out.write_all(&bytes[start..i])?;
        out.write_all(replacement)?;
        start = i + 1;
    }
    out.write_all(&bytes[start..])
}

/// Escape an attribute value of a tokenized type (`ID`, `IDREF`,
/// `NMTOKENS`, …): collapse runs of spaces to one, strip leading and
/// trailing spaces, then apply the attribute escapes. A space is emitted
/// only when it is not the last character, is not followed by another
/// space, and a non-space has already been seen.
pub fn attribute_tokenized<W: Write>(out: &mut W, value: &str) -> io::Result<()> {
    let bytes = value.as_bytes();
    let mut seen_non_space = false;
    let mut start = 0;
    let mut flush = |out: &mut W, from: usize, to: usize| -> io::Result<()> {
        if from < to {
            out.write_all(&bytes[from..to])?;
        }
        Ok(())
    };
    for (i, &b) in bytes.iter().enumerate() {
        if b == b' ' {
            flush(out, start, i)?;
            start = i + 1;
            if i + 1 != bytes.len() && bytes[i + 1] != b' ' && seen_non_space {
                out.write_all(b" ")?;
            }
            continue;
        }
        seen_non_space = true;
        let replacement: &[u8] = match b {
            b'\t' => b"&#x9;",
            b'\n' => b"&#xA;",
            b'\r' => b"&#xD;",
            b'"' => b"&quot;",
            b'&' => b"&amp;",
            b'<' => b"&lt;",
            _ => continue,
        };
        flush(out, start, i)?;
        out.write_all(replacement)?;
        start = i + 1;
    }
    flush(out, start, bytes.len())
}

/// Escape processing instruction data.
pub fn pi<W: Write>(out: &mut W, value: &str) -> io::Result<()> {
    let bytes = value.as_bytes();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'\r' {
            out.write_all(&bytes[start..i])?;
            out.write_all(b"&#xD;")?;
            start = i + 1;
        }
    }
    out.write_all(&bytes[start..])
}
