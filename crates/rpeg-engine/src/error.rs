//! Error types for grammar loading and parsing.
//!
//! Matcher-internal failure is a plain `Option<usize>`; these types are
//! synthesized only at the boundaries — when a grammar fails to load, or
//! when a top-level parse comes up short.

/// A single grammar diagnostic with position information.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}, column {column}: {message}")]
pub struct Diagnostic {
    pub line: usize,
    pub column: usize,
    pub message: String,
    /// The source line the diagnostic points into.
    pub line_text: String,
}

impl Diagnostic {
    /// Build a diagnostic at a byte offset of `source`.
    pub fn at(source: &str, pos: usize, message: String) -> Self {
        let (line, column) = line_info(source, pos);
        Self {
            line,
            column,
            message,
            line_text: line_text(source, pos).to_string(),
        }
    }
}

/// Grammar errors collected while loading: duplicate definitions, undefined
/// references, arity mismatches, left recursion. All diagnostics found in
/// one phase are reported together.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", .details.iter().map(|d| d.to_string()).collect::<Vec<_>>().join("\n"))]
pub struct LoadError {
    pub details: Vec<Diagnostic>,
}

/// A parse-time error, reported at the furthest position any alternative
/// reached — or at a later action-supplied message position, which wins.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("parse error at line {line}, column {column}: {message}")]
pub struct SyntaxError {
    pub line: usize,
    pub column: usize,
    pub message: String,
    /// The offending source line.
    pub line_text: String,
    /// Literal lexemes that were attempted at the error position, if any.
    pub expected: Vec<String>,
    /// Byte offset of the error in the input.
    pub pos: usize,
}

impl SyntaxError {
    /// Build a syntax error at a byte offset of `input`.
    pub fn at(input: &str, pos: usize, message: String, expected: Vec<String>) -> Self {
        let (line, column) = line_info(input, pos);
        Self {
            line,
            column,
            message,
            line_text: line_text(input, pos).to_string(),
            expected,
            pos,
        }
    }
}

/// 1-based line and column of a byte offset. Columns count bytes.
pub fn line_info(s: &str, pos: usize) -> (usize, usize) {
    let bytes = s.as_bytes();
    let pos = pos.min(bytes.len());
    let mut line = 1;
    let mut line_start = 0;
    for (i, &b) in bytes[..pos].iter().enumerate() {
        if b == b'\n' {
            line += 1;
            line_start = i + 1;
        }
    }
    (line, pos - line_start + 1)
}

/// The full text of the line containing a byte offset, without its newline.
pub fn line_text(s: &str, pos: usize) -> &str {
    let bytes = s.as_bytes();
    let pos = pos.min(bytes.len());
    let start = bytes[..pos]
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |i| i + 1);
    let end = bytes[pos..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |i| pos + i);
    &s[start..end]
}
