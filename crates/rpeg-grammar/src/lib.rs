//! RPEG grammar loader.
//!
//! Turns PEG grammar text into a ready-to-use [`Parser`]: parses the text
//! with the bootstrap meta-grammar, collects duplicate/reference/left-
//! recursion diagnostics, links references, installs `%whitespace` and
//! `%word`, and applies the `%expr` precedence extension.
//!
//! # Example
//!
//! ```
//! let parser = rpeg_grammar::load("S <- 'a' 'b'\n").unwrap();
//! let mut data = ();
//! assert!(parser.parse("ab", &mut data).is_ok());
//! assert!(parser.parse("ax", &mut data).is_err());
//! ```

pub mod ast;
mod bootstrap;
pub mod escape;
mod expr;

use std::any::Any;
use std::rc::Rc;

use rpeg_engine::analysis;
use rpeg_engine::ope::Ope;
use rpeg_engine::{Diagnostic, Grammar, LoadError, SyntaxError, Tracer, Value};

pub use ast::{Ast, AstOptimizer};
pub use rpeg_engine::{self as engine, Rule, Values};

/// Error cap for recovery mode when the caller does not set one.
pub const DEFAULT_MAX_ERRORS: usize = 10;

/// Resynchronization points for recovery mode.
const RECOVERY_DELIMITERS: &[&str] = &[";", "}", "{", "(", ")", ",", "=", "<-"];

/// A loaded, linked grammar plus parse-time options.
pub struct Parser {
    pub grammar: Grammar,
    /// Retry after failures, resynchronizing on delimiters.
    pub recovery_enabled: bool,
    /// Error cap for recovery mode; 0 means [`DEFAULT_MAX_ERRORS`].
    pub max_errors: usize,
    tracer: Option<Box<dyn Tracer>>,
}

impl std::fmt::Debug for Parser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser")
            .field("recovery_enabled", &self.recovery_enabled)
            .field("max_errors", &self.max_errors)
            .finish_non_exhaustive()
    }
}

/// Load a grammar from PEG text.
pub fn load(source: &str) -> Result<Parser, LoadError> {
    load_with_rules(source, Vec::new())
}

/// Load a grammar, merging caller-supplied rules before validation. A
/// leading `~` on a name sets the rule's ignore flag. A supplied rule
/// overrides a textual definition of the same name.
pub fn load_with_rules(
    source: &str,
    rules: Vec<(String, Rc<Ope>)>,
) -> Result<Parser, LoadError> {
    let meta = bootstrap::meta_grammar();
    let mut data = bootstrap::LoaderData::default();
    if let Err(e) = meta.parse(source, &mut data) {
        return Err(LoadError {
            details: vec![Diagnostic {
                line: e.line,
                column: e.column,
                message: e.message,
                line_text: e.line_text,
            }],
        });
    }
    let bootstrap::LoaderData {
        mut grammar,
        duplicates,
        options,
    } = data;

    for (name, ope) in rules {
        let (name, ignore) = match name.strip_prefix('~') {
            Some(rest) => (rest, true),
            None => (name.as_str(), false),
        };
        if !name.is_empty() {
            grammar.set_rule(name, ope, ignore);
        }
    }

    // The start rule is the first one defined, skipping reserved names so
    // a grammar may open with its %whitespace rule.
    let start_id = grammar
        .rules()
        .position(|r| !r.name.starts_with('%'));
    if let Some(id) = start_id {
        grammar.set_start(id);
    }

    let mut details: Vec<Diagnostic> = duplicates
        .iter()
        .map(|(name, pos)| {
            Diagnostic::at(source, *pos, format!("'{name}' is already defined."))
        })
        .collect();
    details.extend(analysis::check_references(&grammar, source));
    if !details.is_empty() {
        return Err(LoadError { details });
    }

    analysis::link_references(&grammar);

    let details = analysis::detect_left_recursion(&grammar, source);
    if !details.is_empty() {
        return Err(LoadError { details });
    }

    grammar.install_whitespace();
    grammar.install_word();

    let details = expr::setup(&mut grammar, &options, source);
    if !details.is_empty() {
        return Err(LoadError { details });
    }

    Ok(Parser {
        grammar,
        recovery_enabled: false,
        max_errors: DEFAULT_MAX_ERRORS,
        tracer: None,
    })
}

impl Parser {
    /// Install a tracer invoked on every rule entry and exit.
    pub fn set_tracer(&mut self, tracer: Box<dyn Tracer>) {
        self.tracer = Some(tracer);
    }

    /// Parse `input` completely and return the start rule's value.
    pub fn parse(&self, input: &str, d: &mut dyn Any) -> Result<Option<Value>, SyntaxError> {
        self.grammar
            .parse_with(input, 0, d, self.tracer.as_deref())
            .1
    }

    /// Parse with best-effort resynchronization: after a failure, skip to
    /// the next meaningful token and retry, collecting every error up to
    /// the cap. Returns the value of the last successful parse.
    pub fn parse_with_recovery(
        &self,
        input: &str,
        d: &mut dyn Any,
    ) -> (Option<Value>, Vec<SyntaxError>) {
        if !self.recovery_enabled {
            return match self.parse(input, d) {
                Ok(v) => (v, Vec::new()),
                Err(e) => (None, vec![e]),
            };
        }

        let max_errors = if self.max_errors == 0 {
            DEFAULT_MAX_ERRORS
        } else {
            self.max_errors
        };
        let mut value = None;
        let mut errors = Vec::new();
        let mut pos = 0;
        while pos < input.len() {
            let (consumed, result) =
                self.grammar
                    .parse_with(input, pos, d, self.tracer.as_deref());
            match result {
                Ok(v) => {
                    value = v;
                    pos += consumed;
                }
                Err(e) => {
                    errors.push(e);
                    if errors.len() >= max_errors {
                        break;
                    }
                    let next = next_meaningful_token(input.as_bytes(), pos + 1);
                    pos = next.max(pos + 1);
                }
            }
        }
        (value, errors)
    }
}

/// Find the next plausible restart point: skip whitespace, then either
/// consume one known delimiter or skip to the next whitespace. Always
/// advances at least one byte past `pos` when input remains.
fn next_meaningful_token(s: &[u8], mut pos: usize) -> usize {
    while pos < s.len() && matches!(s[pos], b' ' | b'\t' | b'\n' | b'\r') {
        pos += 1;
    }
    if pos >= s.len() {
        return pos;
    }
    for delimiter in RECOVERY_DELIMITERS {
        if s[pos..].starts_with(delimiter.as_bytes()) {
            return pos + delimiter.len();
        }
    }
    let start = pos;
    while pos < s.len() && !matches!(s[pos], b' ' | b'\t' | b'\n' | b'\r') {
        pos += 1;
    }
    if pos == start {
        pos + 1
    } else {
        pos
    }
}
