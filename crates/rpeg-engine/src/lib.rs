//! RPEG matcher runtime.
//!
//! The engine half of RPEG: an immutable operator algebra, the per-parse
//! context with its values stack, named rules with semantic actions, the
//! grammar container, and the static analyses (reference resolution,
//! left-recursion detection, token-property inference).
//!
//! Grammars are usually loaded from PEG text by the `rpeg-grammar` crate;
//! building one by hand looks like this:
//!
//! ```
//! use rpeg_engine::ope::{lit, seq};
//! use rpeg_engine::{Grammar, Rule};
//!
//! let mut g = Grammar::new();
//! g.add_rule(Rule::new("Greeting", 0, seq(vec![lit("hi"), lit("!")])));
//! g.link().unwrap();
//!
//! let mut data = ();
//! assert!(g.parse("hi!", &mut data).is_ok());
//! assert!(g.parse("hi?", &mut data).is_err());
//! ```

pub mod analysis;
pub mod context;
pub mod error;
pub mod grammar;
pub mod ope;
pub mod rule;
pub mod values;

pub use context::Tracer;
pub use error::{Diagnostic, LoadError, SyntaxError};
pub use grammar::{Grammar, BINOP_OPTION, EXPR_OPTION, WHITESPACE_RULE, WORD_RULE};
pub use ope::{Assoc, BinOpTable, Ope, RefTarget, RuleId};
pub use rule::{Action, ActionResult, Hook, Rule};
pub use values::{value, Value, Values};
