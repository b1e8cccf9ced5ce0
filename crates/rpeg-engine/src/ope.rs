//! The operator algebra.
//!
//! A grammar compiles to an immutable tree of `Ope` nodes shared through
//! `Rc`. Rules are referenced by index into the grammar's rule vector, so
//! the linked operator graph contains no owning cycles. Matching is a
//! single recursive function over the sum type: a `Some(len)` result is
//! success (bytes consumed), `None` is failure, and the caller's position
//! never moves on failure because positions are passed by value.

use std::any::Any;
use std::cell::{Cell, OnceCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::context::Context;

/// Index of a rule in its grammar.
pub type RuleId = usize;

/// Resolution state of a reference, written once during linking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTarget {
    Unresolved,
    /// A grammar rule.
    Rule(RuleId),
    /// A formal parameter of the enclosing macro, by position.
    Param(usize),
}

/// Associativity of a binary operator level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assoc {
    Left,
    Right,
}

/// Binary-operator table for precedence climbing: lexeme → (level, assoc).
/// Levels are numbered from 1 in declaration order; higher binds tighter.
#[derive(Debug, Clone, Default)]
pub struct BinOpTable {
    map: HashMap<String, (u8, Assoc)>,
}

impl BinOpTable {
    pub fn insert(&mut self, lexeme: &str, level: u8, assoc: Assoc) {
        self.map.insert(lexeme.to_string(), (level, assoc));
    }

    pub fn get(&self, lexeme: &str) -> Option<(u8, Assoc)> {
        self.map.get(lexeme).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// All lexemes, longest first (so `<<` is attempted before `<`), ties
    /// broken alphabetically for determinism.
    pub fn lexemes(&self) -> Vec<String> {
        let mut ls: Vec<String> = self.map.keys().cloned().collect();
        ls.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        ls
    }
}

/// A matcher node.
#[derive(Debug)]
pub enum Ope {
    /// Literal byte match, optionally ASCII case-insensitive. `is_word`
    /// caches whether the literal is itself a complete `%word` match.
    Lit {
        text: Vec<u8>,
        ignore_case: bool,
        is_word: OnceCell<bool>,
    },
    /// Single-byte membership in a canonical range list.
    Cls { ranges: Vec<(u8, u8)> },
    /// Any single byte.
    Dot,
    /// Ordered conjunction.
    Seq(Vec<Rc<Ope>>),
    /// Prioritized choice — first success wins, no later backtracking.
    Cho(Vec<Rc<Ope>>),
    /// Zero or more, greedy.
    Zom(Rc<Ope>),
    /// One or more, greedy.
    Oom(Rc<Ope>),
    /// Optional.
    Opt(Rc<Ope>),
    /// Positive lookahead.
    Apd(Rc<Ope>),
    /// Negative lookahead.
    Npd(Rc<Ope>),
    /// Token boundary — exposes the matched substring as a token.
    Tok(Rc<Ope>),
    /// Match but suppress the semantic value.
    Ign(Rc<Ope>),
    /// Reference to a rule or macro parameter.
    Ref {
        name: String,
        args: Vec<Rc<Ope>>,
        pos: usize,
        target: Cell<RefTarget>,
    },
    /// Whitespace skipper wrapper; guards against skipping inside itself.
    Wsp(Rc<Ope>),
    /// Precedence-climbing expression matcher installed by the `%expr`
    /// extension. `rule` is the rewritten rule, whose action combines one
    /// `[left, op, right]` frame per operator application.
    Prec {
        atom: Rc<Ope>,
        binop: Rc<Ope>,
        table: BinOpTable,
        rule: RuleId,
    },
}

// --- Constructors -----------------------------------------------------------

pub fn lit(s: &str) -> Rc<Ope> {
    lit_bytes(s.as_bytes().to_vec(), false)
}

/// ASCII case-insensitive literal.
pub fn liti(s: &str) -> Rc<Ope> {
    lit_bytes(s.as_bytes().to_vec(), true)
}

pub fn lit_bytes(text: Vec<u8>, ignore_case: bool) -> Rc<Ope> {
    Rc::new(Ope::Lit {
        text,
        ignore_case,
        is_word: OnceCell::new(),
    })
}

/// Character class from an escape-resolved spec such as `a-zA-Z_%`.
/// A `-` between two bytes forms a range; elsewhere it matches itself.
pub fn cls(spec: &[u8]) -> Rc<Ope> {
    let mut ranges = Vec::new();
    let mut i = 0;
    while i < spec.len() {
        if i + 2 < spec.len() && spec[i + 1] == b'-' {
            ranges.push((spec[i], spec[i + 2]));
            i += 3;
        } else {
            ranges.push((spec[i], spec[i]));
            i += 1;
        }
    }
    Rc::new(Ope::Cls { ranges })
}

pub fn dot() -> Rc<Ope> {
    Rc::new(Ope::Dot)
}

pub fn seq(opes: Vec<Rc<Ope>>) -> Rc<Ope> {
    Rc::new(Ope::Seq(opes))
}

pub fn cho(opes: Vec<Rc<Ope>>) -> Rc<Ope> {
    Rc::new(Ope::Cho(opes))
}

pub fn zom(ope: Rc<Ope>) -> Rc<Ope> {
    Rc::new(Ope::Zom(ope))
}

pub fn oom(ope: Rc<Ope>) -> Rc<Ope> {
    Rc::new(Ope::Oom(ope))
}

pub fn opt(ope: Rc<Ope>) -> Rc<Ope> {
    Rc::new(Ope::Opt(ope))
}

pub fn apd(ope: Rc<Ope>) -> Rc<Ope> {
    Rc::new(Ope::Apd(ope))
}

pub fn npd(ope: Rc<Ope>) -> Rc<Ope> {
    Rc::new(Ope::Npd(ope))
}

pub fn tok(ope: Rc<Ope>) -> Rc<Ope> {
    Rc::new(Ope::Tok(ope))
}

pub fn ign(ope: Rc<Ope>) -> Rc<Ope> {
    Rc::new(Ope::Ign(ope))
}

pub fn reference(name: &str, args: Vec<Rc<Ope>>, pos: usize) -> Rc<Ope> {
    Rc::new(Ope::Ref {
        name: name.to_string(),
        args,
        pos,
        target: Cell::new(RefTarget::Unresolved),
    })
}

pub fn wsp(ope: Rc<Ope>) -> Rc<Ope> {
    Rc::new(Ope::Wsp(ope))
}

pub fn prec(atom: Rc<Ope>, binop: Rc<Ope>, table: BinOpTable, rule: RuleId) -> Rc<Ope> {
    Rc::new(Ope::Prec {
        atom,
        binop,
        table,
        rule,
    })
}

// --- Matching ---------------------------------------------------------------

impl Ope {
    /// Match this operator at `p`, appending values and tokens to frame
    /// `vi`. Returns the consumed length, or `None` on failure.
    pub(crate) fn parse<'a>(
        &self,
        p: usize,
        vi: usize,
        c: &mut Context<'a>,
        d: &mut dyn Any,
    ) -> Option<usize> {
        match self {
            Ope::Lit {
                text,
                ignore_case,
                is_word,
            } => parse_literal(p, vi, c, d, text, *ignore_case, is_word),

            Ope::Cls { ranges } => {
                let s = c.s;
                match s.get(p) {
                    Some(&b) if ranges.iter().any(|&(lo, hi)| lo <= b && b <= hi) => Some(1),
                    _ => {
                        c.record_failure(p, None);
                        None
                    }
                }
            }

            Ope::Dot => {
                if p < c.s.len() {
                    Some(1)
                } else {
                    c.record_failure(p, None);
                    None
                }
            }

            Ope::Seq(opes) => {
                let mut l = 0;
                for ope in opes {
                    match ope.parse(p + l, vi, c, d) {
                        Some(cl) => l += cl,
                        None => {
                            c.record_failure(p + l, None);
                            return None;
                        }
                    }
                }
                Some(l)
            }

            Ope::Cho(opes) => {
                for (i, ope) in opes.iter().enumerate() {
                    let snap = c.frame_snapshot(vi);
                    match ope.parse(p, vi, c, d) {
                        Some(l) => {
                            c.frame(vi).choice = i;
                            return Some(l);
                        }
                        None => c.frame_restore(vi, snap),
                    }
                }
                None
            }

            Ope::Zom(ope) => {
                let mut l = 0;
                loop {
                    let snap = c.frame_snapshot(vi);
                    match ope.parse(p + l, vi, c, d) {
                        // A zero-width success would loop forever; treat it
                        // as the end of the repetition.
                        Some(0) => break,
                        Some(cl) => l += cl,
                        None => {
                            c.frame_restore(vi, snap);
                            break;
                        }
                    }
                }
                Some(l)
            }

            Ope::Oom(ope) => {
                let mut l = ope.parse(p, vi, c, d)?;
                if l == 0 {
                    return Some(0);
                }
                loop {
                    let snap = c.frame_snapshot(vi);
                    match ope.parse(p + l, vi, c, d) {
                        Some(0) => break,
                        Some(cl) => l += cl,
                        None => {
                            c.frame_restore(vi, snap);
                            break;
                        }
                    }
                }
                Some(l)
            }

            Ope::Opt(ope) => {
                let snap = c.frame_snapshot(vi);
                match ope.parse(p, vi, c, d) {
                    Some(l) => Some(l),
                    None => {
                        c.frame_restore(vi, snap);
                        Some(0)
                    }
                }
            }

            Ope::Apd(ope) => {
                let svi = c.push();
                let r = ope.parse(p, svi, c, d);
                c.pop();
                r.map(|_| 0)
            }

            Ope::Npd(ope) => {
                let saved = c.save_error_state();
                let svi = c.push();
                let r = ope.parse(p, svi, c, d);
                c.pop();
                match r {
                    Some(_) => {
                        c.record_failure(p, None);
                        None
                    }
                    None => {
                        // The child failed as expected; its error records
                        // must not leak into reporting.
                        c.restore_error_state(saved);
                        Some(0)
                    }
                }
            }

            Ope::Tok(ope) => {
                c.token_depth += 1;
                let r = ope.parse(p, vi, c, d);
                c.token_depth -= 1;
                let l = r?;
                let s = c.s;
                c.frame(vi).ts.push(&s[p..p + l]);
                let mut total = l;
                if c.token_depth == 0 && !c.in_whitespace {
                    if let Some(w) = c.whitespace_ope.clone() {
                        total += w.parse(p + l, vi, c, d)?;
                    }
                }
                Some(total)
            }

            Ope::Ign(ope) => {
                let svi = c.push();
                let r = ope.parse(p, svi, c, d);
                c.pop();
                r
            }

            Ope::Ref { args, target, .. } => match target.get() {
                RefTarget::Rule(id) => {
                    let g = c.grammar;
                    let rule = g.rule(id);
                    if rule.is_macro() {
                        // Inline expansion: substitute the argument
                        // operators for the parameters and run the body
                        // against the parent frame, no action.
                        let body = substitute(&rule.ope, args);
                        c.trace_enter(&rule.name, p);
                        let r = body.parse(p, vi, c, d);
                        c.trace_leave(&rule.name, p, r);
                        r
                    } else {
                        rule.parse_core(p, vi, c, d)
                    }
                }
                // Parameter references are substituted away before a macro
                // body runs; an unresolved name cannot match anything.
                RefTarget::Param(_) | RefTarget::Unresolved => None,
            },

            Ope::Wsp(ope) => {
                if c.in_whitespace {
                    return Some(0);
                }
                c.in_whitespace = true;
                let r = ope.parse(p, vi, c, d);
                c.in_whitespace = false;
                r
            }

            Ope::Prec {
                atom,
                binop,
                table,
                rule,
            } => climb(p, vi, c, d, atom, binop, table, *rule, 1),
        }
    }
}

fn parse_literal<'a>(
    p: usize,
    vi: usize,
    c: &mut Context<'a>,
    d: &mut dyn Any,
    text: &[u8],
    ignore_case: bool,
    is_word: &OnceCell<bool>,
) -> Option<usize> {
    let s = c.s;
    let end = p + text.len();
    let matched = if ignore_case {
        s.get(p..end).is_some_and(|w| w.eq_ignore_ascii_case(text))
    } else {
        s.get(p..end) == Some(text)
    };
    if !matched {
        let lexeme = String::from_utf8_lossy(text);
        c.record_failure(p, Some(&lexeme));
        return None;
    }
    let mut l = text.len();

    // A literal that is itself a word must not be followed by more word —
    // `'if'` may not match the front of `ifx`.
    if let Some(word) = c.word_ope.clone() {
        let g = c.grammar;
        if *is_word.get_or_init(|| literal_is_word(text, &word, g)) {
            let saved = c.save_error_state();
            let svi = c.push();
            let hit = word.parse(p + l, svi, c, d).is_some();
            c.pop();
            c.restore_error_state(saved);
            if hit {
                let lexeme = String::from_utf8_lossy(text);
                c.record_failure(p, Some(&lexeme));
                return None;
            }
        }
    }

    if c.token_depth == 0 && !c.in_whitespace {
        if let Some(w) = c.whitespace_ope.clone() {
            l += w.parse(p + l, vi, c, d)?;
        }
    }
    Some(l)
}

/// Does `%word` match the whole literal? Decides whether the literal gets
/// a word-boundary check at all.
fn literal_is_word(text: &[u8], word: &Rc<Ope>, g: &crate::grammar::Grammar) -> bool {
    let mut c = Context::new(text, g, None, None, None);
    let vi = c.push();
    let mut unit = ();
    matches!(word.parse(0, vi, &mut c, &mut unit), Some(l) if l == text.len())
}

/// Clone an operator tree, replacing macro-parameter references with the
/// supplied argument operators. Nested reference arguments are substituted
/// too, so macro calls inside macro bodies see concrete operators.
pub(crate) fn substitute(ope: &Rc<Ope>, args: &[Rc<Ope>]) -> Rc<Ope> {
    match &**ope {
        Ope::Ref {
            name,
            args: rargs,
            pos,
            target,
        } => {
            if let RefTarget::Param(i) = target.get() {
                return args[i].clone();
            }
            if rargs.is_empty() {
                return ope.clone();
            }
            Rc::new(Ope::Ref {
                name: name.clone(),
                args: rargs.iter().map(|a| substitute(a, args)).collect(),
                pos: *pos,
                target: Cell::new(target.get()),
            })
        }
        Ope::Seq(cs) => seq(cs.iter().map(|o| substitute(o, args)).collect()),
        Ope::Cho(cs) => cho(cs.iter().map(|o| substitute(o, args)).collect()),
        Ope::Zom(o) => zom(substitute(o, args)),
        Ope::Oom(o) => oom(substitute(o, args)),
        Ope::Opt(o) => opt(substitute(o, args)),
        Ope::Apd(o) => apd(substitute(o, args)),
        Ope::Npd(o) => npd(substitute(o, args)),
        Ope::Tok(o) => tok(substitute(o, args)),
        Ope::Ign(o) => ign(substitute(o, args)),
        Ope::Wsp(o) => wsp(substitute(o, args)),
        Ope::Lit { .. } | Ope::Cls { .. } | Ope::Dot | Ope::Prec { .. } => ope.clone(),
    }
}

/// Precedence climbing over a flat atom-operator-atom stream.
#[allow(clippy::too_many_arguments)]
fn climb<'a>(
    p: usize,
    vi: usize,
    c: &mut Context<'a>,
    d: &mut dyn Any,
    atom: &Rc<Ope>,
    binop: &Rc<Ope>,
    table: &BinOpTable,
    rule: RuleId,
    min_level: u8,
) -> Option<usize> {
    let mut len = atom.parse(p, vi, c, d)?;

    loop {
        // Operator lexeme, matched into a scratch frame so a rejected
        // operator leaves no trace.
        let svi = c.push();
        let op = match binop.parse(p + len, svi, c, d) {
            Some(ol) => {
                let text = c.frame(svi).token();
                c.pop();
                Some((ol, text))
            }
            None => {
                c.pop();
                None
            }
        };
        let Some((op_len, op_text)) = op else { break };
        let Some((level, assoc)) = table.get(&op_text) else {
            break;
        };
        if level < min_level {
            break;
        }

        let next_min = match assoc {
            Assoc::Left => level + 1,
            Assoc::Right => level,
        };
        let rvi = c.push();
        let rhs = climb(p + len + op_len, rvi, c, d, atom, binop, table, rule, next_min);
        let Some(rhs_len) = rhs else {
            // Roll back the operator; the left side stands on its own.
            c.pop();
            break;
        };
        let right = c.frame(rvi).vs.first().cloned().flatten();
        c.pop();

        let total = len + op_len + rhs_len;
        let left = c.frame(vi).vs.pop().flatten();
        let g = c.grammar;
        let r = g.rule(rule);
        let combined = match &r.action {
            Some(action) => {
                let action = action.clone();
                let s = c.s;
                let mut frame = crate::values::Values {
                    vs: vec![
                        left,
                        Some(Rc::new(op_text) as crate::values::Value),
                        right,
                    ],
                    s: &s[p..p + total],
                    ts: Vec::new(),
                    pos: p,
                    choice: 0,
                };
                match action(&mut frame, d) {
                    Ok(v) => v,
                    Err(msg) => {
                        c.set_message(p, msg);
                        return None;
                    }
                }
            }
            None => left,
        };
        c.frame(vi).vs.push(combined);
        len = total;
    }

    Some(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Grammar;

    fn run(ope: &Rc<Ope>, input: &str) -> Option<usize> {
        let g = Grammar::new();
        let mut c = Context::new(input.as_bytes(), &g, None, None, None);
        let vi = c.push();
        let mut unit = ();
        ope.parse(0, vi, &mut c, &mut unit)
    }

    fn run_err(ope: &Rc<Ope>, input: &str) -> Option<usize> {
        let g = Grammar::new();
        let mut c = Context::new(input.as_bytes(), &g, None, None, None);
        let vi = c.push();
        let mut unit = ();
        let r = ope.parse(0, vi, &mut c, &mut unit);
        assert!(r.is_none());
        c.error_pos
    }

    // --- Terminals ---

    #[test]
    fn test_literal_match() {
        assert_eq!(run(&lit("abc"), "abcd"), Some(3));
        assert_eq!(run(&lit("abc"), "abd"), None);
        assert_eq!(run(&lit("abc"), "ab"), None);
    }

    #[test]
    fn test_literal_ignore_case() {
        assert_eq!(run(&liti("abc"), "AbC"), Some(3));
        assert_eq!(run(&liti("abc"), "AbD"), None);
    }

    #[test]
    fn test_class_ranges() {
        let c = cls(b"a-zA-Z_");
        assert_eq!(run(&c, "q"), Some(1));
        assert_eq!(run(&c, "Q"), Some(1));
        assert_eq!(run(&c, "_"), Some(1));
        assert_eq!(run(&c, "0"), None);
        assert_eq!(run(&c, ""), None);
    }

    #[test]
    fn test_class_literal_dash() {
        // Trailing dash is not a range marker.
        let c = cls(b"+-");
        assert_eq!(run(&c, "-"), Some(1));
        assert_eq!(run(&c, "+"), Some(1));
        assert_eq!(run(&c, "*"), None);
    }

    #[test]
    fn test_dot_matches_one_byte() {
        assert_eq!(run(&dot(), "x"), Some(1));
        assert_eq!(run(&dot(), ""), None);
    }

    // --- Composites ---

    #[test]
    fn test_sequence() {
        let s = seq(vec![lit("a"), lit("b")]);
        assert_eq!(run(&s, "ab"), Some(2));
        assert_eq!(run(&s, "ac"), None);
    }

    #[test]
    fn test_sequence_failure_position() {
        // `S <- 'a' 'b'` on "ac" must report the position after the 'a'.
        let s = seq(vec![lit("a"), lit("b")]);
        assert_eq!(run_err(&s, "ac"), Some(1));
    }

    #[test]
    fn test_choice_first_wins() {
        let c = cho(vec![lit("ab"), lit("a")]);
        assert_eq!(run(&c, "ab"), Some(2));
        let c = cho(vec![lit("a"), lit("ab")]);
        assert_eq!(run(&c, "ab"), Some(1));
    }

    #[test]
    fn test_choice_records_index() {
        let g = Grammar::new();
        let mut c = Context::new(b"b", &g, None, None, None);
        let vi = c.push();
        let mut unit = ();
        let ope = cho(vec![lit("a"), lit("b"), lit("b")]);
        assert_eq!(ope.parse(0, vi, &mut c, &mut unit), Some(1));
        assert_eq!(c.frame(vi).choice, 1);
    }

    #[test]
    fn test_repetitions() {
        assert_eq!(run(&zom(lit("a")), "aaab"), Some(3));
        assert_eq!(run(&zom(lit("a")), "b"), Some(0));
        assert_eq!(run(&oom(lit("a")), "aaab"), Some(3));
        assert_eq!(run(&oom(lit("a")), "b"), None);
        assert_eq!(run(&opt(lit("a")), "ab"), Some(1));
        assert_eq!(run(&opt(lit("a")), "b"), Some(0));
    }

    #[test]
    fn test_zero_width_repetition_terminates() {
        assert_eq!(run(&zom(opt(lit("a"))), "b"), Some(0));
        assert_eq!(run(&oom(opt(lit("a"))), "aab"), Some(2));
        assert_eq!(run(&zom(npd(lit("x"))), "y"), Some(0));
    }

    #[test]
    fn test_predicates_consume_nothing() {
        let s = seq(vec![apd(lit("a")), lit("ab")]);
        assert_eq!(run(&s, "ab"), Some(2));
        let s = seq(vec![npd(lit("b")), lit("ab")]);
        assert_eq!(run(&s, "ab"), Some(2));
        assert_eq!(run(&npd(lit("a")), "ab"), None);
    }

    #[test]
    fn test_negative_lookahead_restores_error_state() {
        let g = Grammar::new();
        let mut c = Context::new(b"ab", &g, None, None, None);
        let vi = c.push();
        let mut unit = ();
        // The inner failure of 'x' at 0 must not survive the lookahead.
        assert_eq!(npd(lit("x")).parse(0, vi, &mut c, &mut unit), Some(0));
        assert_eq!(c.error_pos, None);
    }

    #[test]
    fn test_token_boundary_captures() {
        let g = Grammar::new();
        let mut c = Context::new(b"ab", &g, None, None, None);
        let vi = c.push();
        let mut unit = ();
        let ope = tok(seq(vec![lit("a"), lit("b")]));
        assert_eq!(ope.parse(0, vi, &mut c, &mut unit), Some(2));
        assert_eq!(c.frame(vi).ts, vec![b"ab" as &[u8]]);
    }

    #[test]
    fn test_binop_table_lexemes_longest_first() {
        let mut t = BinOpTable::default();
        t.insert("<", 1, Assoc::Left);
        t.insert("<<", 2, Assoc::Left);
        t.insert("+", 1, Assoc::Left);
        assert_eq!(t.lexemes(), vec!["<<".to_string(), "+".into(), "<".into()]);
    }
}
