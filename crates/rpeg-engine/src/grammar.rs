//! The grammar container.
//!
//! Rules live in a vector and are addressed by index; a name map sits on
//! the side. Every analysis and diagnostic pass walks the vector in
//! definition order, never the map, so output is deterministic.

use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

use crate::analysis;
use crate::context::{Context, Tracer};
use crate::error::{LoadError, SyntaxError};
use crate::ope::{reference, wsp, Ope, RefTarget, RuleId};
use crate::rule::Rule;
use crate::values::Value;

/// Reserved rule implicitly skipped between tokens.
pub const WHITESPACE_RULE: &str = "%whitespace";
/// Reserved rule guarding literal word boundaries.
pub const WORD_RULE: &str = "%word";
/// Option naming the precedence-climbing rule.
pub const EXPR_OPTION: &str = "%expr";
/// Option declaring one binary-operator level.
pub const BINOP_OPTION: &str = "%binop";

/// A loaded grammar: rules plus the start rule (the first one defined).
#[derive(Default)]
pub struct Grammar {
    rules: Vec<Rule>,
    index: HashMap<String, RuleId>,
    start: RuleId,
}

impl Grammar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a rule. The first rule added becomes the start rule.
    /// Returns `None` when the name is already taken.
    pub fn add_rule(&mut self, rule: Rule) -> Option<RuleId> {
        if self.index.contains_key(&rule.name) {
            return None;
        }
        let id = self.rules.len();
        self.index.insert(rule.name.clone(), id);
        self.rules.push(rule);
        Some(id)
    }

    /// Install or override a rule body by name. An existing rule keeps its
    /// place in the definition order; a new one is appended. Used for
    /// caller-supplied rules merged into a loaded grammar.
    pub fn set_rule(&mut self, name: &str, ope: Rc<Ope>, ignore: bool) {
        match self.id_of(name) {
            Some(id) => {
                let rule = &mut self.rules[id];
                rule.ope = ope;
                rule.ignore = ignore;
            }
            None => {
                let mut rule = Rule::new(name, 0, ope);
                rule.ignore = ignore;
                self.add_rule(rule);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn id_of(&self, name: &str) -> Option<RuleId> {
        self.index.get(name).copied()
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id]
    }

    pub fn rule_mut(&mut self, id: RuleId) -> &mut Rule {
        &mut self.rules[id]
    }

    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.id_of(name).map(|id| &self.rules[id])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Rule> {
        let id = self.id_of(name)?;
        Some(&mut self.rules[id])
    }

    /// Rules in definition order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn rules_mut(&mut self) -> impl Iterator<Item = &mut Rule> {
        self.rules.iter_mut()
    }

    pub fn start_id(&self) -> RuleId {
        self.start
    }

    pub fn set_start(&mut self, id: RuleId) {
        self.start = id;
    }

    pub fn start_rule(&self) -> &Rule {
        &self.rules[self.start]
    }

    /// Validate and link a programmatically built grammar: reference and
    /// arity checks, reference linking, left-recursion detection.
    /// (The text loader runs the same passes itself, with real source
    /// positions.)
    pub fn link(&mut self) -> Result<(), LoadError> {
        let details = analysis::check_references(self, "");
        if !details.is_empty() {
            return Err(LoadError { details });
        }
        analysis::link_references(self);
        let details = analysis::detect_left_recursion(self, "");
        if !details.is_empty() {
            return Err(LoadError { details });
        }
        Ok(())
    }

    /// If `%whitespace` is defined, install it as the start rule's skipper
    /// and wrap literal-only rules in implicit token boundaries so keyword
    /// rules keep token semantics without an explicit `< >`.
    pub fn install_whitespace(&mut self) {
        let Some(ws_id) = self.id_of(WHITESPACE_RULE) else {
            return;
        };
        for id in 0..self.rules.len() {
            let rule = &self.rules[id];
            if rule.name == WHITESPACE_RULE || rule.name == WORD_RULE {
                continue;
            }
            if analysis::is_literal_token(&rule.ope) {
                let body = rule.ope.clone();
                self.rules[id].ope = crate::ope::tok(body);
            }
        }
        self.rules[ws_id].ignore = true;
        let skipper = reference(WHITESPACE_RULE, vec![], 0);
        if let Ope::Ref { target, .. } = &*skipper {
            target.set(RefTarget::Rule(ws_id));
        }
        let start = self.start;
        self.rules[start].whitespace_ope = Some(wsp(skipper));
    }

    /// If `%word` is defined, install it as the start rule's word guard.
    pub fn install_word(&mut self) {
        let Some(word_id) = self.id_of(WORD_RULE) else {
            return;
        };
        self.rules[word_id].ignore = true;
        let word = reference(WORD_RULE, vec![], 0);
        if let Ope::Ref { target, .. } = &*word {
            target.set(RefTarget::Rule(word_id));
        }
        let start = self.start;
        self.rules[start].word_ope = Some(word);
    }

    /// Parse `input` from the beginning, requiring the whole input to be
    /// consumed. Returns the start rule's semantic value.
    pub fn parse(&self, input: &str, d: &mut dyn Any) -> Result<Option<Value>, SyntaxError> {
        self.parse_with(input, 0, d, None).1
    }

    /// Parse `input` starting at byte `from`. Returns the consumed length
    /// (0 when the result is an error) and the outcome. Anything short of
    /// consuming the remaining input is a "not exact match" error.
    pub fn parse_with(
        &self,
        input: &str,
        from: usize,
        d: &mut dyn Any,
        tracer: Option<&dyn Tracer>,
    ) -> (usize, Result<Option<Value>, SyntaxError>) {
        if self.rules.is_empty() {
            let err = SyntaxError::at(input, from, "grammar has no rules".into(), Vec::new());
            return (0, Err(err));
        }

        let start = self.start_rule();
        let mut c = Context::new(
            input.as_bytes(),
            self,
            start.whitespace_ope.clone(),
            start.word_ope.clone(),
            tracer,
        );
        let root = c.push();

        // Skip whitespace once before the start rule.
        let mut consumed = from;
        let mut result = Some(0);
        if let Some(w) = c.whitespace_ope.clone() {
            result = w.parse(consumed, root, &mut c, d);
        }
        if let Some(l) = result {
            consumed += l;
            result = start.parse_core(consumed, root, &mut c, d);
            if let Some(l) = result {
                consumed += l;
            }
        }

        if result.is_none() || consumed != input.len() {
            let (pos, message, expected) = if result.is_none() {
                match c.message_pos {
                    Some(mp) => (mp, c.message.clone(), Vec::new()),
                    None => (
                        c.error_pos.unwrap_or(from),
                        "syntax error".to_string(),
                        c.expected.clone(),
                    ),
                }
            } else {
                // A prefix matched but input remains. The furthest failure
                // beyond the consumed prefix is the informative position;
                // otherwise point at the first unconsumed byte.
                match c.error_pos.filter(|&e| e > consumed) {
                    Some(e) => (e, "not exact match".to_string(), c.expected.clone()),
                    None => (consumed, "not exact match".to_string(), Vec::new()),
                }
            };
            return (0, Err(SyntaxError::at(input, pos, message, expected)));
        }

        let val = c.frame(root).vs.first().cloned().flatten();
        (consumed - from, Ok(val))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ope::{cls, lit, seq, zom};

    fn grammar(rules: Vec<Rule>) -> Grammar {
        let mut g = Grammar::new();
        for r in rules {
            g.add_rule(r).expect("duplicate rule in test grammar");
        }
        g.link().unwrap();
        g
    }

    #[test]
    fn test_exact_match_required() {
        let g = grammar(vec![Rule::new("S", 0, lit("ab"))]);
        let mut d = ();
        let err = g.parse("abc", &mut d).unwrap_err();
        assert_eq!(err.message, "not exact match");
        assert_eq!(err.pos, 2);
    }

    #[test]
    fn test_failure_reports_furthest_position() {
        // Scenario: `S <- 'a' 'b'` on "ac" fails at column 2.
        let g = grammar(vec![Rule::new("S", 0, seq(vec![lit("a"), lit("b")]))]);
        let mut d = ();
        let err = g.parse("ac", &mut d).unwrap_err();
        assert_eq!((err.line, err.column), (1, 2));
        assert_eq!(err.expected, vec!["b".to_string()]);
    }

    #[test]
    fn test_whitespace_skipping() {
        // Scenario: %whitespace <- [ \t\n]* with S <- 'a' 'b' consumes
        // "  a   b  " entirely.
        let mut g = Grammar::new();
        g.add_rule(Rule::new("S", 0, seq(vec![lit("a"), lit("b")])));
        g.add_rule(Rule::new(WHITESPACE_RULE, 0, zom(cls(b" \t\n"))));
        g.link().unwrap();
        g.install_whitespace();

        let mut d = ();
        assert!(g.parse("  a   b  ", &mut d).is_ok());
        assert!(g.parse("ab", &mut d).is_ok());
        assert!(g.parse("  a   c  ", &mut d).is_err());
    }

    #[test]
    fn test_word_rule_blocks_split_words() {
        // S <- 'if' 'x' with %word <- [a-z]+ must not match "ifx".
        let mut g = Grammar::new();
        g.add_rule(Rule::new("S", 0, seq(vec![lit("if"), lit("x")])));
        g.add_rule(Rule::new(WORD_RULE, 0, oom_word()));
        g.link().unwrap();
        g.install_word();

        let mut d = ();
        assert!(g.parse("ifx", &mut d).is_err());
    }

    fn oom_word() -> std::rc::Rc<Ope> {
        crate::ope::oom(cls(b"a-z"))
    }

    #[test]
    fn test_word_rule_ignores_punctuation_literals() {
        // A '+' literal is not a word; it may be followed by letters.
        let mut g = Grammar::new();
        g.add_rule(Rule::new("S", 0, seq(vec![lit("+"), lit("ab")])));
        g.add_rule(Rule::new(WORD_RULE, 0, oom_word()));
        g.link().unwrap();
        g.install_word();

        let mut d = ();
        assert!(g.parse("+ab", &mut d).is_ok());
    }

    #[test]
    fn test_literal_rules_become_tokens_under_whitespace() {
        // KW <- 'if' is wrapped in an implicit boundary; S <- KW 'x'
        // still skips whitespace between the two.
        let mut g = Grammar::new();
        g.add_rule(Rule::new(
            "S",
            0,
            seq(vec![crate::ope::reference("KW", vec![], 0), lit("x")]),
        ));
        g.add_rule(Rule::new("KW", 0, lit("if")));
        g.add_rule(Rule::new(WHITESPACE_RULE, 0, zom(cls(b" "))));
        g.link().unwrap();
        g.install_whitespace();

        let mut d = ();
        assert!(g.parse("if x", &mut d).is_ok());
        assert!(g.parse("if  x", &mut d).is_ok());
    }
}
