//! Static analyses over the operator tree.
//!
//! Each analysis is a plain recursive match over `Ope`, carrying a
//! seen-set so cycles through references terminate. Everything walks
//! rules in definition order so diagnostics come out deterministically.

use std::collections::HashSet;

use crate::error::Diagnostic;
use crate::grammar::Grammar;
use crate::ope::{Ope, RefTarget, RuleId};

/// Memoized per-rule token properties.
///
/// A rule is a token when its body matches the closure: terminals and
/// token boundaries are tokens, a combinator is a token iff all children
/// are, and a reference is a token iff its target rule is. A boundary
/// search does not cross references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenProps {
    pub is_token: bool,
    pub has_boundary: bool,
}

/// Token properties of a rule, computed once and cached on the rule.
pub fn rule_token_props(g: &Grammar, id: RuleId) -> TokenProps {
    if let Some(p) = g.rule(id).token_props.get() {
        return *p;
    }
    let mut visiting = HashSet::new();
    let props = TokenProps {
        is_token: rule_is_token(g, id, &mut visiting),
        has_boundary: has_boundary(&g.rule(id).ope),
    };
    let _ = g.rule(id).token_props.set(props);
    props
}

fn rule_is_token(g: &Grammar, id: RuleId, visiting: &mut HashSet<RuleId>) -> bool {
    if let Some(p) = g.rule(id).token_props.get() {
        return p.is_token;
    }
    // A cycle cannot decide the question; let the rest of the tree do it.
    if !visiting.insert(id) {
        return true;
    }
    let r = ope_is_token(g, &g.rule(id).ope, visiting);
    visiting.remove(&id);
    r
}

fn ope_is_token(g: &Grammar, ope: &Ope, visiting: &mut HashSet<RuleId>) -> bool {
    match ope {
        Ope::Lit { .. } | Ope::Cls { .. } | Ope::Dot | Ope::Tok(_) => true,
        Ope::Seq(cs) | Ope::Cho(cs) => cs.iter().all(|o| ope_is_token(g, o, visiting)),
        Ope::Zom(o) | Ope::Oom(o) | Ope::Opt(o) | Ope::Apd(o) | Ope::Npd(o) | Ope::Ign(o)
        | Ope::Wsp(o) => ope_is_token(g, o, visiting),
        Ope::Ref { target, .. } => match target.get() {
            RefTarget::Rule(id) => rule_is_token(g, id, visiting),
            _ => true,
        },
        Ope::Prec { .. } => false,
    }
}

fn has_boundary(ope: &Ope) -> bool {
    match ope {
        Ope::Tok(_) => true,
        Ope::Seq(cs) | Ope::Cho(cs) => cs.iter().any(|o| has_boundary(o)),
        Ope::Zom(o) | Ope::Oom(o) | Ope::Opt(o) | Ope::Apd(o) | Ope::Npd(o) | Ope::Ign(o)
        | Ope::Wsp(o) => has_boundary(o),
        _ => false,
    }
}

/// Is this body a bare literal, or a choice of bare literals? Such rules
/// get an implicit token boundary when `%whitespace` is installed.
pub fn is_literal_token(ope: &Ope) -> bool {
    match ope {
        Ope::Lit { .. } => true,
        Ope::Cho(cs) => cs.iter().all(|o| matches!(&**o, Ope::Lit { .. })),
        _ => false,
    }
}

/// Verify every reference: the name must resolve to a formal parameter of
/// the enclosing rule or to a grammar rule, and the argument count must
/// match the target's parameter count. One diagnostic per name per rule.
pub fn check_references(g: &Grammar, source: &str) -> Vec<Diagnostic> {
    let mut details = Vec::new();
    for rule in g.rules() {
        let mut reported = HashSet::new();
        check_ope(g, &rule.ope, &rule.params, source, &mut reported, &mut details);
    }
    details
}

fn check_ope(
    g: &Grammar,
    ope: &Ope,
    params: &[String],
    source: &str,
    reported: &mut HashSet<String>,
    details: &mut Vec<Diagnostic>,
) {
    match ope {
        Ope::Ref {
            name, args, pos, ..
        } => {
            for a in args {
                check_ope(g, a, params, source, reported, details);
            }
            let message = if params.iter().any(|p| p == name) {
                (!args.is_empty()).then(|| format!("'{name}' is not a macro."))
            } else {
                match g.get(name) {
                    None => Some(format!("'{name}' is not defined.")),
                    Some(target) if target.params.len() != args.len() => Some(format!(
                        "'{name}' expects {} arguments.",
                        target.params.len()
                    )),
                    Some(_) => None,
                }
            };
            if let Some(message) = message {
                if reported.insert(name.clone()) {
                    details.push(Diagnostic::at(source, *pos, message));
                }
            }
        }
        Ope::Seq(cs) | Ope::Cho(cs) => {
            for o in cs {
                check_ope(g, o, params, source, reported, details);
            }
        }
        Ope::Zom(o) | Ope::Oom(o) | Ope::Opt(o) | Ope::Apd(o) | Ope::Npd(o) | Ope::Tok(o)
        | Ope::Ign(o) | Ope::Wsp(o) => check_ope(g, o, params, source, reported, details),
        Ope::Prec { atom, binop, .. } => {
            check_ope(g, atom, params, source, reported, details);
            check_ope(g, binop, params, source, reported, details);
        }
        Ope::Lit { .. } | Ope::Cls { .. } | Ope::Dot => {}
    }
}

/// Resolve every reference to its target — a parameter index within the
/// enclosing rule, or a rule id. Must run after `check_references`.
pub fn link_references(g: &Grammar) {
    for rule in g.rules() {
        link_ope(g, &rule.ope, &rule.params);
    }
}

fn link_ope(g: &Grammar, ope: &Ope, params: &[String]) {
    match ope {
        Ope::Ref {
            name, args, target, ..
        } => {
            if let Some(i) = params.iter().position(|p| p == name) {
                target.set(RefTarget::Param(i));
            } else if let Some(id) = g.id_of(name) {
                target.set(RefTarget::Rule(id));
            }
            for a in args {
                link_ope(g, a, params);
            }
        }
        Ope::Seq(cs) | Ope::Cho(cs) => {
            for o in cs {
                link_ope(g, o, params);
            }
        }
        Ope::Zom(o) | Ope::Oom(o) | Ope::Opt(o) | Ope::Apd(o) | Ope::Npd(o) | Ope::Tok(o)
        | Ope::Ign(o) | Ope::Wsp(o) => link_ope(g, o, params),
        Ope::Prec { atom, binop, .. } => {
            link_ope(g, atom, params);
            link_ope(g, binop, params);
        }
        Ope::Lit { .. } | Ope::Cls { .. } | Ope::Dot => {}
    }
}

/// Find rules reachable from themselves along a left-first path without
/// consuming input. One diagnostic per offending rule, at the position of
/// the recursive reference.
pub fn detect_left_recursion(g: &Grammar, source: &str) -> Vec<Diagnostic> {
    let mut details = Vec::new();
    for rule in g.rules() {
        let mut det = LeftRecursion {
            g,
            name: &rule.name,
            params: &rule.params,
            refs: HashSet::new(),
            pos: None,
            done: false,
        };
        det.visit(&rule.ope);
        if let Some(pos) = det.pos {
            details.push(Diagnostic::at(
                source,
                pos,
                format!("'{}' is left recursive.", rule.name),
            ));
        }
    }
    details
}

struct LeftRecursion<'g> {
    g: &'g Grammar,
    name: &'g str,
    params: &'g [String],
    refs: HashSet<String>,
    pos: Option<usize>,
    /// True when the subtree just visited is guaranteed to consume input,
    /// which ends the left-first path.
    done: bool,
}

impl LeftRecursion<'_> {
    fn visit(&mut self, ope: &Ope) {
        if self.pos.is_some() {
            return;
        }
        match ope {
            Ope::Seq(cs) => {
                self.done = false;
                for o in cs {
                    self.visit(o);
                    if self.done || self.pos.is_some() {
                        break;
                    }
                }
            }
            Ope::Cho(cs) => {
                let mut all_done = true;
                for o in cs {
                    self.done = false;
                    self.visit(o);
                    if self.pos.is_some() {
                        return;
                    }
                    all_done &= self.done;
                }
                self.done = all_done;
            }
            Ope::Zom(o) | Ope::Opt(o) | Ope::Apd(o) | Ope::Npd(o) => {
                self.visit(o);
                self.done = false;
            }
            Ope::Oom(o) | Ope::Tok(o) | Ope::Ign(o) | Ope::Wsp(o) => self.visit(o),
            Ope::Lit { text, .. } => self.done = !text.is_empty(),
            Ope::Cls { .. } | Ope::Dot => self.done = true,
            Ope::Prec { atom, .. } => {
                self.visit(atom);
                self.done = true;
            }
            Ope::Ref { name, pos, .. } => {
                if self.params.iter().any(|p| p == name) {
                    self.done = true;
                    return;
                }
                if name == self.name {
                    self.pos = Some(*pos);
                    self.done = true;
                    return;
                }
                if !self.refs.insert(name.clone()) {
                    self.done = true;
                    return;
                }
                if let Some(rule) = self.g.get(name) {
                    self.visit(&rule.ope);
                }
                self.done = true;
            }
        }
    }
}
