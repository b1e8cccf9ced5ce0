//! Named rules and semantic actions.
//!
//! A rule binds a name to an operator body, plus the per-rule machinery:
//! an optional semantic action, enter/leave hooks, an optional failure
//! message factory, the `ignore` flag, macro parameters, and the memoized
//! token-property cache.

use std::any::Any;
use std::cell::OnceCell;
use std::rc::Rc;

use crate::analysis::TokenProps;
use crate::context::Context;
use crate::ope::Ope;
use crate::values::{Value, Values};

/// A semantic action: reads the rule's frame, returns the rule's value
/// (or `None` for no value), or an error message that fails the rule at
/// its start position.
pub type Action = Rc<dyn for<'s> Fn(&mut Values<'s>, &mut dyn Any) -> ActionResult>;

pub type ActionResult = Result<Option<Value>, String>;

/// Enter/leave hook, invoked with the caller-supplied user data.
pub type Hook = Rc<dyn Fn(&mut dyn Any)>;

/// A named grammar rule. A rule with parameters is a macro and is inlined
/// at each reference site.
pub struct Rule {
    pub name: String,
    /// Byte offset of the definition in the grammar source.
    pub pos: usize,
    pub ope: Rc<Ope>,
    pub action: Option<Action>,
    pub enter: Option<Hook>,
    pub leave: Option<Hook>,
    /// Failure message factory; the latest-positioned message wins.
    pub message: Option<Rc<dyn Fn() -> String>>,
    /// Suppress this rule's value in the parent frame.
    pub ignore: bool,
    /// Formal parameter names; non-empty marks a macro.
    pub params: Vec<String>,
    /// Whitespace operator, installed on the start rule only.
    pub whitespace_ope: Option<Rc<Ope>>,
    /// Word operator, installed on the start rule only.
    pub word_ope: Option<Rc<Ope>>,
    /// Set by the expression extension: the automatic action invocation is
    /// skipped because the climb loop applies the action itself.
    pub disable_action: bool,
    pub(crate) token_props: OnceCell<TokenProps>,
}

impl Rule {
    pub fn new(name: &str, pos: usize, ope: Rc<Ope>) -> Self {
        Self {
            name: name.to_string(),
            pos,
            ope,
            action: None,
            enter: None,
            leave: None,
            message: None,
            ignore: false,
            params: Vec::new(),
            whitespace_ope: None,
            word_ope: None,
            disable_action: false,
            token_props: OnceCell::new(),
        }
    }

    pub fn is_macro(&self) -> bool {
        !self.params.is_empty()
    }

    /// Full rule invocation: frame push, hooks, body, action, value
    /// propagation. The leave hook fires on every exit path.
    pub(crate) fn parse_core<'a>(
        &self,
        p: usize,
        vi: usize,
        c: &mut Context<'a>,
        d: &mut dyn Any,
    ) -> Option<usize> {
        c.trace_enter(&self.name, p);

        if let Some(enter) = &self.enter {
            enter(d);
        }

        let chvi = c.push();
        let mut result = self.ope.parse(p, chvi, c, d);

        let mut val: Option<Value> = None;
        if let Some(l) = result {
            let s = c.s;
            let frame = c.frame(chvi);
            frame.s = &s[p..p + l];
            frame.pos = p;

            match self.action.as_ref().filter(|_| !self.disable_action) {
                Some(action) => {
                    let action = action.clone();
                    match action(c.frame(chvi), d) {
                        Ok(v) => val = v,
                        Err(msg) => {
                            c.set_message(p, msg);
                            result = None;
                        }
                    }
                }
                None => val = c.frame(chvi).vs.first().cloned().flatten(),
            }
        }

        match result {
            Some(_) => {
                if !self.ignore {
                    c.frame(vi).vs.push(val);
                }
            }
            None => {
                if let Some(message) = &self.message {
                    c.set_message(p, message());
                }
            }
        }

        c.pop();

        if let Some(leave) = &self.leave {
            leave(d);
        }

        c.trace_leave(&self.name, p, result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Grammar;
    use crate::ope::{lit, reference, seq};
    use crate::values::value;

    fn two_rule_grammar() -> Grammar {
        // S <- AB, AB <- 'a' 'b'
        let mut g = Grammar::new();
        g.add_rule(Rule::new("S", 0, reference("AB", vec![], 0)));
        g.add_rule(Rule::new("AB", 0, seq(vec![lit("a"), lit("b")])));
        g.link().unwrap();
        g
    }

    #[test]
    fn test_rule_delegation() {
        let g = two_rule_grammar();
        let mut d = ();
        assert!(g.parse("ab", &mut d).is_ok());
        assert!(g.parse("ac", &mut d).is_err());
    }

    #[test]
    fn test_action_value_propagates() {
        let mut g = two_rule_grammar();
        g.get_mut("AB").unwrap().action =
            Some(Rc::new(|v: &mut Values, _: &mut dyn Any| Ok(Some(value(v.text().to_uppercase())))));
        let mut d = ();
        let val = g.parse("ab", &mut d).unwrap().unwrap();
        assert_eq!(val.downcast_ref::<String>().unwrap(), "AB");
    }

    #[test]
    fn test_action_error_fails_rule_with_message() {
        let mut g = two_rule_grammar();
        g.get_mut("AB").unwrap().action = Some(Rc::new(|_: &mut Values, _: &mut dyn Any| Err("no good".into())));
        let mut d = ();
        let err = g.parse("ab", &mut d).unwrap_err();
        assert_eq!(err.message, "no good");
        assert_eq!(err.pos, 0);
    }

    #[test]
    fn test_ignore_suppresses_value() {
        let mut g = two_rule_grammar();
        g.get_mut("AB").unwrap().ignore = true;
        g.get_mut("AB").unwrap().action = Some(Rc::new(|_: &mut Values, _: &mut dyn Any| Ok(Some(value(1i64)))));
        let mut d = ();
        assert!(g.parse("ab", &mut d).unwrap().is_none());
    }

    #[test]
    fn test_message_factory_reported_on_failure() {
        let mut g = two_rule_grammar();
        g.get_mut("AB").unwrap().message = Some(Rc::new(|| "expected ab here".to_string()));
        let mut d = ();
        let err = g.parse("ax", &mut d).unwrap_err();
        assert_eq!(err.message, "expected ab here");
    }

    #[test]
    fn test_enter_leave_fire_on_failure_too() {
        use std::cell::Cell;

        #[derive(Default)]
        struct Counts {
            enter: Cell<usize>,
            leave: Cell<usize>,
        }

        let mut g = two_rule_grammar();
        {
            let r = g.get_mut("AB").unwrap();
            r.enter = Some(Rc::new(|d: &mut dyn Any| {
                let counts = d.downcast_mut::<Counts>().unwrap();
                counts.enter.set(counts.enter.get() + 1);
            }));
            r.leave = Some(Rc::new(|d: &mut dyn Any| {
                let counts = d.downcast_mut::<Counts>().unwrap();
                counts.leave.set(counts.leave.get() + 1);
            }));
        }
        let mut d = Counts::default();
        let _ = g.parse("ax", &mut d);
        assert_eq!(d.enter.get(), 1);
        assert_eq!(d.leave.get(), 1);
    }
}
