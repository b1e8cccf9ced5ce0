//! The `%expr` / `%binop` expression extension.
//!
//! When the option section designates a rule, its body becomes the atom
//! of a precedence-climbing matcher and the `%binop` lines supply the
//! operator table. The rewritten rule's action is then invoked once per
//! operator application with a synthetic `[left, op, right]` frame.

use rpeg_engine::ope::{cho, lit, prec, tok};
use rpeg_engine::{Assoc, BinOpTable, Diagnostic, Grammar, BINOP_OPTION, EXPR_OPTION};

/// Interpret the expression options and rewrite the designated rule.
/// Returns load diagnostics; an empty list means success (or no `%expr`).
pub(crate) fn setup(
    g: &mut Grammar,
    options: &[(String, String)],
    source: &str,
) -> Vec<Diagnostic> {
    let name = options
        .iter()
        .find(|(k, _)| k.as_str() == EXPR_OPTION)
        .map(|(_, v)| v.trim().to_string());
    let Some(name) = name else {
        return Vec::new();
    };

    let mut details = Vec::new();
    let Some(id) = g.id_of(&name) else {
        details.push(Diagnostic::at(
            source,
            0,
            format!("'{name}' is not defined."),
        ));
        return details;
    };

    let mut table = BinOpTable::default();
    let mut level: u8 = 1;
    for (_, spec) in options.iter().filter(|(k, _)| k.as_str() == BINOP_OPTION) {
        let mut fields = spec.split_whitespace();
        let assoc = match fields.next() {
            Some("L") => Assoc::Left,
            Some("R") => Assoc::Right,
            other => {
                details.push(Diagnostic::at(
                    source,
                    0,
                    format!(
                        "invalid %binop associativity '{}'; expected L or R.",
                        other.unwrap_or("")
                    ),
                ));
                level += 1;
                continue;
            }
        };
        for lexeme in fields {
            table.insert(lexeme, level, assoc);
        }
        level += 1;
    }
    if !details.is_empty() || table.is_empty() {
        return details;
    }

    let binop = tok(cho(table.lexemes().iter().map(|l| lit(l)).collect()));
    let atom = g.rule(id).ope.clone();
    g.rule_mut(id).ope = prec(atom, binop, table, id);
    // The climb loop applies the action per combination itself.
    g.rule_mut(id).disable_action = true;
    details
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::rc::Rc;

    use rpeg_engine::{value, Values};

    use crate::{load, Parser};

    /// Wire actions so expressions come out as s-expressions.
    fn sexpr_parser(grammar: &str) -> Parser {
        let mut p = load(grammar).unwrap();
        p.grammar.get_mut("E_atom").unwrap().action =
            Some(Rc::new(|v: &mut Values, _: &mut dyn Any| Ok(Some(value(v.token())))));
        p.grammar.get_mut("E").unwrap().action = Some(Rc::new(|v: &mut Values, _: &mut dyn Any| {
            Ok(Some(value(format!(
                "({} {} {})",
                v.to_str(1),
                v.to_str(0),
                v.to_str(2)
            ))))
        }));
        p
    }

    fn eval(p: &Parser, input: &str) -> String {
        let mut d = ();
        let val = p.parse(input, &mut d).unwrap().unwrap();
        val.downcast_ref::<String>().unwrap().clone()
    }

    const ARITH: &str = "E <- E_atom\nE_atom <- [0-9]+\n---\n%expr = E\n%binop = L + -\n%binop = L * /\n";

    #[test]
    fn test_precedence_levels() {
        // Scenario: later %binop lines bind tighter.
        let p = sexpr_parser(ARITH);
        assert_eq!(eval(&p, "1+2*3"), "(+ 1 (* 2 3))");
        assert_eq!(eval(&p, "1*2+3"), "(+ (* 1 2) 3)");
    }

    #[test]
    fn test_left_associativity() {
        let p = sexpr_parser(ARITH);
        assert_eq!(eval(&p, "1-2-3"), "(- (- 1 2) 3)");
        assert_eq!(eval(&p, "8/4/2"), "(/ (/ 8 4) 2)");
    }

    #[test]
    fn test_right_associativity() {
        let p = sexpr_parser(
            "E <- E_atom\nE_atom <- [0-9]+\n---\n%expr = E\n%binop = R ^\n",
        );
        assert_eq!(eval(&p, "1^2^3"), "(^ 1 (^ 2 3))");
    }

    #[test]
    fn test_bare_atom() {
        let p = sexpr_parser(ARITH);
        assert_eq!(eval(&p, "7"), "7");
    }

    #[test]
    fn test_with_whitespace() {
        let p = sexpr_parser(
            "E <- E_atom\nE_atom <- <[0-9]+>\n%whitespace <- [ \\t]*\n---\n%expr = E\n%binop = L + -\n%binop = L * /\n",
        );
        assert_eq!(eval(&p, "1 + 2 * 3"), "(+ 1 (* 2 3))");
    }

    #[test]
    fn test_unknown_expr_rule_is_diagnosed() {
        let err = load("S <- 'a'\n---\n%expr = Nope\n%binop = L +\n").unwrap_err();
        assert!(err.details[0].message.contains("'Nope' is not defined."));
    }

    #[test]
    fn test_bad_associativity_is_diagnosed() {
        let err = load("E <- [0-9]+\n---\n%expr = E\n%binop = X +\n").unwrap_err();
        assert!(err.details[0].message.contains("associativity"));
    }

    #[test]
    fn test_trailing_operator_rolls_back() {
        let p = sexpr_parser(ARITH);
        let mut d = ();
        // "1+" leaves the '+' unconsumed, so the exact-match check trips.
        let err = p.parse("1+", &mut d).unwrap_err();
        assert_eq!(err.message, "not exact match");
    }
}
