//! Generic syntax trees.
//!
//! `Parser::enable_ast` installs a tree-building action on every rule
//! that has none, so any grammar can produce a structured tree without
//! writing actions. Rules with an explicit token boundary — or whose body
//! references no other rule — become leaves carrying their token text.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use rpeg_engine::analysis::rule_token_props;
use rpeg_engine::ope::Ope;
use rpeg_engine::{value, Values, WHITESPACE_RULE, WORD_RULE};

use crate::Parser;

/// A node of the generic syntax tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ast {
    /// Name of the rule that produced this node.
    pub name: String,
    /// Byte offset of the match.
    pub pos: usize,
    /// The matched text.
    pub s: String,
    /// Token text for leaves; also set on operator nodes produced by the
    /// expression extension.
    pub token: Option<String>,
    pub children: Vec<Rc<Ast>>,
}

impl Ast {
    fn write_indented(&self, f: &mut fmt::Formatter<'_>, level: usize) -> fmt::Result {
        for _ in 0..level {
            write!(f, "  ")?;
        }
        match (&self.token, self.children.is_empty()) {
            (Some(t), true) => writeln!(f, "- {} ({})", self.name, t)?,
            (Some(t), false) => writeln!(f, "+ {} ({})", self.name, t)?,
            (None, _) => writeln!(f, "+ {}", self.name)?,
        }
        for child in &self.children {
            child.write_indented(f, level + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for Ast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

/// Folds single-child interior nodes so trees stay readable. Rule names
/// in the exception list keep their nodes.
pub struct AstOptimizer {
    exceptions: Vec<String>,
}

impl AstOptimizer {
    pub fn new(exceptions: Vec<String>) -> Self {
        Self { exceptions }
    }

    pub fn optimize(&self, ast: &Rc<Ast>) -> Rc<Ast> {
        if ast.children.len() == 1
            && ast.token.is_none()
            && !self.exceptions.iter().any(|e| e == &ast.name)
        {
            return self.optimize(&ast.children[0]);
        }
        Rc::new(Ast {
            name: ast.name.clone(),
            pos: ast.pos,
            s: ast.s.clone(),
            token: ast.token.clone(),
            children: ast.children.iter().map(|c| self.optimize(c)).collect(),
        })
    }
}

/// A leaf is a rule with an explicit token boundary, or one whose body
/// never references another rule.
fn references_no_rule(ope: &Ope) -> bool {
    match ope {
        Ope::Ref { .. } => false,
        Ope::Seq(cs) | Ope::Cho(cs) => cs.iter().all(|o| references_no_rule(o)),
        Ope::Zom(o) | Ope::Oom(o) | Ope::Opt(o) | Ope::Apd(o) | Ope::Npd(o) | Ope::Tok(o)
        | Ope::Ign(o) | Ope::Wsp(o) => references_no_rule(o),
        Ope::Lit { .. } | Ope::Cls { .. } | Ope::Dot => true,
        Ope::Prec { .. } => false,
    }
}

impl Parser {
    /// Install tree-building actions on every rule without one. Parsing
    /// then yields an `Rc<Ast>` value.
    pub fn enable_ast(&mut self) {
        let n = self.grammar.len();
        let boundary: Vec<bool> = (0..n)
            .map(|id| rule_token_props(&self.grammar, id).has_boundary)
            .collect();
        for id in 0..n {
            let rule = self.grammar.rule_mut(id);
            if rule.action.is_some()
                || rule.name == WHITESPACE_RULE
                || rule.name == WORD_RULE
            {
                continue;
            }
            let name = rule.name.clone();
            let is_leaf = boundary[id] || references_no_rule(&rule.ope);
            rule.action = Some(Rc::new(move |v: &mut Values, _: &mut dyn Any| {
                let ast = if is_leaf {
                    Ast {
                        name: name.clone(),
                        pos: v.pos,
                        s: v.text(),
                        token: Some(v.token()),
                        children: Vec::new(),
                    }
                } else {
                    let children: Vec<Rc<Ast>> = v
                        .vs
                        .iter()
                        .flatten()
                        .filter_map(|val| Rc::clone(val).downcast::<Ast>().ok())
                        .collect();
                    // An expression-extension frame is [left, op, right];
                    // keep the operator lexeme on the node.
                    let token = if v.vs.len() == 3 && children.len() == 2 {
                        v.vs[1]
                            .as_ref()
                            .and_then(|op| op.downcast_ref::<String>())
                            .cloned()
                    } else {
                        None
                    };
                    Ast {
                        name: name.clone(),
                        pos: v.pos,
                        s: v.text(),
                        token,
                        children,
                    }
                };
                Ok(Some(value(ast)))
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load;

    fn tree(grammar: &str, input: &str) -> Rc<Ast> {
        let mut p = load(grammar).unwrap();
        p.enable_ast();
        let mut d = ();
        let val = p.parse(input, &mut d).unwrap().unwrap();
        val.downcast::<Ast>().unwrap()
    }

    #[test]
    fn test_leaves_carry_tokens() {
        let ast = tree("S <- A B\nA <- 'a'\nB <- 'b'\n", "ab");
        assert_eq!(ast.name, "S");
        assert_eq!(ast.children.len(), 2);
        assert_eq!(ast.children[0].token.as_deref(), Some("a"));
        assert_eq!(ast.children[1].token.as_deref(), Some("b"));
    }

    #[test]
    fn test_boundary_rule_is_leaf() {
        let ast = tree("S <- N N\nN <- <[0-9]+> '!'\n", "1!2!");
        assert_eq!(ast.children[0].token.as_deref(), Some("1"));
        assert_eq!(ast.children[1].token.as_deref(), Some("2"));
    }

    #[test]
    fn test_display_is_indented() {
        let ast = tree("S <- A\nA <- 'a' S / 'a'\n", "aa");
        let text = format!("{ast}");
        assert!(text.starts_with("+ S\n"));
        assert!(text.contains("  + A\n"));
    }

    #[test]
    fn test_optimizer_folds_single_child_chains() {
        let ast = tree("S <- A ','\nA <- B\nB <- C\nC <- 'x' ','\n", "x,,");
        // S -> [A] plus the comma literal contributes no child, so the
        // chain A -> B -> C collapses to C.
        let folded = AstOptimizer::new(vec![]).optimize(&ast);
        assert_eq!(folded.name, "C");
        let kept = AstOptimizer::new(vec!["S".into()]).optimize(&ast);
        assert_eq!(kept.name, "S");
    }

    #[test]
    fn test_expression_nodes_keep_operator() {
        let grammar =
            "E <- E_atom\nE_atom <- <[0-9]+>\n---\n%expr = E\n%binop = L + -\n%binop = L * /\n";
        let ast = tree(grammar, "1+2*3");
        assert_eq!(ast.token.as_deref(), Some("+"));
        assert_eq!(ast.children.len(), 2);
        assert_eq!(ast.children[0].token.as_deref(), Some("1"));
        assert_eq!(ast.children[1].token.as_deref(), Some("*"));
    }
}
