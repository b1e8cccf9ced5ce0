//! The bootstrap meta-grammar.
//!
//! A hard-coded grammar for PEG syntax itself, built with the engine's
//! own constructors and linked by the engine's own linker. Its semantic
//! actions construct operator trees and install rules and options into
//! the loader's scratch data while the grammar text is being consumed.

use std::any::Any;
use std::rc::Rc;

use rpeg_engine::ope::{
    apd, cho, cls, dot, ign, lit, lit_bytes, npd, oom, opt, reference, seq, tok, zom, Ope,
};
use rpeg_engine::rule::ActionResult;
use rpeg_engine::values::value;
use rpeg_engine::{Grammar, Rule, Values};

use crate::escape::resolve_escapes;

/// Scratch state filled by the bootstrap actions while grammar text is
/// parsed.
#[derive(Default)]
pub(crate) struct LoaderData {
    pub grammar: Grammar,
    /// Redefinitions, recorded with their source positions so every one
    /// can be reported.
    pub duplicates: Vec<(String, usize)>,
    /// `name = value` pairs from the option section, in source order.
    pub options: Vec<(String, String)>,
}

/// Downcast the user data threaded through a bootstrap parse.
///
/// # Panics
///
/// Panics when called with anything but the loader's own data, which
/// would be a bug in the loader.
fn loader(d: &mut dyn Any) -> &mut LoaderData {
    d.downcast_mut().expect("bootstrap actions run with LoaderData")
}

fn set_action(
    g: &mut Grammar,
    name: &str,
    action: impl for<'s> Fn(&mut Values<'s>, &mut dyn Any) -> ActionResult + 'static,
) {
    g.get_mut(name).expect("bootstrap rule exists").action = Some(Rc::new(action));
}

fn set_ignore(g: &mut Grammar, name: &str) {
    g.get_mut(name).expect("bootstrap rule exists").ignore = true;
}

/// Build and link the meta-grammar. Cheap enough to construct per load.
pub(crate) fn meta_grammar() -> Grammar {
    let mut g = Grammar::new();
    let r = |name: &str| reference(name, vec![], 0);

    let mut add = |name: &str, ope: Rc<Ope>| {
        g.add_rule(Rule::new(name, 0, ope))
            .expect("bootstrap rule names are unique");
    };

    add(
        "Start",
        seq(vec![
            r("Spacing"),
            oom(r("Definition")),
            opt(seq(vec![r("SEPARATOR"), oom(r("Option"))])),
            r("EndOfFile"),
        ]),
    );
    add(
        "Definition",
        cho(vec![
            seq(vec![
                r("Ignore"),
                r("IdentCont"),
                r("Parameters"),
                r("LEFTARROW"),
                r("Expression"),
            ]),
            seq(vec![
                r("Ignore"),
                r("Identifier"),
                r("LEFTARROW"),
                r("Expression"),
            ]),
        ]),
    );
    add(
        "Expression",
        seq(vec![
            r("Sequence"),
            zom(seq(vec![r("SLASH"), r("Sequence")])),
        ]),
    );
    add("Sequence", zom(r("Prefix")));
    add(
        "Prefix",
        seq(vec![opt(cho(vec![r("AND"), r("NOT")])), r("Suffix")]),
    );
    add(
        "Suffix",
        seq(vec![
            r("Primary"),
            opt(cho(vec![r("QUESTION"), r("STAR"), r("PLUS")])),
        ]),
    );
    add(
        "Primary",
        cho(vec![
            seq(vec![
                r("Ignore"),
                r("IdentCont"),
                r("Arguments"),
                npd(r("LEFTARROW")),
            ]),
            seq(vec![
                r("Ignore"),
                r("Identifier"),
                npd(seq(vec![opt(r("Parameters")), r("LEFTARROW")])),
            ]),
            seq(vec![r("OPEN"), r("Expression"), r("CLOSE")]),
            seq(vec![r("BeginTok"), r("Expression"), r("EndTok")]),
            r("Literal"),
            r("Class"),
            r("DOT"),
        ]),
    );
    add("Identifier", seq(vec![r("IdentCont"), r("Spacing")]));
    add("IdentCont", seq(vec![r("IdentStart"), zom(r("IdentRest"))]));
    add("IdentStart", cls(b"a-zA-Z_\x80-\xff%"));
    add("IdentRest", cho(vec![r("IdentStart"), cls(b"0-9")]));
    add(
        "Literal",
        cho(vec![
            seq(vec![
                lit("'"),
                tok(zom(seq(vec![npd(lit("'")), r("Char")]))),
                lit("'"),
                r("Spacing"),
            ]),
            seq(vec![
                lit("\""),
                tok(zom(seq(vec![npd(lit("\"")), r("Char")]))),
                lit("\""),
                r("Spacing"),
            ]),
        ]),
    );
    add(
        "Class",
        seq(vec![
            lit("["),
            tok(zom(seq(vec![npd(lit("]")), r("Range")]))),
            lit("]"),
            r("Spacing"),
        ]),
    );
    add(
        "Range",
        cho(vec![
            seq(vec![r("Char"), lit("-"), r("Char")]),
            r("Char"),
        ]),
    );
    add(
        "Char",
        cho(vec![
            seq(vec![lit("\\"), cls(br#"nrtfv'"[]\"#)]),
            seq(vec![lit("\\"), cls(b"0-3"), cls(b"0-7"), cls(b"0-7")]),
            seq(vec![lit("\\"), cls(b"0-7"), opt(cls(b"0-7"))]),
            seq(vec![
                lit("\\x"),
                cls(b"0-9a-fA-F"),
                opt(cls(b"0-9a-fA-F")),
            ]),
            seq(vec![npd(lit("\\")), dot()]),
        ]),
    );
    add(
        "LEFTARROW",
        seq(vec![cho(vec![lit("<-"), lit("←")]), r("Spacing")]),
    );
    add("SLASH", seq(vec![lit("/"), r("Spacing")]));
    add("AND", seq(vec![lit("&"), r("Spacing")]));
    add("NOT", seq(vec![lit("!"), r("Spacing")]));
    add("QUESTION", seq(vec![lit("?"), r("Spacing")]));
    add("STAR", seq(vec![lit("*"), r("Spacing")]));
    add("PLUS", seq(vec![lit("+"), r("Spacing")]));
    add("OPEN", seq(vec![lit("("), r("Spacing")]));
    add("CLOSE", seq(vec![lit(")"), r("Spacing")]));
    add("DOT", seq(vec![lit("."), r("Spacing")]));
    add("Spacing", zom(cho(vec![r("Space"), r("Comment")])));
    add(
        "Comment",
        seq(vec![
            lit("#"),
            zom(seq(vec![npd(r("EndOfLine")), dot()])),
            r("EndOfLine"),
        ]),
    );
    add("Space", cho(vec![lit(" "), lit("\t"), r("EndOfLine")]));
    add("EndOfLine", cho(vec![lit("\r\n"), lit("\n"), lit("\r")]));
    add("EndOfFile", npd(dot()));
    add("BeginTok", seq(vec![lit("<"), r("Spacing")]));
    add("EndTok", seq(vec![lit(">"), r("Spacing")]));
    add("IGNORE", lit("~"));
    add("Ignore", opt(r("IGNORE")));
    add(
        "Parameters",
        seq(vec![
            r("OPEN"),
            r("Identifier"),
            zom(seq(vec![r("COMMA"), r("Identifier")])),
            r("CLOSE"),
        ]),
    );
    add(
        "Arguments",
        seq(vec![
            r("OPEN"),
            r("Expression"),
            zom(seq(vec![r("COMMA"), r("Expression")])),
            r("CLOSE"),
        ]),
    );
    add("COMMA", seq(vec![lit(","), r("Spacing")]));
    add(
        "Option",
        seq(vec![r("Identifier"), r("ASSIGN"), r("OptionValue")]),
    );
    add(
        "OptionComment",
        seq(vec![
            zom(cho(vec![lit(" "), lit("\t")])),
            cho(vec![r("Comment"), r("EndOfLine")]),
        ]),
    );
    add(
        "OptionValue",
        seq(vec![
            tok(zom(seq(vec![npd(r("OptionComment")), dot()]))),
            r("OptionComment"),
            r("Spacing"),
        ]),
    );
    add("ASSIGN", seq(vec![lit("="), r("Spacing")]));
    add("SEPARATOR", seq(vec![lit("---"), r("Spacing")]));

    for name in ["SLASH", "OPEN", "CLOSE", "BeginTok", "EndTok", "COMMA"] {
        set_ignore(&mut g, name);
    }

    install_actions(&mut g);

    g.link().expect("bootstrap grammar is well formed");
    g
}

fn install_actions(g: &mut Grammar) {
    set_action(g, "Definition", |v: &mut Values, d: &mut dyn Any| {
        let (ignore, name, params, ope) = match v.choice {
            0 => (
                v.to_bool(0),
                v.to_str(1),
                v.to::<Vec<String>>(2),
                v.to_ope(4),
            ),
            _ => (v.to_bool(0), v.to_str(1), Vec::new(), v.to_ope(3)),
        };
        let mut rule = Rule::new(&name, v.pos, ope);
        rule.ignore = ignore;
        rule.params = params;
        let data = loader(d);
        if data.grammar.add_rule(rule).is_none() {
            data.duplicates.push((name, v.pos));
        }
        Ok(None)
    });

    set_action(g, "Parameters", |v: &mut Values, _: &mut dyn Any| {
        let params: Vec<String> = (0..v.len()).map(|i| v.to_str(i)).collect();
        Ok(Some(value(params)))
    });

    set_action(g, "Arguments", |v: &mut Values, _: &mut dyn Any| {
        let args: Vec<Rc<Ope>> = (0..v.len()).map(|i| v.to_ope(i)).collect();
        Ok(Some(value(args)))
    });

    set_action(g, "Expression", |v: &mut Values, _: &mut dyn Any| {
        let ope = if v.len() == 1 {
            v.to_ope(0)
        } else {
            cho((0..v.len()).map(|i| v.to_ope(i)).collect())
        };
        Ok(Some(value(ope)))
    });

    set_action(g, "Sequence", |v: &mut Values, _: &mut dyn Any| {
        let ope = if v.len() == 1 {
            v.to_ope(0)
        } else {
            seq((0..v.len()).map(|i| v.to_ope(i)).collect())
        };
        Ok(Some(value(ope)))
    });

    set_action(g, "Prefix", |v: &mut Values, _: &mut dyn Any| {
        let ope = if v.len() == 1 {
            v.to_ope(0)
        } else {
            let body = v.to_ope(1);
            match v.to_str(0).as_str() {
                "&" => apd(body),
                _ => npd(body),
            }
        };
        Ok(Some(value(ope)))
    });

    set_action(g, "Suffix", |v: &mut Values, _: &mut dyn Any| {
        let body = v.to_ope(0);
        let ope = if v.len() == 1 {
            body
        } else {
            match v.to_str(1).as_str() {
                "?" => opt(body),
                "*" => zom(body),
                _ => oom(body),
            }
        };
        Ok(Some(value(ope)))
    });

    set_action(g, "Primary", |v: &mut Values, _: &mut dyn Any| {
        let ope = match v.choice {
            // Reference, with or without macro arguments.
            0 | 1 => {
                let ignore = v.to_bool(0);
                let ident = v.to_str(1);
                let args = if v.choice == 0 {
                    v.to::<Vec<Rc<Ope>>>(2)
                } else {
                    Vec::new()
                };
                let re = reference(&ident, args, v.pos);
                if ignore {
                    ign(re)
                } else {
                    re
                }
            }
            // Parenthesized expression.
            2 => v.to_ope(0),
            // Token boundary.
            3 => tok(v.to_ope(0)),
            _ => v.to_ope(0),
        };
        Ok(Some(value(ope)))
    });

    set_action(g, "IdentCont", |v: &mut Values, _: &mut dyn Any| Ok(Some(value(v.text()))));

    set_action(g, "Literal", |v: &mut Values, _: &mut dyn Any| {
        Ok(Some(value(lit_bytes(resolve_escapes(v.ts[0]), false))))
    });

    set_action(g, "Class", |v: &mut Values, _: &mut dyn Any| {
        Ok(Some(value(cls(&resolve_escapes(v.ts[0])))))
    });

    for name in ["AND", "NOT", "QUESTION", "STAR", "PLUS"] {
        set_action(g, name, |v: &mut Values, _: &mut dyn Any| {
            Ok(Some(value(
                String::from_utf8_lossy(&v.s[..1]).into_owned(),
            )))
        });
    }

    set_action(g, "DOT", |_: &mut Values, _: &mut dyn Any| Ok(Some(value(dot()))));

    set_action(g, "Ignore", |v: &mut Values, _: &mut dyn Any| Ok(Some(value(v.len() != 0))));

    set_action(g, "Option", |v: &mut Values, d: &mut dyn Any| {
        let name = v.to_str(0);
        let val = v.to_str(2);
        loader(d).options.push((name, val));
        Ok(None)
    });

    set_action(g, "OptionValue", |v: &mut Values, _: &mut dyn Any| Ok(Some(value(v.token()))));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_text(text: &str) -> LoaderData {
        let meta = meta_grammar();
        let mut data = LoaderData::default();
        meta.parse(text, &mut data).expect("meta parse");
        data
    }

    #[test]
    fn test_meta_grammar_links() {
        let g = meta_grammar();
        assert_eq!(g.start_rule().name, "Start");
        assert!(g.len() > 30);
    }

    #[test]
    fn test_single_definition() {
        let data = parse_text("S <- 'a' 'b'\n");
        assert_eq!(data.grammar.len(), 1);
        let s = data.grammar.get("S").unwrap();
        assert!(matches!(&*s.ope, Ope::Seq(cs) if cs.len() == 2));
        assert_eq!(data.grammar.start_rule().name, "S");
    }

    #[test]
    fn test_first_rule_is_start() {
        let data = parse_text("A <- 'a'\nB <- 'b'\n");
        assert_eq!(data.grammar.start_rule().name, "A");
    }

    #[test]
    fn test_duplicates_are_recorded_not_fatal() {
        let data = parse_text("S <- 'a'\nS <- 'b'\n");
        assert_eq!(data.duplicates.len(), 1);
        assert_eq!(data.duplicates[0].0, "S");
    }

    #[test]
    fn test_macro_definition() {
        let data = parse_text("S <- L('x')\nL(elem) <- elem (',' elem)*\n");
        let l = data.grammar.get("L").unwrap();
        assert_eq!(l.params, vec!["elem".to_string()]);
        assert!(matches!(&*data.grammar.get("S").unwrap().ope,
            Ope::Ref { args, .. } if args.len() == 1));
    }

    #[test]
    fn test_ignore_marker() {
        let data = parse_text("~Sp <- ' '*\nS <- 'a'\n");
        assert!(data.grammar.get("Sp").unwrap().ignore);
        assert!(!data.grammar.get("S").unwrap().ignore);
    }

    #[test]
    fn test_options_after_separator() {
        let data = parse_text("S <- 'a'\n---\n%expr = S\n%binop = L + -\n");
        assert_eq!(
            data.options,
            vec![
                ("%expr".to_string(), "S".to_string()),
                ("%binop".to_string(), "L + -".to_string()),
            ]
        );
    }

    #[test]
    fn test_comments_and_unicode_arrow() {
        let data = parse_text("# a grammar\nS ← 'a' # trailing\n");
        assert!(data.grammar.get("S").is_some());
    }

    #[test]
    fn test_escape_sequences_in_literal() {
        let data = parse_text(r"S <- '\n\x41\101'");
        let s = data.grammar.get("S").unwrap();
        match &*s.ope {
            Ope::Lit { text, .. } => assert_eq!(text, b"\nAA"),
            other => panic!("expected literal, got {other:?}"),
        }
    }

    #[test]
    fn test_token_boundary_and_class() {
        let data = parse_text("S <- <[0-9]+>\n");
        let s = data.grammar.get("S").unwrap();
        assert!(matches!(&*s.ope, Ope::Tok(_)));
    }

    #[test]
    fn test_prefix_suffix_operators() {
        let data = parse_text("S <- &'a' !'b' 'c'? 'd'* 'e'+\n");
        let s = data.grammar.get("S").unwrap();
        match &*s.ope {
            Ope::Seq(cs) => {
                assert!(matches!(&*cs[0], Ope::Apd(_)));
                assert!(matches!(&*cs[1], Ope::Npd(_)));
                assert!(matches!(&*cs[2], Ope::Opt(_)));
                assert!(matches!(&*cs[3], Ope::Zom(_)));
                assert!(matches!(&*cs[4], Ope::Oom(_)));
            }
            other => panic!("expected sequence, got {other:?}"),
        }
    }
}
