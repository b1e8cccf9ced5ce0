use std::cell::Cell;
use std::fs;
use std::io::Read;
use std::process::ExitCode;

use clap::Parser;
use rpeg_grammar::engine::{Tracer, Value};
use rpeg_grammar::{Ast, AstOptimizer};

#[derive(Parser)]
#[command(name = "rpeg")]
#[command(about = "rpeg — check a PEG grammar and parse source text against it")]
#[command(version)]
struct Cli {
    /// Grammar file path
    grammar: String,

    /// Source file to parse ('-' reads stdin)
    #[arg(short = 'f', long = "file")]
    file: Option<String>,

    /// Source text to parse
    #[arg(short = 's', long = "source")]
    source: Option<String>,

    /// Print the syntax tree of the source
    #[arg(long)]
    ast: bool,

    /// Print the optimized syntax tree of the source
    #[arg(long)]
    opt: bool,

    /// Trace rule entry and exit on stderr
    #[arg(long)]
    trace: bool,

    /// Retry after errors, resynchronizing on common delimiters
    #[arg(long)]
    recovery: bool,

    /// Maximum number of errors reported in recovery mode
    #[arg(long = "max-errors", default_value_t = 10)]
    max_errors: usize,
}

/// Indenting tracer in the classic peglint style; `*` marks backtracking.
#[derive(Default)]
struct PrintTracer {
    level: Cell<usize>,
    prev_pos: Cell<usize>,
}

impl Tracer for PrintTracer {
    fn enter(&self, rule: &str, pos: usize) {
        let level = self.level.get();
        let backtrack = if pos < self.prev_pos.get() { "*" } else { "" };
        eprintln!("{pos}:{level}{backtrack}\t{}{rule}", "  ".repeat(level));
        self.prev_pos.set(pos);
        self.level.set(level + 1);
    }

    fn leave(&self, rule: &str, pos: usize, result: Option<usize>) {
        let level = self.level.get().saturating_sub(1);
        self.level.set(level);
        let indent = "  ".repeat(level);
        match result {
            Some(len) => eprintln!("{pos}:{level}\t{indent}{rule} (matched, len={len})"),
            None => eprintln!("{pos}:{level}\t{indent}{rule} (failed)"),
        }
    }
}

fn read_source(cli: &Cli) -> Result<Option<String>, String> {
    if let Some(text) = &cli.source {
        return Ok(Some(text.clone()));
    }
    let Some(path) = &cli.file else {
        return Ok(None);
    };
    if path == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(|e| format!("stdin: {e}"))?;
        Ok(Some(text))
    } else {
        fs::read_to_string(path)
            .map(Some)
            .map_err(|e| format!("{path}: {e}"))
    }
}

fn print_tree(value: Option<Value>, optimize: bool) {
    let Some(value) = value else {
        return;
    };
    let Ok(ast) = value.downcast::<Ast>() else {
        return;
    };
    let ast = if optimize {
        AstOptimizer::new(Vec::new()).optimize(&ast)
    } else {
        ast
    };
    print!("{ast}");
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let grammar_text = match fs::read_to_string(&cli.grammar) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("rpeg: {}: {e}", cli.grammar);
            return ExitCode::FAILURE;
        }
    };

    let mut parser = match rpeg_grammar::load(&grammar_text) {
        Ok(parser) => parser,
        Err(e) => {
            for detail in &e.details {
                eprintln!("{}: {detail}", cli.grammar);
            }
            return ExitCode::FAILURE;
        }
    };

    let source = match read_source(&cli) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("rpeg: {e}");
            return ExitCode::FAILURE;
        }
    };
    let Some(source) = source else {
        // No source given: the grammar check alone was the job.
        return ExitCode::SUCCESS;
    };

    if cli.trace {
        parser.set_tracer(Box::new(PrintTracer::default()));
    }
    if cli.ast || cli.opt {
        parser.enable_ast();
    }

    if cli.recovery {
        parser.recovery_enabled = true;
        parser.max_errors = cli.max_errors;
        let (value, errors) = parser.parse_with_recovery(&source, &mut ());
        for (i, e) in errors.iter().enumerate() {
            eprintln!("error #{}: {e}", i + 1);
            if !e.expected.is_empty() {
                eprintln!("  expected: {}", e.expected.join(", "));
            }
        }
        if cli.ast || cli.opt {
            print_tree(value, cli.opt);
        }
        if errors.is_empty() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    } else {
        match parser.parse(&source, &mut ()) {
            Ok(value) => {
                if cli.ast || cli.opt {
                    print_tree(value, cli.opt);
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                if !e.line_text.is_empty() {
                    eprintln!("{}", e.line_text);
                }
                if !e.expected.is_empty() {
                    eprintln!("expected: {}", e.expected.join(", "));
                }
                ExitCode::FAILURE
            }
        }
    }
}
