//! Check grammar files: load, resolve and validate, then report every problem.
//!
//! Usage:
//!   ufwb_check [--human] GRAMMAR.json ...
//!
//! Exits with status 1 if any file fails to load or has a diagnostic.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use ufwb::{RawUfwb, SchemaError, Ufwb};

#[derive(Parser)]
#[command(about = "Validate UFWB grammar files")]
struct Args {
    /// Human-readable output
    #[arg(short = 'H', long)]
    human: bool,
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn rule_id(e: &SchemaError) -> &'static str {
    match e {
        SchemaError::MissingAttribute { .. } => "missing-attribute",
        SchemaError::DanglingReference { .. } => "dangling-reference",
        SchemaError::WrongTarget { .. } => "wrong-target",
        SchemaError::DuplicateId { .. } => "duplicate-id",
        SchemaError::DuplicateScript { .. } => "duplicate-script",
        SchemaError::InvalidValue { .. } => "invalid-value",
        SchemaError::DerivesCycle { .. } => "derives-cycle",
        SchemaError::InvalidRepeats { .. } => "invalid-repeats",
        SchemaError::InvalidLength { .. } => "invalid-length",
        SchemaError::EmptyRecursion { .. } => "empty-recursion",
        SchemaError::Merge(_) => "derives-mismatch",
    }
}

fn print_error(path: &str, e: &SchemaError, human: bool) {
    if human {
        println!("  {}: {}", path, e);
        println!("    rule: {}", rule_id(e));
    } else {
        println!("{}: error: {} [{}]", path, e, rule_id(e));
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut has_error = false;
    let mut total = 0usize;
    for path in &args.files {
        let shown = path.display().to_string();
        let raw: RawUfwb = match std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|text| serde_json::from_str(&text).map_err(anyhow::Error::from))
        {
            Ok(raw) => raw,
            Err(e) => {
                eprintln!("{}: {}", shown, e);
                has_error = true;
                continue;
            }
        };
        let (ufwb, errs) = Ufwb::from_raw(raw);
        if args.human && !errs.is_empty() {
            println!("{} ({} problem(s)):", shown, errs.len());
        }
        for e in &errs {
            print_error(&shown, e, args.human);
        }
        total += errs.len();
        has_error |= !errs.is_empty();
        if args.human && errs.is_empty() {
            println!("{}: ok ({} elements)", shown, ufwb.elements().len());
        }
    }
    if args.human {
        println!("{} problem(s) in {} file(s)", total, args.files.len());
    }
    if has_error {
        std::process::exit(1);
    }
    Ok(())
}
