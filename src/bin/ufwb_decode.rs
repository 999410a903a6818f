//! Decode a file with a grammar and print the value tree.
//!
//! Usage:
//!   ufwb_decode [--json] [--offset N] GRAMMAR.json FILE
//!
//! On a decode failure the partially decoded tree is printed before the error.

use anyhow::Context;
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use ufwb::{dump, Decoder, SeekSource};

#[derive(Parser)]
#[command(about = "Decode a binary file with a UFWB grammar")]
struct Args {
    /// Print JSON instead of an indented tree
    #[arg(long)]
    json: bool,
    /// Byte offset to start decoding at
    #[arg(long, default_value_t = 0)]
    offset: u64,
    grammar: PathBuf,
    file: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let ufwb = ufwb::load_file(&args.grammar).with_context(|| format!("loading {}", args.grammar.display()))?;
    let file = File::open(&args.file).with_context(|| format!("opening {}", args.file.display()))?;
    let mut source = SeekSource::new(BufReader::new(file))?;

    let result = {
        let mut decoder = Decoder::new(&ufwb, &mut source);
        decoder.seek(args.offset).and_then(|()| decoder.decode())
    };
    let (value, err) = match result {
        Ok(v) => (Some(v), None),
        Err(mut e) => (e.partial.take().map(|p| *p), Some(e)),
    };
    if let Some(value) = value {
        if args.json {
            println!("{}", serde_json::to_string_pretty(&dump::to_json(&ufwb, &value))?);
        } else {
            println!("{}", dump::dump_tree(&ufwb, &value, &mut source)?);
        }
    }
    match err {
        Some(e) => Err(e).with_context(|| format!("decoding {}", args.file.display())),
        None => Ok(()),
    }
}
