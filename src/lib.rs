//! # ufwb: declarative binary-file grammars
//!
//! A grammar describes a binary file as a tree of elements (structures,
//! numbers, strings, binary blobs, offsets, references and script-decoded
//! custom fields) with lengths and repetition counts given as expressions.
//! This crate models grammars, resolves `derives` inheritance and references,
//! validates them into an aggregated error list and decodes byte sources into
//! an offset-accurate value tree.
//!
//! ## Pipeline
//!
//! - **Load**: [`raw`] records (JSON via serde) are converted by [`transform`]
//!   into the element model ([`model`], [`document`]).
//! - **Update**: [`Ufwb::update`] registers ids and names, merges `derives`
//!   bases with [`extend::extend`], resolves links and validates attributes.
//!   Every problem lands in one [`Errors`] aggregator.
//! - **Decode**: [`Decoder`] walks the start structure over a [`ByteSource`]
//!   and returns a [`Value`] tree. Gaps in fixed-length structures become
//!   padding values, so consecutive values tile the input.
//!
//! ## Example grammar
//!
//! ```json
//! { "version": "1.0",
//!   "grammar": { "name": "demo", "start": "file",
//!     "elements": [ { "structure": { "id": 1, "name": "file", "endian": "little",
//!       "elements": [
//!         { "number": { "id": 2, "name": "n", "length": "4" } },
//!         { "string": { "id": 3, "name": "s", "type": "zero-terminated" } } ] } } ] } }
//! ```
//!
//! ## Usage
//!
//! ```
//! let grammar = r#"{ "grammar": { "start": "file", "elements": [
//!     { "structure": { "id": 1, "name": "file", "endian": "little", "elements": [
//!         { "number": { "id": 2, "name": "n", "length": "4" } } ] } } ] } }"#;
//! let ufwb = ufwb::load_str(grammar).unwrap();
//! let root = ufwb::decode(&ufwb, &[7, 0, 0, 0]).unwrap();
//! assert_eq!(root.child(&ufwb, "n").and_then(|v| v.as_i64()), Some(7));
//! ```

pub mod decode;
pub mod document;
pub mod dump;
pub mod error;
pub mod eval;
pub mod expr;
pub mod extend;
pub mod format;
pub mod input;
pub mod model;
pub mod raw;
pub mod script;
pub mod transform;
pub mod update;
pub mod value;

pub use decode::{decode, Decoder};
pub use document::Ufwb;
pub use error::{DecodeError, DecodeErrorKind, Errors, LoadError, SchemaError};
pub use eval::{Evaluator, FormulaEvaluator, Scope};
pub use expr::Expression;
pub use extend::{extend, MergeError};
pub use format::format;
pub use input::{ByteSource, SeekSource};
pub use model::{Element, ElementIdx, ElementKind};
pub use raw::RawUfwb;
pub use script::{CustomRead, CustomValue, NoScripts, ScriptEngine, ScriptError};
pub use value::{Payload, Value};

use std::path::Path;

/// Parse a JSON grammar, transform and update it. Any diagnostic fails the load.
pub fn load_str(json: &str) -> Result<Ufwb, LoadError> {
    let raw: RawUfwb = serde_json::from_str(json)?;
    let (ufwb, errs) = Ufwb::from_raw(raw);
    if errs.is_empty() {
        Ok(ufwb)
    } else {
        Err(LoadError::Invalid(errs))
    }
}

pub fn load_file(path: impl AsRef<Path>) -> Result<Ufwb, LoadError> {
    let text = std::fs::read_to_string(path)?;
    load_str(&text)
}
