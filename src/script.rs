//! Script engine capability used by Custom elements.
//!
//! Script bodies are opaque to this crate. A decode that meets a Custom element
//! hands the script, the cursor position and the byte source to the engine and
//! gets back how many bytes the field spans plus its display text.

use crate::input::ByteSource;
use crate::model::Script;

/// Everything a script needs to decode one Custom field.
pub struct CustomRead<'a> {
    pub script: &'a Script,
    /// Name of the Custom element being decoded.
    pub element: &'a str,
    pub offset: u64,
    /// The element's `length`, in bytes, when it has one.
    pub length_hint: Option<u64>,
    pub source: &'a mut dyn ByteSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomValue {
    /// Bytes consumed from `offset`.
    pub length: u64,
    pub display: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("no engine for {language} script {name:?}")]
    Unavailable { name: String, language: String },
    #[error("script {name:?} failed: {message}")]
    Failed { name: String, message: String },
}

pub trait ScriptEngine: Send + Sync {
    fn run_custom(&self, read: CustomRead<'_>) -> Result<CustomValue, ScriptError>;
}

/// Engine that runs nothing; every Custom element fails to decode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoScripts;

impl ScriptEngine for NoScripts {
    fn run_custom(&self, read: CustomRead<'_>) -> Result<CustomValue, ScriptError> {
        Err(ScriptError::Unavailable {
            name: read.script.name.clone(),
            language: read
                .script
                .language
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }
}
