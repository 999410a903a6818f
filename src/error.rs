//! Error types: schema diagnostics (aggregated) and decode errors (propagated).

use crate::eval::EvalError;
use crate::expr::Expression;
use crate::extend::MergeError;
use crate::model::{ElementKind, ElementLabel};
use crate::script::ScriptError;
use crate::value::Value;
use std::fmt;

/// A problem with the grammar itself.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("{element}: missing {attribute} attribute")]
    MissingAttribute {
        element: ElementLabel,
        attribute: &'static str,
    },
    #[error("{element}: {attribute} refers to unknown {reference}")]
    DanglingReference {
        element: ElementLabel,
        attribute: &'static str,
        reference: String,
    },
    #[error("{element}: {attribute} refers to {target}, expected a {expected}")]
    WrongTarget {
        element: ElementLabel,
        attribute: &'static str,
        target: ElementLabel,
        expected: ElementKind,
    },
    #[error("duplicate id {id}: {first} and {second}")]
    DuplicateId {
        id: u32,
        first: ElementLabel,
        second: ElementLabel,
    },
    #[error("duplicate script name {name:?}")]
    DuplicateScript { name: String },
    #[error("{element}: invalid {attribute} value {value:?}")]
    InvalidValue {
        element: ElementLabel,
        attribute: &'static str,
        value: String,
    },
    #[error("{element}: derives chain is cyclic")]
    DerivesCycle { element: ElementLabel },
    #[error("{element}: invalid repeat bounds {min}..{max}")]
    InvalidRepeats {
        element: ElementLabel,
        min: i64,
        max: i64,
    },
    #[error("{element}: invalid length {length}: {reason}")]
    InvalidLength {
        element: ElementLabel,
        length: i64,
        reason: &'static str,
    },
    #[error("{element}: refers back to itself before consuming any input")]
    EmptyRecursion { element: ElementLabel },
    #[error(transparent)]
    Merge(#[from] MergeError),
}

/// Ordered collector for schema diagnostics. Passes push into it and carry on;
/// callers check [`Errors::is_empty`] at the end.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Errors {
    errors: Vec<SchemaError>,
}

impl Errors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: impl Into<SchemaError>) {
        let err = err.into();
        tracing::warn!(error = %err, "grammar diagnostic");
        self.errors.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SchemaError> {
        self.errors.iter()
    }

    pub fn as_slice(&self) -> &[SchemaError] {
        &self.errors
    }

    pub fn into_vec(self) -> Vec<SchemaError> {
        self.errors
    }

    pub(crate) fn append(&mut self, other: Errors) {
        self.errors.extend(other.errors);
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

impl std::error::Error for Errors {}

impl IntoIterator for Errors {
    type Item = SchemaError;
    type IntoIter = std::vec::IntoIter<SchemaError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl<'a> IntoIterator for &'a Errors {
    type Item = &'a SchemaError;
    type IntoIter = std::slice::Iter<'a, SchemaError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}

/// Failure to produce a usable document.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid grammar JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{} grammar error(s):\n{0}", .0.len())]
    Invalid(Errors),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeErrorKind {
    #[error("end of input at offset {offset}: {needed} byte(s) needed, {available} available")]
    EndOfInput {
        offset: u64,
        needed: u64,
        available: u64,
    },
    #[error("at offset {offset}: {needed} byte(s) needed, enclosing structure has {available} left")]
    Overrun {
        offset: u64,
        needed: u64,
        available: u64,
    },
    #[error("{value} does not match any fixed value")]
    MustMatch { value: String },
    #[error("malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },
    #[error("unresolved {attribute} reference")]
    DanglingReference { attribute: &'static str },
    #[error("expression `{expr}`: {source}")]
    Expression {
        expr: Expression,
        #[source]
        source: EvalError,
    },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("elements nested deeper than {0}")]
    TooDeep(usize),
    #[error("not byte aligned (bit position {0})")]
    Misaligned(u64),
    #[error("script: {0}")]
    Script(#[from] ScriptError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A decode failure with the element path that led to it.
#[derive(Debug)]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    /// Names of the elements being read, outermost first.
    pub path: Vec<String>,
    /// What was decoded before the failure, offsets intact.
    pub partial: Option<Box<Value>>,
}

impl DecodeError {
    pub fn new(kind: DecodeErrorKind) -> Self {
        DecodeError {
            kind,
            path: Vec::new(),
            partial: None,
        }
    }

    /// The input ran out, as opposed to the data being wrong.
    pub fn is_eof(&self) -> bool {
        matches!(self.kind, DecodeErrorKind::EndOfInput { .. })
    }

    /// Failures that end an optional repetition instead of the decode.
    pub(crate) fn ends_repetition(&self) -> bool {
        matches!(
            self.kind,
            DecodeErrorKind::EndOfInput { .. }
                | DecodeErrorKind::Overrun { .. }
                | DecodeErrorKind::MustMatch { .. }
        )
    }

    /// A formula named a field that is not decoded (yet).
    pub(crate) fn is_unknown_name(&self) -> bool {
        matches!(
            self.kind,
            DecodeErrorKind::Expression {
                source: EvalError::UnknownName(_),
                ..
            }
        )
    }

    pub(crate) fn within(mut self, name: &str) -> Self {
        self.path.insert(0, name.to_string());
        self
    }

    pub(crate) fn with_partial(mut self, value: Value) -> Self {
        self.partial = Some(Box::new(value));
        self
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.path.join("."), self.kind)
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<DecodeErrorKind> for DecodeError {
    fn from(kind: DecodeErrorKind) -> Self {
        DecodeError::new(kind)
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(e: std::io::Error) -> Self {
        DecodeError::new(DecodeErrorKind::Io(e))
    }
}

impl From<ScriptError> for DecodeError {
    fn from(e: ScriptError) -> Self {
        DecodeError::new(DecodeErrorKind::Script(e))
    }
}
