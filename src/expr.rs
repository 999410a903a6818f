//! Length, repeat and offset expressions as authored in a grammar.

use serde::Serialize;
use std::fmt;

/// A constant or a formula evaluated at decode time.
///
/// Wherever an expression is optional (`Option<Expression>`), `None` means the
/// attribute was not specified: it is inherited through `derives`, or the
/// built-in default applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Expression {
    Const(i64),
    /// Arithmetic over previously decoded fields, e.g. `header.size - 4`.
    Formula(String),
}

impl Expression {
    /// `repeatmax` value meaning "as many instances as the data holds".
    pub const UNLIMITED: Expression = Expression::Const(-1);

    /// Parse an authored attribute. Empty means unset.
    pub fn parse(src: &str) -> Option<Expression> {
        let s = src.trim();
        if s.is_empty() {
            return None;
        }
        if s.eq_ignore_ascii_case("unlimited") {
            return Some(Self::UNLIMITED);
        }
        Some(match parse_int(s) {
            Some(v) => Expression::Const(v),
            None => Expression::Formula(s.to_string()),
        })
    }

    pub fn as_const(&self) -> Option<i64> {
        match self {
            Expression::Const(v) => Some(*v),
            Expression::Formula(_) => None,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Const(v) => write!(f, "{}", v),
            Expression::Formula(s) => f.write_str(s),
        }
    }
}

/// Parse an integer literal with optional sign and `0x` / `0o` / `0b` prefix.
pub(crate) fn parse_int(s: &str) -> Option<i64> {
    let (negative, rest) = match s.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (radix, digits) = if let Some(d) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        (16, d)
    } else if let Some(d) = rest.strip_prefix("0o").or_else(|| rest.strip_prefix("0O")) {
        (8, d)
    } else if let Some(d) = rest.strip_prefix("0b").or_else(|| rest.strip_prefix("0B")) {
        (2, d)
    } else {
        (10, rest)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    let magnitude = u64::from_str_radix(digits, radix).ok()? as i128;
    i64::try_from(if negative { -magnitude } else { magnitude }).ok()
}
