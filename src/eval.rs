//! Decode-time evaluation of [`Expression`]s.
//!
//! The decoder only depends on the [`Evaluator`] trait; [`FormulaEvaluator`] is the
//! default implementation, a small PEST grammar over integer arithmetic and dotted
//! references to previously decoded fields (`size`, `header.count * 4`).

use crate::expr::{parse_int, Expression};
use once_cell::sync::Lazy;
use pest::iterators::Pairs;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser as PestParser;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(PestParser)]
#[grammar = "formula.pest"]
struct FormulaParser;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("unknown field `{0}`")]
    UnknownName(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("arithmetic overflow")]
    Overflow,
}

/// Named lookups into already-decoded values.
pub trait Scope {
    /// Resolve a (possibly dotted) field path to its numeric value.
    fn lookup(&self, path: &str) -> Option<i64>;
}

/// Scope with no names, for expressions evaluated outside any structure.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyScope;

impl Scope for EmptyScope {
    fn lookup(&self, _path: &str) -> Option<i64> {
        None
    }
}

impl Scope for HashMap<String, i64> {
    fn lookup(&self, path: &str) -> Option<i64> {
        self.get(path).copied()
    }
}

/// Turns an expression into a concrete value in a scope.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, expr: &Expression, scope: &dyn Scope) -> Result<i64, EvalError>;
}

/// The built-in formula language.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormulaEvaluator;

impl Evaluator for FormulaEvaluator {
    fn evaluate(&self, expr: &Expression, scope: &dyn Scope) -> Result<i64, EvalError> {
        match expr {
            Expression::Const(v) => Ok(*v),
            Expression::Formula(text) => evaluate_formula(text, scope),
        }
    }
}

static PRATT: Lazy<PrattParser<Rule>> = Lazy::new(|| {
    PrattParser::new()
        .op(Op::infix(Rule::bor, Assoc::Left))
        .op(Op::infix(Rule::bxor, Assoc::Left))
        .op(Op::infix(Rule::band, Assoc::Left))
        .op(Op::infix(Rule::shl, Assoc::Left) | Op::infix(Rule::shr, Assoc::Left))
        .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
        .op(Op::infix(Rule::mul, Assoc::Left)
            | Op::infix(Rule::div, Assoc::Left)
            | Op::infix(Rule::rem, Assoc::Left))
        .op(Op::prefix(Rule::neg) | Op::prefix(Rule::bnot))
});

/// Parsed formulas by source text, shared by every decode.
static COMPILED: Lazy<RwLock<HashMap<String, Arc<Node>>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// A parsed formula.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Number(i64),
    Path(String),
    Prefix(Rule, Box<Node>),
    Infix(Rule, Box<Node>, Box<Node>),
}

/// Parse and evaluate a formula string.
pub fn evaluate_formula(text: &str, scope: &dyn Scope) -> Result<i64, EvalError> {
    let node = compiled(text)?;
    eval_node(&node, scope)
}

fn compiled(text: &str) -> Result<Arc<Node>, EvalError> {
    if let Some(node) = COMPILED.read().ok().and_then(|m| m.get(text).cloned()) {
        return Ok(node);
    }
    let node = Arc::new(parse_formula(text)?);
    if let Ok(mut m) = COMPILED.write() {
        m.insert(text.to_string(), node.clone());
    }
    Ok(node)
}

fn parse_formula(text: &str) -> Result<Node, EvalError> {
    let formula = FormulaParser::parse(Rule::formula, text)
        .map_err(|e| EvalError::Parse(e.to_string()))?
        .next()
        .ok_or_else(|| EvalError::Parse("empty formula".to_string()))?;
    let expr = formula
        .into_inner()
        .next()
        .ok_or_else(|| EvalError::Parse("empty formula".to_string()))?;
    build(expr.into_inner())
}

fn build(pairs: Pairs<Rule>) -> Result<Node, EvalError> {
    PRATT
        .map_primary(|primary| match primary.as_rule() {
            Rule::number => parse_int(primary.as_str())
                .map(Node::Number)
                .ok_or_else(|| EvalError::Parse(format!("invalid number {}", primary.as_str()))),
            Rule::path => Ok(Node::Path(primary.as_str().to_string())),
            Rule::expr => build(primary.into_inner()),
            rule => Err(EvalError::Parse(format!("unexpected {:?}", rule))),
        })
        .map_prefix(|op, rhs| Ok(Node::Prefix(op.as_rule(), Box::new(rhs?))))
        .map_infix(|lhs, op, rhs| Ok(Node::Infix(op.as_rule(), Box::new(lhs?), Box::new(rhs?))))
        .parse(pairs)
}

fn eval_node(node: &Node, scope: &dyn Scope) -> Result<i64, EvalError> {
    match node {
        Node::Number(v) => Ok(*v),
        Node::Path(path) => scope
            .lookup(path)
            .ok_or_else(|| EvalError::UnknownName(path.clone())),
        Node::Prefix(op, rhs) => {
            let rhs = eval_node(rhs, scope)?;
            match op {
                Rule::neg => rhs.checked_neg().ok_or(EvalError::Overflow),
                Rule::bnot => Ok(!rhs),
                rule => Err(EvalError::Parse(format!("unexpected prefix {:?}", rule))),
            }
        }
        Node::Infix(op, lhs, rhs) => {
            let (lhs, rhs) = (eval_node(lhs, scope)?, eval_node(rhs, scope)?);
            match op {
                Rule::add => lhs.checked_add(rhs).ok_or(EvalError::Overflow),
                Rule::sub => lhs.checked_sub(rhs).ok_or(EvalError::Overflow),
                Rule::mul => lhs.checked_mul(rhs).ok_or(EvalError::Overflow),
                Rule::div if rhs == 0 => Err(EvalError::DivisionByZero),
                Rule::div => lhs.checked_div(rhs).ok_or(EvalError::Overflow),
                Rule::rem if rhs == 0 => Err(EvalError::DivisionByZero),
                Rule::rem => lhs.checked_rem(rhs).ok_or(EvalError::Overflow),
                Rule::shl => u32::try_from(rhs)
                    .ok()
                    .and_then(|s| lhs.checked_shl(s))
                    .ok_or(EvalError::Overflow),
                Rule::shr => u32::try_from(rhs)
                    .ok()
                    .and_then(|s| lhs.checked_shr(s))
                    .ok_or(EvalError::Overflow),
                Rule::band => Ok(lhs & rhs),
                Rule::bor => Ok(lhs | rhs),
                Rule::bxor => Ok(lhs ^ rhs),
                rule => Err(EvalError::Parse(format!("unexpected operator {:?}", rule))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(text: &str) -> Result<i64, EvalError> {
        evaluate_formula(text, &EmptyScope)
    }

    #[test]
    fn precedence_follows_c() {
        assert_eq!(eval("1 + 2 * 3"), Ok(7));
        assert_eq!(eval("(1 + 2) * 3"), Ok(9));
        assert_eq!(eval("1 << 2 + 1"), Ok(8));
        assert_eq!(eval("0xF0 | 0x0F & 0x3"), Ok(0xF3));
        assert_eq!(eval("-2 * -3"), Ok(6));
        assert_eq!(eval("~0"), Ok(-1));
        assert_eq!(eval("17 % 5 - 10 / 3"), Ok(-1));
    }

    #[test]
    fn paths_resolve_through_the_scope() {
        let mut scope = HashMap::new();
        scope.insert("size".to_string(), 12);
        scope.insert("header.count".to_string(), 3);
        let e = FormulaEvaluator;
        let expr = Expression::Formula("size - header.count * 2".to_string());
        assert_eq!(e.evaluate(&expr, &scope), Ok(6));
        let missing = Expression::Formula("other + 1".to_string());
        assert_eq!(
            e.evaluate(&missing, &scope),
            Err(EvalError::UnknownName("other".to_string()))
        );
    }

    #[test]
    fn arithmetic_errors_are_reported() {
        assert_eq!(eval("1 / 0"), Err(EvalError::DivisionByZero));
        assert_eq!(eval("1 % 0"), Err(EvalError::DivisionByZero));
        assert_eq!(eval("0x7fffffffffffffff + 1"), Err(EvalError::Overflow));
        assert!(matches!(eval("1 +"), Err(EvalError::Parse(_))));
        assert!(matches!(eval(""), Err(EvalError::Parse(_))));
    }

    #[test]
    fn formulas_are_parsed_once() {
        let text = "cached_width * 2 + 1";
        let first = compiled(text).unwrap();
        let second = compiled(text).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        let mut scope = HashMap::new();
        scope.insert("cached_width".to_string(), 4);
        assert_eq!(evaluate_formula(text, &scope), Ok(9));
        scope.insert("cached_width".to_string(), 5);
        assert_eq!(evaluate_formula(text, &scope), Ok(11));
    }

    #[test]
    fn constants_skip_the_parser() {
        assert_eq!(
            FormulaEvaluator.evaluate(&Expression::Const(42), &EmptyScope),
            Ok(42)
        );
    }
}
