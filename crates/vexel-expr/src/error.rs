//! Diagnostics collected during parsing and the prep pass.
//!
//! Errors are collected, not thrown: every prep rule that fails appends one
//! diagnostic to the owning [`Expression`](crate::Expression)'s list, poisons
//! its own type, and keeps going so a single pass reports every problem.

use logos::Span;
use thiserror::Error;

use crate::types::ExprType;

/// A diagnostic anchored to a byte range of the source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

/// Everything that can go wrong while turning source text into a typed AST.
///
/// The message texts are part of the engine's observable behavior; hosts
/// match on their prefixes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("No variable named ${0}")]
    UndefinedVariable(String),

    #[error("Function {0} has no definition")]
    UndefinedFunction(String),

    #[error("Too few args for function {0}")]
    TooFewArgs(String),

    #[error("Too many args for function {0}")]
    TooManyArgs(String),

    /// A node required a specific type *in* a syntactic position
    /// (condition slots, vector literal lanes).
    #[error("Expected {expected} type in {context} but found {found}")]
    ExpectedTypeIn {
        expected: ExprType,
        context: String,
        found: ExprType,
    },

    /// A node required a specific type *from* an operand.
    #[error("Expected {expected} type from {context} but found {found}")]
    ExpectedTypeFrom {
        expected: ExprType,
        context: String,
        found: ExprType,
    },

    #[error("Types {left} and {right} are not compatible types for {op} operator")]
    IncompatibleOperands {
        left: ExprType,
        right: ExprType,
        op: &'static str,
    },

    #[error("Types of variables do not match after if statement")]
    ScopeMismatch,
}
