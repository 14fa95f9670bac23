use miette::Diagnostic;
use thiserror::Error;

use crate::ast::Span;
use crate::operator::Arity;

/// Failure to turn source text into an expression tree.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
pub enum ParseError {
    #[error("Input too large: {size} bytes exceeds the limit of {limit} bytes")]
    #[diagnostic(code(qwed::parse::input_too_large))]
    InputTooLarge { size: usize, limit: usize },

    #[error("Syntax error at byte {position}: expected {expected}, found {found}")]
    #[diagnostic(code(qwed::parse::syntax))]
    Syntax {
        position: usize,
        expected: String,
        found: String,
        #[label("here")]
        span: miette::SourceSpan,
    },

    #[error("Unknown operator '{name}'")]
    #[diagnostic(
        code(qwed::parse::unknown_operator),
        help("operators are AND OR NOT IMPLIES IFF XOR EQ NE GT GE LT LE PLUS MINUS MULT DIV MOD POW ABS NEG FORALL EXISTS LEN GET SET SUM")
    )]
    UnknownOperator {
        name: String,
        position: usize,
        #[label("not an operator")]
        span: miette::SourceSpan,
    },

    #[error("Integer literal '{literal}' does not fit in 64 bits")]
    #[diagnostic(code(qwed::parse::integer_range))]
    IntegerOutOfRange {
        literal: String,
        position: usize,
        #[label("out of range")]
        span: miette::SourceSpan,
    },

    #[error("Nesting depth exceeds the limit of {limit}")]
    #[diagnostic(code(qwed::parse::depth))]
    DepthExceeded {
        limit: usize,
        position: usize,
        #[label("too deep")]
        span: miette::SourceSpan,
    },
}

impl ParseError {
    pub fn syntax(span: Span, expected: impl Into<String>, found: impl Into<String>) -> Self {
        ParseError::Syntax {
            position: span.start,
            expected: expected.into(),
            found: found.into(),
            span: span.into(),
        }
    }

    /// Byte offset of the failure, when one applies.
    pub fn position(&self) -> Option<usize> {
        match self {
            ParseError::InputTooLarge { .. } => None,
            ParseError::Syntax { position, .. }
            | ParseError::UnknownOperator { position, .. }
            | ParseError::IntegerOutOfRange { position, .. }
            | ParseError::DepthExceeded { position, .. } => Some(*position),
        }
    }
}

/// A parsed tree that falls outside the accepted vocabulary or limits.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{operator} expects {expected} operand(s), found {found}")]
    #[diagnostic(code(qwed::validate::arity))]
    ArityMismatch {
        operator: &'static str,
        expected: Arity,
        found: usize,
        #[label("wrong number of operands")]
        span: miette::SourceSpan,
    },

    #[error("Expression depth exceeds the limit of {limit}")]
    #[diagnostic(code(qwed::validate::depth))]
    DepthExceeded {
        limit: usize,
        #[label("too deep")]
        span: miette::SourceSpan,
    },

    #[error("Expression has more than {limit} nodes")]
    #[diagnostic(code(qwed::validate::node_count))]
    NodeCountExceeded {
        limit: usize,
        #[label("limit reached here")]
        span: miette::SourceSpan,
    },

    #[error("{quantifier} binders must be plain variables")]
    #[diagnostic(
        code(qwed::validate::binder),
        help("write (FORALL x y body): every operand but the last is a variable")
    )]
    InvalidBinder {
        quantifier: &'static str,
        #[label("not a variable")]
        span: miette::SourceSpan,
    },

    #[error("Variable '{name}' is bound twice by the same quantifier")]
    #[diagnostic(code(qwed::validate::duplicate_binder))]
    DuplicateBinder {
        name: String,
        #[label("duplicate")]
        span: miette::SourceSpan,
    },

    #[error("Variable '{name}' is already bound by an enclosing quantifier")]
    #[diagnostic(code(qwed::validate::shadowed_binder))]
    ShadowedBinder {
        name: String,
        #[label("rebinds an enclosing variable")]
        span: miette::SourceSpan,
    },

    #[error("Bound variable '{name}' has sort {bound} but the free variable of the same name has sort {free}")]
    #[diagnostic(code(qwed::validate::binder_conflict))]
    BinderSortConflict {
        name: String,
        bound: String,
        free: String,
        #[label("conflicting binder")]
        span: miette::SourceSpan,
    },

    #[error("Bound variable '{name}' must be Int or Real, found {sort}")]
    #[diagnostic(code(qwed::validate::binder_sort))]
    UnsupportedBinderSort {
        name: String,
        sort: String,
        #[label("unsupported binder sort")]
        span: miette::SourceSpan,
    },

    #[error("Sort mismatch in {context}: expected {expected}, found {found}")]
    #[diagnostic(code(qwed::validate::sort))]
    SortConflict {
        context: String,
        expected: String,
        found: String,
        #[label("here")]
        span: miette::SourceSpan,
    },

    #[error("'{name}' is reserved and cannot be used as a variable name")]
    #[diagnostic(code(qwed::validate::reserved))]
    ReservedName {
        name: String,
        #[label("reserved")]
        span: miette::SourceSpan,
    },
}

impl ValidationError {
    /// Byte offset of the offending node.
    pub fn position(&self) -> usize {
        let span = match self {
            ValidationError::ArityMismatch { span, .. }
            | ValidationError::DepthExceeded { span, .. }
            | ValidationError::NodeCountExceeded { span, .. }
            | ValidationError::InvalidBinder { span, .. }
            | ValidationError::DuplicateBinder { span, .. }
            | ValidationError::ShadowedBinder { span, .. }
            | ValidationError::BinderSortConflict { span, .. }
            | ValidationError::UnsupportedBinderSort { span, .. }
            | ValidationError::SortConflict { span, .. }
            | ValidationError::ReservedName { span, .. } => span,
        };
        span.offset()
    }
}

/// Any rejection of caller input before compilation.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
pub enum InputError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),
}

impl InputError {
    pub fn position(&self) -> Option<usize> {
        match self {
            InputError::Parse(e) => e.position(),
            InputError::Validation(e) => Some(e.position()),
        }
    }
}
