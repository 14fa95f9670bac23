//! Constraint language front end: pest grammar and parser, closed operator
//! table and AST validator.
//!
//! Nothing in this crate evaluates input. Text becomes an [`ast::Expr`]
//! through a fixed grammar, and [`validate::validate`] accepts only trees
//! built from the [`operator::OperatorKind`] vocabulary with consistent
//! sorts.

pub mod ast;
pub mod errors;
pub mod operator;
pub mod parser;
pub mod types;
pub mod validate;

pub use ast::{Atom, Expr, ExprKind, Span};
pub use errors::{InputError, ParseError, ValidationError};
pub use operator::{Arity, OperatorKind};
pub use parser::{parse, parse_with_limits, Limits};
pub use types::ValueSort;
pub use validate::{validate, ValidatedExpr};

/// Parse and validate in one step.
pub fn parse_and_validate(source: &str, limits: &Limits) -> Result<ValidatedExpr, InputError> {
    let expr = parse_with_limits(source, limits)?;
    Ok(validate(expr, limits)?)
}
