//! Arithmetic claims expressed in the constraint language.
//!
//! `expression == expected` becomes `(EQ expression expected)`; with a
//! tolerance it becomes `(LE (ABS (MINUS expression expected)) tolerance)`.
//! The same tree feeds the exact evaluator and, negated, the SMT engines,
//! so both see one set of sorts.

use num::rational::BigRational;
use num::traits::Signed;
use num::BigInt;
use qwed_dsl::ast::{format_rational, Atom, Expr};
use qwed_dsl::{parse_with_limits, validate, InputError, Limits, OperatorKind, Span, ValidatedExpr};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClaimError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("{field} must be a numeric literal, found `{found}`")]
    NotNumeric { field: &'static str, found: String },
    #[error("tolerance must not be negative, found {0}")]
    NegativeTolerance(String),
}

impl ClaimError {
    pub fn position(&self) -> Option<usize> {
        match self {
            ClaimError::Input(err) => err.position(),
            ClaimError::NotNumeric { .. } | ClaimError::NegativeTolerance(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArithmeticClaim {
    claim: Expr,
    expected: BigRational,
    tolerance: Option<BigRational>,
}

impl ArithmeticClaim {
    pub fn parse(
        expression: &str,
        expected: &str,
        tolerance: Option<&str>,
        limits: &Limits,
    ) -> Result<Self, ClaimError> {
        let expression = parse_with_limits(expression, limits).map_err(InputError::from)?;
        let (expected_atom, expected) = numeric_literal("expected", expected, limits)?;
        let tolerance = match tolerance {
            Some(text) => {
                let (atom, value) = numeric_literal("tolerance", text, limits)?;
                if value.is_negative() {
                    return Err(ClaimError::NegativeTolerance(format_rational(&value)));
                }
                // A zero tolerance is plain equality.
                (!num::Zero::is_zero(&value)).then_some((atom, value))
            }
            None => None,
        };

        let synthetic = Span::default();
        let claim = match &tolerance {
            None => Expr::compound(OperatorKind::Eq, vec![expression, expected_atom], synthetic),
            Some((tolerance_atom, _)) => {
                let difference =
                    Expr::compound(OperatorKind::Minus, vec![expression, expected_atom], synthetic);
                let magnitude = Expr::compound(OperatorKind::Abs, vec![difference], synthetic);
                Expr::compound(
                    OperatorKind::Le,
                    vec![magnitude, tolerance_atom.clone()],
                    synthetic,
                )
            }
        };
        Ok(Self {
            claim,
            expected,
            tolerance: tolerance.map(|(_, value)| value),
        })
    }

    pub fn claim(&self) -> &Expr {
        &self.claim
    }

    pub fn expected(&self) -> &BigRational {
        &self.expected
    }

    pub fn tolerance(&self) -> Option<&BigRational> {
        self.tolerance.as_ref()
    }

    /// Preorder index of the user expression inside [`Self::validate`]'s tree.
    pub fn expression_index(&self) -> usize {
        if self.tolerance.is_some() {
            3
        } else {
            1
        }
    }

    /// The user expression inside the claim tree.
    pub fn expression(&self) -> &Expr {
        let operands = self.claim.operands();
        if self.tolerance.is_some() {
            &operands[0].operands()[0].operands()[0]
        } else {
            &operands[0]
        }
    }

    pub fn validate(&self, limits: &Limits) -> Result<ValidatedExpr, InputError> {
        Ok(validate(self.claim.clone(), limits)?)
    }

    /// The claim wrapped in `NOT`, for refutation by a solver.
    pub fn validate_negated(&self, limits: &Limits) -> Result<ValidatedExpr, InputError> {
        let negated = Expr::compound(OperatorKind::Not, vec![self.claim.clone()], Span::default());
        Ok(validate(negated, limits)?)
    }
}

fn numeric_literal(
    field: &'static str,
    text: &str,
    limits: &Limits,
) -> Result<(Expr, BigRational), ClaimError> {
    let expr = parse_with_limits(text, limits).map_err(InputError::from)?;
    let value = match expr.as_atom() {
        Some(Atom::Int(n)) => BigRational::from_integer(BigInt::from(*n)),
        Some(Atom::Real(r)) => r.clone(),
        _ => {
            return Err(ClaimError::NotNumeric {
                field,
                found: text.trim().to_string(),
            })
        }
    };
    Ok((expr, value))
}
