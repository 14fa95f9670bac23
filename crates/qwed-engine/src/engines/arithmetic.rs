//! Exact evaluation of ground arithmetic claims.
//!
//! Values are `BigRational`, so nothing rounds. Integer-sorted `DIV` and
//! `MOD` follow SMT-LIB: the remainder is never negative and
//! `a = b * (div a b) + (mod a b)`.

use num::rational::BigRational;
use num::traits::{One, Signed, Zero};
use num::BigInt;
use qwed_dsl::ast::{format_rational, Atom, ExprKind};
use qwed_dsl::{Expr, Limits, OperatorKind, ValueSort};
use thiserror::Error;

use crate::artifact::{Artifact, ArtifactKind};
use crate::engine::{EngineFault, VerificationEngine};
use crate::engines::claim::ArithmeticClaim;
use crate::format::{input_rejected, rejected};
use crate::result::{EngineDetail, EngineStatus, EngineVerdict};

/// Largest numerator plus denominator, in bits, any intermediate may reach.
const MAX_VALUE_BITS: u64 = 1 << 16;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("free variable `{0}`; only ground expressions can be evaluated")]
    NotGround(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("exponent {exponent} is outside 0..={limit}")]
    ExponentOutOfRange { exponent: String, limit: u32 },
    #[error("POW exponent must be an integer literal")]
    NonLiteralExponent,
    #[error("intermediate value would exceed {limit} bits")]
    ValueTooLarge { limit: u64 },
    #[error("{0} cannot be evaluated exactly")]
    Unsupported(String),
}

pub struct ArithmeticEngine {
    limits: Limits,
    max_exponent: u32,
}

impl ArithmeticEngine {
    pub const ID: &'static str = "arithmetic";

    pub fn new(limits: Limits, max_exponent: u32) -> Self {
        Self {
            limits,
            max_exponent,
        }
    }

    fn check(&self, expression: &str, expected: &str, tolerance: Option<&str>) -> EngineVerdict {
        let claim = match ArithmeticClaim::parse(expression, expected, tolerance, &self.limits) {
            Ok(claim) => claim,
            Err(err) => return rejected("claim", err.to_string(), err.position()),
        };
        let validated = match claim.validate(&self.limits) {
            Ok(validated) => validated,
            Err(err) => return input_rejected(&err),
        };

        let mut evaluator = Evaluator {
            sorts: validated.sorts(),
            next: claim.expression_index(),
            max_exponent: self.max_exponent,
        };
        let computed = match evaluator.eval(claim.expression()) {
            Ok(value) => value,
            Err(err) => return rejected("evaluate", err.to_string(), None),
        };

        let difference = &computed - claim.expected();
        let holds = match claim.tolerance() {
            Some(tolerance) => difference.abs() <= *tolerance,
            None => difference.is_zero(),
        };
        let status = if holds {
            EngineStatus::Verified
        } else {
            EngineStatus::Failed
        };
        EngineVerdict::new(
            status,
            1.0,
            EngineDetail::Evaluation {
                computed: format_rational(&computed),
                expected: format_rational(claim.expected()),
                difference: format_rational(&difference),
            },
        )
    }
}

impl VerificationEngine for ArithmeticEngine {
    fn id(&self) -> &str {
        Self::ID
    }

    fn supports(&self, kind: ArtifactKind) -> bool {
        kind == ArtifactKind::Arithmetic
    }

    fn default_weight(&self) -> f64 {
        1.0
    }

    fn verify(&self, artifact: &Artifact) -> Result<EngineVerdict, EngineFault> {
        match artifact {
            Artifact::Arithmetic {
                expression,
                expected,
                tolerance,
            } => Ok(self.check(expression, expected, tolerance.as_deref())),
            other => Err(EngineFault::Internal(format!(
                "arithmetic engine cannot verify {} artifacts",
                other.kind()
            ))),
        }
    }
}

/// Walks a subtree in preorder, reading each node's sort from the
/// validator's table.
struct Evaluator<'a> {
    sorts: &'a [ValueSort],
    next: usize,
    max_exponent: u32,
}

impl Evaluator<'_> {
    fn eval(&mut self, expr: &Expr) -> Result<BigRational, EvalError> {
        let index = self.next;
        self.next += 1;
        let integral = matches!(self.sorts.get(index), Some(ValueSort::Int));

        let (operator, operands) = match &expr.kind {
            ExprKind::Atom(atom) => return atom_value(atom),
            ExprKind::Compound { operator, operands } => (*operator, operands),
        };
        let mut values = Vec::with_capacity(operands.len());
        for operand in operands {
            values.push(self.eval(operand)?);
        }

        match operator {
            OperatorKind::Plus | OperatorKind::Sum => Ok(values
                .into_iter()
                .fold(BigRational::zero(), |acc, value| acc + value)),
            OperatorKind::Mult => bounded(
                values
                    .into_iter()
                    .fold(BigRational::one(), |acc, value| acc * value),
            ),
            OperatorKind::Minus => Ok(&values[0] - &values[1]),
            OperatorKind::Neg => Ok(-&values[0]),
            OperatorKind::Abs => Ok(values[0].abs()),
            OperatorKind::Div => {
                let (lhs, rhs) = (&values[0], &values[1]);
                if rhs.is_zero() {
                    return Err(EvalError::DivisionByZero);
                }
                if integral {
                    Ok(euclidean_div(lhs, rhs))
                } else {
                    Ok(lhs / rhs)
                }
            }
            OperatorKind::Mod => {
                let (lhs, rhs) = (&values[0], &values[1]);
                if rhs.is_zero() {
                    return Err(EvalError::DivisionByZero);
                }
                Ok(lhs - rhs * euclidean_div(lhs, rhs))
            }
            OperatorKind::Pow => {
                // Same rule the SMT compiler applies.
                let Some(Atom::Int(literal)) = operands[1].as_atom() else {
                    return Err(EvalError::NonLiteralExponent);
                };
                let n = u32::try_from(*literal)
                    .ok()
                    .filter(|n| *n <= self.max_exponent)
                    .ok_or_else(|| EvalError::ExponentOutOfRange {
                        exponent: literal.to_string(),
                        limit: self.max_exponent,
                    })?;
                let base = &values[0];
                let bits = base.numer().bits() + base.denom().bits();
                if bits.saturating_mul(u64::from(n)) > MAX_VALUE_BITS {
                    return Err(EvalError::ValueTooLarge {
                        limit: MAX_VALUE_BITS,
                    });
                }
                Ok(num::pow(base.clone(), n as usize))
            }
            other => Err(EvalError::Unsupported(other.name().to_string())),
        }
    }
}

fn bounded(value: BigRational) -> Result<BigRational, EvalError> {
    if value.numer().bits() + value.denom().bits() > MAX_VALUE_BITS {
        return Err(EvalError::ValueTooLarge {
            limit: MAX_VALUE_BITS,
        });
    }
    Ok(value)
}

fn atom_value(atom: &Atom) -> Result<BigRational, EvalError> {
    match atom {
        Atom::Int(n) => Ok(BigRational::from_integer(BigInt::from(*n))),
        Atom::Real(r) => Ok(r.clone()),
        Atom::Variable(name) => Err(EvalError::NotGround(name.clone())),
        Atom::Bool(_) | Atom::Str(_) => Err(EvalError::Unsupported(atom.to_string())),
    }
}

/// SMT-LIB integer division: floor for positive divisors, ceiling for
/// negative ones.
fn euclidean_div(lhs: &BigRational, rhs: &BigRational) -> BigRational {
    let quotient = lhs / rhs;
    if rhs.is_positive() {
        quotient.floor()
    } else {
        quotient.ceil()
    }
}
