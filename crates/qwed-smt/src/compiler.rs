//! Constraint compiler: validated expression in, SMT-LIB terms out.
//!
//! Only a [`ValidatedExpr`] can be compiled, so every tree reaching this
//! module has already passed the operator whitelist, arity and sort checks.
//! Compilation is a pure function of the tree: the same input always
//! produces byte-identical output.

use std::collections::BTreeSet;

use num::rational::BigRational;
use num::traits::Zero;
use qwed_dsl::ast::{Atom, Expr, ExprKind};
use qwed_dsl::{OperatorKind, ValidatedExpr, ValueSort};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::backends::smtlib_printer::to_smtlib;
use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

/// Logic declared in generated scripts. Quantifiers, arrays, strings and
/// nonlinear products can all appear, so no narrower fragment fits.
pub const LOGIC: &str = "ALL";

const POW_BINDER: &str = "pow!";
const ABS_BINDER: &str = "abs!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Largest exponent accepted by `POW`.
    pub max_exponent: u32,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { max_exponent: 8 }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("Division by zero at byte {position}")]
    DivisionByZero { position: usize },
    #[error("Unsupported construct at byte {position}: {construct}")]
    UnsupportedConstruct { construct: String, position: usize },
    #[error("Exponent {exponent} at byte {position} exceeds the maximum of {limit}")]
    ExponentTooLarge {
        exponent: i64,
        limit: u32,
        position: usize,
    },
}

impl CompileError {
    pub fn position(&self) -> usize {
        match self {
            CompileError::DivisionByZero { position }
            | CompileError::UnsupportedConstruct { position, .. }
            | CompileError::ExponentTooLarge { position, .. } => *position,
        }
    }
}

/// Declarations and assertions ready to hand to a solver.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledConstraint {
    declarations: Vec<(String, SmtSort)>,
    assertions: Vec<SmtTerm>,
}

impl CompiledConstraint {
    pub fn declarations(&self) -> &[(String, SmtSort)] {
        &self.declarations
    }

    pub fn assertions(&self) -> &[SmtTerm] {
        &self.assertions
    }

    /// Complete SMT-LIB2 script, ending in `(check-sat)`.
    pub fn to_smtlib_script(&self) -> String {
        let mut script = String::new();
        script.push_str("(set-option :produce-models true)\n");
        script.push_str(&format!("(set-logic {LOGIC})\n"));
        for (name, sort) in &self.declarations {
            script.push_str(&format!("(declare-const {name} {sort})\n"));
        }
        for term in &self.assertions {
            script.push_str(&format!("(assert {})\n", to_smtlib(term)));
        }
        script.push_str("(check-sat)\n");
        script
    }

    /// Lowercase hex SHA-256 of [`Self::to_smtlib_script`].
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.to_smtlib_script().as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

pub fn compile(
    validated: &ValidatedExpr,
    options: &CompileOptions,
) -> Result<CompiledConstraint, CompileError> {
    let mut compiler = Compiler {
        validated,
        options,
        next_node: 0,
        measured_arrays: BTreeSet::new(),
    };
    let root = compiler.term(validated.expr())?;

    let mut declarations: Vec<(String, SmtSort)> = validated
        .free_variables()
        .iter()
        .map(|(name, sort)| (name.clone(), SmtSort::from(sort)))
        .collect();
    let mut assertions = vec![root];
    for array in &compiler.measured_arrays {
        let len = length_symbol(array);
        declarations.push((len.clone(), SmtSort::Int));
        assertions.push(SmtTerm::var(len).ge(SmtTerm::int(0)));
    }

    Ok(CompiledConstraint {
        declarations,
        assertions,
    })
}

/// Symbol standing for the length of an array variable. The `.` keeps it
/// disjoint from user identifiers.
pub fn length_symbol(array: &str) -> String {
    format!("{array}.len")
}

struct Compiler<'a> {
    validated: &'a ValidatedExpr,
    options: &'a CompileOptions,
    /// Preorder index of the next node, matching the validator's numbering.
    next_node: usize,
    measured_arrays: BTreeSet<String>,
}

impl Compiler<'_> {
    fn sort_of(&self, index: usize, expr: &Expr) -> Result<&ValueSort, CompileError> {
        self.validated
            .sort_at(index)
            .ok_or_else(|| CompileError::UnsupportedConstruct {
                construct: "expression without an inferred sort".into(),
                position: expr.span.start,
            })
    }

    fn term(&mut self, expr: &Expr) -> Result<SmtTerm, CompileError> {
        let index = self.next_node;
        self.next_node += 1;
        let sort = self.sort_of(index, expr)?.clone();

        match &expr.kind {
            ExprKind::Atom(atom) => Ok(match atom {
                Atom::Variable(name) => SmtTerm::var(name.clone()),
                Atom::Int(n) if sort == ValueSort::Real => {
                    SmtTerm::real(BigRational::from_integer((*n).into()))
                }
                Atom::Int(n) => SmtTerm::int(*n),
                Atom::Real(r) => SmtTerm::real(r.clone()),
                Atom::Bool(b) => SmtTerm::bool(*b),
                Atom::Str(s) => SmtTerm::StrLit(s.clone()),
            }),
            ExprKind::Compound { operator, operands } => {
                self.compound(*operator, operands, expr, &sort)
            }
        }
    }

    fn terms(&mut self, operands: &[Expr]) -> Result<Vec<SmtTerm>, CompileError> {
        operands.iter().map(|operand| self.term(operand)).collect()
    }

    fn compound(
        &mut self,
        op: OperatorKind,
        operands: &[Expr],
        node: &Expr,
        sort: &ValueSort,
    ) -> Result<SmtTerm, CompileError> {
        if op.is_quantifier() {
            return self.quantifier(op, operands);
        }

        let mut args = self.terms(operands)?.into_iter();
        let mut next = || {
            args.next().ok_or_else(|| CompileError::UnsupportedConstruct {
                construct: format!("{op} with too few operands"),
                position: node.span.start,
            })
        };

        let term = match op {
            OperatorKind::And => SmtTerm::and(collect_rest(&mut next, operands.len())?),
            OperatorKind::Or => SmtTerm::or(collect_rest(&mut next, operands.len())?),
            OperatorKind::Not => next()?.not(),
            OperatorKind::Implies => next()?.implies(next()?),
            OperatorKind::Iff | OperatorKind::Eq => next()?.eq(next()?),
            OperatorKind::Xor => next()?.xor(next()?),
            OperatorKind::Ne => next()?.distinct(next()?),
            OperatorKind::Gt => next()?.gt(next()?),
            OperatorKind::Ge => next()?.ge(next()?),
            OperatorKind::Lt => next()?.lt(next()?),
            OperatorKind::Le => next()?.le(next()?),
            OperatorKind::Plus | OperatorKind::Sum => {
                SmtTerm::add(collect_rest(&mut next, operands.len())?)
            }
            OperatorKind::Mult => SmtTerm::mul(collect_rest(&mut next, operands.len())?),
            OperatorKind::Minus => next()?.sub(next()?),
            OperatorKind::Neg => next()?.neg(),
            OperatorKind::Div => {
                reject_zero_divisor(&operands[1])?;
                let (lhs, rhs) = (Box::new(next()?), Box::new(next()?));
                if *sort == ValueSort::Int {
                    SmtTerm::IntDiv(lhs, rhs)
                } else {
                    SmtTerm::RealDiv(lhs, rhs)
                }
            }
            OperatorKind::Mod => {
                reject_zero_divisor(&operands[1])?;
                SmtTerm::Mod(Box::new(next()?), Box::new(next()?))
            }
            OperatorKind::Pow => {
                let exponent = self.exponent(&operands[1])?;
                let base = next()?;
                power(base, exponent, sort)
            }
            OperatorKind::Abs => {
                let inner = next()?;
                if *sort == ValueSort::Int {
                    SmtTerm::Abs(Box::new(inner))
                } else {
                    real_abs(inner)
                }
            }
            OperatorKind::Len => {
                let array = measured_array(&operands[0])?;
                let symbol = length_symbol(&array);
                self.measured_arrays.insert(array);
                SmtTerm::var(symbol)
            }
            OperatorKind::Get => next()?.select(next()?),
            OperatorKind::Set => {
                let array = next()?;
                array.store(next()?, next()?)
            }
            OperatorKind::ForAll | OperatorKind::Exists => unreachable!("handled above"),
        };
        Ok(term)
    }

    fn quantifier(&mut self, op: OperatorKind, operands: &[Expr]) -> Result<SmtTerm, CompileError> {
        let Some((body, binders)) = operands.split_last() else {
            return Err(CompileError::UnsupportedConstruct {
                construct: format!("{op} without a body"),
                position: 0,
            });
        };
        let mut bound = Vec::with_capacity(binders.len());
        for binder in binders {
            let index = self.next_node;
            self.next_node += 1;
            let name = binder
                .as_variable()
                .ok_or_else(|| CompileError::UnsupportedConstruct {
                    construct: format!("{op} binder that is not a variable"),
                    position: binder.span.start,
                })?;
            let sort = SmtSort::from(self.sort_of(index, binder)?);
            bound.push((name.to_string(), sort));
        }
        let body = Box::new(self.term(body)?);
        Ok(match op {
            OperatorKind::ForAll => SmtTerm::ForAll(bound, body),
            _ => SmtTerm::Exists(bound, body),
        })
    }

    fn exponent(&self, operand: &Expr) -> Result<u32, CompileError> {
        let position = operand.span.start;
        match operand.as_atom() {
            Some(Atom::Int(k)) if *k < 0 => Err(CompileError::UnsupportedConstruct {
                construct: format!("negative exponent {k}"),
                position,
            }),
            Some(Atom::Int(k)) => match u32::try_from(*k) {
                Ok(k) if k <= self.options.max_exponent => Ok(k),
                _ => Err(CompileError::ExponentTooLarge {
                    exponent: *k,
                    limit: self.options.max_exponent,
                    position,
                }),
            },
            _ => Err(CompileError::UnsupportedConstruct {
                construct: "POW exponent must be an integer literal".into(),
                position,
            }),
        }
    }
}

fn collect_rest(
    next: &mut impl FnMut() -> Result<SmtTerm, CompileError>,
    count: usize,
) -> Result<Vec<SmtTerm>, CompileError> {
    (0..count).map(|_| next()).collect()
}

fn reject_zero_divisor(divisor: &Expr) -> Result<(), CompileError> {
    let zero = match divisor.as_atom() {
        Some(Atom::Int(0)) => true,
        Some(Atom::Real(r)) => r.is_zero(),
        _ => false,
    };
    if zero {
        return Err(CompileError::DivisionByZero {
            position: divisor.span.start,
        });
    }
    Ok(())
}

fn one(sort: &ValueSort) -> SmtTerm {
    if *sort == ValueSort::Real {
        SmtTerm::real(BigRational::from_integer(1.into()))
    } else {
        SmtTerm::int(1)
    }
}

fn zero(sort: &ValueSort) -> SmtTerm {
    if *sort == ValueSort::Real {
        SmtTerm::real(BigRational::zero())
    } else {
        SmtTerm::int(0)
    }
}

fn is_shareable(term: &SmtTerm) -> bool {
    matches!(
        term,
        SmtTerm::Var(_) | SmtTerm::IntLit(_) | SmtTerm::RealLit(_) | SmtTerm::BoolLit(_)
    )
}

/// `base^exponent` as an explicit product. Compound bases are bound once
/// with `let` so nested powers stay linear in size.
fn power(base: SmtTerm, exponent: u32, sort: &ValueSort) -> SmtTerm {
    match exponent {
        0 => one(sort),
        1 => base,
        n if is_shareable(&base) => SmtTerm::mul(vec![base; n as usize]),
        n => SmtTerm::let_in(
            POW_BINDER,
            base,
            SmtTerm::mul(vec![SmtTerm::var(POW_BINDER); n as usize]),
        ),
    }
}

/// `abs` is only defined on Int in SMT-LIB, so Real uses `ite`.
fn real_abs(inner: SmtTerm) -> SmtTerm {
    let build = |x: SmtTerm| {
        SmtTerm::ite(
            x.clone().ge(zero(&ValueSort::Real)),
            x.clone(),
            x.neg(),
        )
    };
    if is_shareable(&inner) {
        build(inner)
    } else {
        SmtTerm::let_in(ABS_BINDER, inner, build(SmtTerm::var(ABS_BINDER)))
    }
}

/// The array variable whose length `LEN` refers to. `SET` does not change
/// length, so it is looked through.
fn measured_array(operand: &Expr) -> Result<String, CompileError> {
    let mut current = operand;
    loop {
        if let Some(name) = current.as_variable() {
            return Ok(name.to_string());
        }
        match current.operator() {
            Some(OperatorKind::Set) => current = &current.operands()[0],
            _ => {
                return Err(CompileError::UnsupportedConstruct {
                    construct: "LEN of an array that is not a variable".into(),
                    position: current.span.start,
                })
            }
        }
    }
}
