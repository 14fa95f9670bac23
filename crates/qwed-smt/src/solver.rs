use std::collections::BTreeMap;
use std::fmt;

use num::bigint::BigInt;
use num::rational::BigRational;
use num::traits::ToPrimitive;
use qwed_dsl::ast::format_rational;
use thiserror::Error;

use crate::compiler::CompiledConstraint;
use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

/// Result of a satisfiability check.
#[derive(Debug, Clone, PartialEq)]
pub enum SatResult {
    Sat,
    Unsat,
    Unknown(String),
}

/// A model (variable assignments) extracted from a SAT result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    pub values: BTreeMap<String, ModelValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelValue {
    Int(BigInt),
    Real(BigRational),
    Bool(bool),
    Str(String),
    /// Anything the backend could not interpret (arrays, algebraic numbers).
    Raw(String),
}

impl fmt::Display for ModelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelValue::Int(n) => write!(f, "{n}"),
            ModelValue::Real(r) => write!(f, "{}", format_rational(r)),
            ModelValue::Bool(b) => write!(f, "{b}"),
            ModelValue::Str(s) => write!(f, "{s:?}"),
            ModelValue::Raw(raw) => write!(f, "{raw}"),
        }
    }
}

impl Model {
    pub fn get(&self, name: &str) -> Option<&ModelValue> {
        self.values.get(name)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ModelValue::Int(n)) => n.to_i64(),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(ModelValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Values rendered as text, keyed by variable name.
    pub fn rendered(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect()
    }
}

/// Failure of the solver itself, as opposed to a verdict about the input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SolverError {
    #[error("solver timed out: {0}")]
    Timeout(String),
    #[error("solver internal error: {0}")]
    Internal(String),
}

impl SolverError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SolverError::Timeout(_))
    }
}

/// Abstract SMT solver interface.
pub trait SmtSolver {
    type Error: std::error::Error + Into<SolverError>;

    /// Declare a new variable.
    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), Self::Error>;

    /// Assert a constraint.
    fn assert(&mut self, term: &SmtTerm) -> Result<(), Self::Error>;

    /// Push a new scope.
    fn push(&mut self) -> Result<(), Self::Error>;

    /// Pop a scope.
    fn pop(&mut self) -> Result<(), Self::Error>;

    /// Check satisfiability.
    fn check_sat(&mut self) -> Result<SatResult, Self::Error>;

    /// Check satisfiability and extract a model if SAT.
    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), Self::Error>;

    /// Reset the solver state.
    fn reset(&mut self) -> Result<(), Self::Error>;
}

/// Three-way answer for one compiled constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum SolveOutcome {
    Sat(Model),
    Unsat,
    /// The solver gave up for a reason other than running out of budget.
    Unknown(String),
}

/// Reasons a solver reports when it ran out of time or resources.
fn is_budget_reason(reason: &str) -> bool {
    let reason = reason.to_ascii_lowercase();
    ["timeout", "canceled", "cancelled", "resource", "interrupted"]
        .iter()
        .any(|needle| reason.contains(needle))
}

/// Load a compiled constraint into a fresh solver state and check it.
///
/// `unknown` answers caused by the time or resource budget become
/// [`SolverError::Timeout`] so callers can treat them as engine faults.
pub fn solve<S: SmtSolver>(
    solver: &mut S,
    compiled: &CompiledConstraint,
) -> Result<SolveOutcome, SolverError> {
    solver.reset().map_err(Into::into)?;
    for (name, sort) in compiled.declarations() {
        solver.declare_var(name, sort).map_err(Into::into)?;
    }
    for term in compiled.assertions() {
        solver.assert(term).map_err(Into::into)?;
    }
    let vars: Vec<(&str, &SmtSort)> = compiled
        .declarations()
        .iter()
        .map(|(name, sort)| (name.as_str(), sort))
        .collect();
    let (result, model) = solver.check_sat_with_model(&vars).map_err(Into::into)?;
    match result {
        SatResult::Sat => Ok(SolveOutcome::Sat(model.unwrap_or_default())),
        SatResult::Unsat => Ok(SolveOutcome::Unsat),
        SatResult::Unknown(reason) if is_budget_reason(&reason) => {
            Err(SolverError::Timeout(reason))
        }
        SatResult::Unknown(reason) => Ok(SolveOutcome::Unknown(reason)),
    }
}
