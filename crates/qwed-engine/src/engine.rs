//! The uniform engine contract and the solver seam used by SMT engines.

use std::time::Duration;

use qwed_smt::backends::process::{Dialect, SmtLibProcessSolver};
use qwed_smt::{solve, CompiledConstraint, SolveOutcome, SolverError};
use thiserror::Error;

use crate::artifact::{Artifact, ArtifactKind};
use crate::result::EngineVerdict;

/// Failure of the engine itself, as opposed to a verdict about the artifact.
///
/// Solver faults are retried once by the orchestrator; every fault counts
/// against the engine's circuit breaker. Rejected input is a verdict, not a fault.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineFault {
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error("{0}")]
    Internal(String),
}

impl EngineFault {
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineFault::Solver(err) if err.is_timeout())
    }

    /// Only solver failures can be transient; anything else would repeat.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineFault::Solver(_))
    }
}

/// A deterministic verifier for one or more artifact kinds.
pub trait VerificationEngine: Send + Sync {
    /// Stable identifier, also the key for weight overrides.
    fn id(&self) -> &str;

    fn supports(&self, kind: ArtifactKind) -> bool;

    /// Static reliability weight used when the configuration has no override.
    fn default_weight(&self) -> f64;

    fn verify(&self, artifact: &Artifact) -> Result<EngineVerdict, EngineFault>;
}

/// Runs one compiled constraint to completion.
pub trait SolverBackend: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, compiled: &CompiledConstraint) -> Result<SolveOutcome, SolverError>;
}

/// Spawns a fresh z3 or cvc5 process for every check.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    dialect: Dialect,
    command: String,
    timeout: Duration,
}

impl ProcessBackend {
    pub fn new(dialect: Dialect, command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            dialect,
            command: command.into(),
            timeout,
        }
    }
}

impl SolverBackend for ProcessBackend {
    fn name(&self) -> &str {
        &self.command
    }

    fn check(&self, compiled: &CompiledConstraint) -> Result<SolveOutcome, SolverError> {
        let mut solver = SmtLibProcessSolver::with_command(self.dialect, &self.command, self.timeout);
        solve(&mut solver, compiled)
    }
}
