//! SMT layer: sorts and terms, the constraint compiler, and the solver
//! adapter boundary.
//!
//! The compiler turns a validated expression into a [`compiler::CompiledConstraint`].
//! Solvers sit behind the [`solver::SmtSolver`] trait; the bundled backend
//! drives z3 or cvc5 over SMT-LIB2 as a subprocess.

pub mod backends;
pub mod compiler;
pub mod solver;
pub mod sorts;
pub mod terms;

pub use compiler::{compile, CompileError, CompileOptions, CompiledConstraint};
pub use solver::{solve, Model, ModelValue, SatResult, SmtSolver, SolveOutcome, SolverError};
