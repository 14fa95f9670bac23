//! Renders solver outcomes and front-end failures into engine verdicts.

use qwed_dsl::InputError;
use qwed_smt::{CompileError, SolveOutcome};

use crate::result::{EngineDetail, EngineStatus, EngineVerdict};

/// Formula verification: a model means the formula holds for some assignment.
pub fn satisfiability_verdict(outcome: SolveOutcome, fingerprint: String) -> EngineVerdict {
    match outcome {
        SolveOutcome::Sat(model) => EngineVerdict::new(
            EngineStatus::Verified,
            1.0,
            EngineDetail::Satisfiable {
                model: model.rendered(),
                fingerprint,
            },
        ),
        SolveOutcome::Unsat => EngineVerdict::new(
            EngineStatus::Failed,
            1.0,
            EngineDetail::Unsatisfiable { fingerprint },
        ),
        SolveOutcome::Unknown(reason) => inconclusive(reason),
    }
}

/// Claim verification over a negated claim: unsatisfiable means proved.
pub fn refutation_verdict(outcome: SolveOutcome, fingerprint: String) -> EngineVerdict {
    match outcome {
        SolveOutcome::Unsat => {
            EngineVerdict::new(EngineStatus::Verified, 1.0, EngineDetail::Proved { fingerprint })
        }
        SolveOutcome::Sat(model) => EngineVerdict::new(
            EngineStatus::Failed,
            1.0,
            EngineDetail::Counterexample {
                model: model.rendered(),
                fingerprint,
            },
        ),
        SolveOutcome::Unknown(reason) => inconclusive(reason),
    }
}

fn inconclusive(reason: String) -> EngineVerdict {
    EngineVerdict::new(EngineStatus::Error, 0.0, EngineDetail::Inconclusive { reason })
}

pub fn rejected(stage: &str, message: impl Into<String>, position: Option<usize>) -> EngineVerdict {
    EngineVerdict::new(
        EngineStatus::Error,
        0.0,
        EngineDetail::InputRejected {
            stage: stage.to_string(),
            message: message.into(),
            position,
        },
    )
}

pub fn input_rejected(err: &InputError) -> EngineVerdict {
    let stage = match err {
        InputError::Parse(_) => "parse",
        InputError::Validation(_) => "validate",
    };
    rejected(stage, err.to_string(), err.position())
}

pub fn compile_rejected(err: &CompileError) -> EngineVerdict {
    rejected("compile", err.to_string(), Some(err.position()))
}
