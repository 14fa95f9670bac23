//! SMT-backed engine: parse, validate, compile, solve, format.

use std::sync::Arc;

use qwed_dsl::{parse_and_validate, Limits, ValidatedExpr};
use qwed_smt::{compile, CompileOptions, CompiledConstraint};
use tracing::debug;

use crate::artifact::{Artifact, ArtifactKind};
use crate::engine::{EngineFault, SolverBackend, VerificationEngine};
use crate::engines::claim::ArithmeticClaim;
use crate::format::{
    compile_rejected, input_rejected, refutation_verdict, rejected, satisfiability_verdict,
};
use crate::result::EngineVerdict;

pub struct LogicEngine {
    id: String,
    weight: f64,
    backend: Arc<dyn SolverBackend>,
    limits: Limits,
    options: CompileOptions,
}

impl LogicEngine {
    pub fn new(
        id: impl Into<String>,
        weight: f64,
        backend: Arc<dyn SolverBackend>,
        limits: Limits,
        options: CompileOptions,
    ) -> Self {
        Self {
            id: id.into(),
            weight,
            backend,
            limits,
            options,
        }
    }

    fn compile(&self, validated: &ValidatedExpr) -> Result<CompiledConstraint, EngineVerdict> {
        compile(validated, &self.options).map_err(|err| compile_rejected(&err))
    }

    fn verify_formula(&self, formula: &str) -> Result<EngineVerdict, EngineFault> {
        let validated = match parse_and_validate(formula, &self.limits) {
            Ok(validated) => validated,
            Err(err) => return Ok(input_rejected(&err)),
        };
        let compiled = match self.compile(&validated) {
            Ok(compiled) => compiled,
            Err(verdict) => return Ok(verdict),
        };
        let fingerprint = compiled.fingerprint();
        debug!(engine = %self.id, solver = self.backend.name(), %fingerprint, "checking formula");
        let outcome = self.backend.check(&compiled)?;
        Ok(satisfiability_verdict(outcome, fingerprint))
    }

    fn verify_claim(
        &self,
        expression: &str,
        expected: &str,
        tolerance: Option<&str>,
    ) -> Result<EngineVerdict, EngineFault> {
        let claim = match ArithmeticClaim::parse(expression, expected, tolerance, &self.limits) {
            Ok(claim) => claim,
            Err(err) => return Ok(rejected("claim", err.to_string(), err.position())),
        };
        let validated = match claim.validate_negated(&self.limits) {
            Ok(validated) => validated,
            Err(err) => return Ok(input_rejected(&err)),
        };
        let compiled = match self.compile(&validated) {
            Ok(compiled) => compiled,
            Err(verdict) => return Ok(verdict),
        };
        let fingerprint = compiled.fingerprint();
        debug!(engine = %self.id, solver = self.backend.name(), %fingerprint, "refuting claim");
        let outcome = self.backend.check(&compiled)?;
        Ok(refutation_verdict(outcome, fingerprint))
    }
}

impl VerificationEngine for LogicEngine {
    fn id(&self) -> &str {
        &self.id
    }

    fn supports(&self, kind: ArtifactKind) -> bool {
        matches!(kind, ArtifactKind::Logic | ArtifactKind::Arithmetic)
    }

    fn default_weight(&self) -> f64 {
        self.weight
    }

    fn verify(&self, artifact: &Artifact) -> Result<EngineVerdict, EngineFault> {
        match artifact {
            Artifact::Logic { formula } => self.verify_formula(formula),
            Artifact::Arithmetic {
                expression,
                expected,
                tolerance,
            } => self.verify_claim(expression, expected, tolerance.as_deref()),
            other => Err(EngineFault::Internal(format!(
                "{} cannot verify {} artifacts",
                self.id,
                other.kind()
            ))),
        }
    }
}
