//! Verification engines and the consensus orchestrator.
//!
//! An [`Artifact`] is dispatched to the engines a [`VerificationMode`]
//! selects from the [`Registry`]. Each call passes through that engine's
//! [`CircuitBreaker`], runs on the blocking pool under the request deadline,
//! and the answers are folded into a [`ConsensusVerdict`] by weighted vote.

pub mod artifact;
pub mod breaker;
pub mod config;
pub mod consensus;
pub mod engine;
pub mod engines;
pub mod format;
pub mod orchestrator;
pub mod registry;
pub mod result;

pub use artifact::{Artifact, ArtifactKind, VerificationMode};
pub use breaker::{Admission, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use config::{
    BreakerConfig, ConfigError, ConsensusConfig, LimitsConfig, SolverConfig, VerificationConfig,
};
pub use consensus::{aggregate, Tally, Vote};
pub use engine::{EngineFault, ProcessBackend, SolverBackend, VerificationEngine};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use registry::{EngineEntry, Registry, RegistryError};
pub use result::{
    Agreement, ConsensusVerdict, EngineDetail, EngineResult, EngineStatus, EngineVerdict, Issue,
    Severity,
};
