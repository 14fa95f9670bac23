//! Consensus orchestrator: fan a request out to the selected engines, gate
//! each call through its circuit breaker, collect answers until the
//! deadline and tally a weighted verdict.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::artifact::{Artifact, ArtifactKind, VerificationMode};
use crate::breaker::Admission;
use crate::config::{ConsensusConfig, VerificationConfig};
use crate::consensus::{aggregate, Tally, Vote};
use crate::engine::{EngineFault, VerificationEngine};
use crate::registry::{EngineEntry, Registry, RegistryError};
use crate::result::{ConsensusVerdict, EngineDetail, EngineResult, EngineStatus, EngineVerdict};

/// Request-level degradation, reported inside the verdict rather than
/// raised.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrchestratorError {
    #[error("request deadline of {deadline_ms} ms exceeded; no answer from {}", .missing.join(", "))]
    RequestDeadlineExceeded {
        deadline_ms: u64,
        missing: Vec<String>,
    },
    #[error("no registered engine verifies {artifact} artifacts")]
    NoApplicableEngine { artifact: ArtifactKind },
}

enum CallFailure {
    Fault(EngineFault),
    Panicked(String),
}

struct CallOutcome {
    result: Result<EngineVerdict, CallFailure>,
    latency_ms: u64,
}

pub struct Orchestrator {
    registry: Arc<Registry>,
    consensus: ConsensusConfig,
}

impl Orchestrator {
    pub fn new(registry: Arc<Registry>, consensus: ConsensusConfig) -> Self {
        Self {
            registry,
            consensus,
        }
    }

    /// Orchestrator over the default engine family.
    pub fn from_config(config: &VerificationConfig) -> Result<Self, RegistryError> {
        let registry = Registry::with_default_engines(config)?;
        Ok(Self::new(Arc::new(registry), config.consensus))
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub async fn verify(&self, artifact: Artifact, mode: VerificationMode) -> ConsensusVerdict {
        let kind = artifact.kind();
        let selected = self.registry.select(kind, mode);
        if selected.is_empty() {
            warn!(%kind, ?mode, "no applicable engine");
            return degraded_split(OrchestratorError::NoApplicableEngine { artifact: kind });
        }

        let deadline = Instant::now() + self.consensus.deadline();
        let artifact = Arc::new(artifact);
        let entries = self.registry.entries();
        let mut results: Vec<Option<EngineResult>> = vec![None; selected.len()];
        let mut admissions = Vec::with_capacity(selected.len());
        let mut tasks = JoinSet::new();

        for (slot, &index) in selected.iter().enumerate() {
            let entry = &entries[index];
            let admission = entry.breaker().try_acquire();
            admissions.push(admission);
            if !admission.is_permitted() {
                debug!(engine = entry.id(), "circuit open, call short-circuited");
                let verdict =
                    EngineVerdict::new(EngineStatus::Error, 0.0, EngineDetail::CircuitOpen);
                results[slot] = Some(EngineResult::from_verdict(entry.id(), verdict, 0));
                continue;
            }
            let engine = Arc::clone(entry.engine());
            let artifact = Arc::clone(&artifact);
            tasks.spawn_blocking(move || (slot, call_engine(engine.as_ref(), &artifact)));
        }

        let mut deadline_hit = false;
        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((slot, outcome)))) => {
                    let entry = &entries[selected[slot]];
                    results[slot] = Some(settle(entry, admissions[slot], outcome));
                }
                Ok(Some(Err(err))) => warn!(error = %err, "engine task failed to join"),
                Ok(None) => break,
                Err(_) => {
                    deadline_hit = true;
                    tasks.abort_all();
                    break;
                }
            }
        }

        let deadline_ms = self.consensus.deadline_ms;
        let mut missing = Vec::new();
        let results: Vec<EngineResult> = results
            .into_iter()
            .enumerate()
            .map(|(slot, result)| {
                if let Some(result) = result {
                    return result;
                }
                let entry = &entries[selected[slot]];
                // Cancelled calls never count against the engine.
                entry.breaker().release(admissions[slot]);
                if deadline_hit {
                    missing.push(entry.id().to_string());
                    EngineResult::from_verdict(
                        entry.id(),
                        EngineVerdict::new(
                            EngineStatus::Timeout,
                            0.0,
                            EngineDetail::TimedOut { deadline_ms },
                        ),
                        deadline_ms,
                    )
                } else {
                    EngineResult::from_verdict(
                        entry.id(),
                        EngineVerdict::new(
                            EngineStatus::Error,
                            0.0,
                            EngineDetail::Fault {
                                message: "engine task did not complete".into(),
                            },
                        ),
                        0,
                    )
                }
            })
            .collect();

        let votes: Vec<Vote> = results
            .iter()
            .zip(&selected)
            .map(|(result, &index)| Vote {
                status: result.status,
                confidence: result.confidence,
                weight: entries[index].weight(),
            })
            .collect();
        let Tally {
            status,
            confidence,
            agreement,
        } = aggregate(&votes, self.consensus.majority_threshold);

        let degraded = (deadline_hit && !missing.is_empty()).then(|| {
            warn!(deadline_ms, missing = ?missing, "request deadline exceeded");
            OrchestratorError::RequestDeadlineExceeded {
                deadline_ms,
                missing,
            }
        });
        info!(
            %kind,
            ?mode,
            engines = results.len(),
            %status,
            confidence,
            ?agreement,
            "verification complete"
        );
        ConsensusVerdict {
            status,
            confidence,
            agreement,
            results,
            degraded,
        }
    }
}

fn degraded_split(error: OrchestratorError) -> ConsensusVerdict {
    let Tally {
        status,
        confidence,
        agreement,
    } = Tally::split();
    ConsensusVerdict {
        status,
        confidence,
        agreement,
        results: Vec::new(),
        degraded: Some(error),
    }
}

/// Turn a finished call into a result and feed its outcome to the breaker.
fn settle(entry: &EngineEntry, admission: Admission, outcome: CallOutcome) -> EngineResult {
    let CallOutcome { result, latency_ms } = outcome;
    match result {
        Ok(verdict) => {
            entry.breaker().record_success(admission);
            EngineResult::from_verdict(entry.id(), verdict, latency_ms)
        }
        Err(failure) => {
            entry.breaker().record_failure(admission);
            let (status, message) = match failure {
                CallFailure::Fault(fault) if fault.is_timeout() => {
                    (EngineStatus::Timeout, fault.to_string())
                }
                CallFailure::Fault(fault) => (EngineStatus::Error, fault.to_string()),
                CallFailure::Panicked(message) => {
                    (EngineStatus::Error, format!("engine panicked: {message}"))
                }
            };
            let verdict = EngineVerdict::new(status, 0.0, EngineDetail::Fault { message });
            EngineResult::from_verdict(entry.id(), verdict, latency_ms)
        }
    }
}

/// Run one engine on the blocking pool: panics are contained and a solver
/// fault is retried once with the same input.
fn call_engine(engine: &dyn VerificationEngine, artifact: &Artifact) -> CallOutcome {
    let started = std::time::Instant::now();
    let result = match guarded_call(engine, artifact) {
        Err(CallFailure::Fault(fault)) if fault.is_retryable() => {
            warn!(engine = engine.id(), %fault, "solver fault, retrying once");
            guarded_call(engine, artifact)
        }
        other => other,
    };
    CallOutcome {
        result,
        latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    }
}

fn guarded_call(
    engine: &dyn VerificationEngine,
    artifact: &Artifact,
) -> Result<EngineVerdict, CallFailure> {
    match panic::catch_unwind(AssertUnwindSafe(|| engine.verify(artifact))) {
        Ok(Ok(verdict)) => Ok(verdict),
        Ok(Err(fault)) => Err(CallFailure::Fault(fault)),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            warn!(engine = engine.id(), %message, "engine panicked");
            Err(CallFailure::Panicked(message))
        }
    }
}
