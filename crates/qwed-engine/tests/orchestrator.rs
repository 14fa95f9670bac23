//! Orchestrator behavior with scripted engines: weighted consensus, breaker
//! short-circuiting, deadlines, panics and the single retry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use qwed_engine::{
    Agreement, Artifact, ArtifactKind, BreakerConfig, BreakerState, ConsensusConfig, EngineDetail,
    EngineFault, EngineStatus, EngineVerdict, Orchestrator, OrchestratorError, Registry,
    VerificationConfig, VerificationEngine, VerificationMode,
};
use qwed_smt::SolverError;

enum Script {
    Answer(EngineStatus),
    Sleep(Duration, EngineStatus),
    Fault,
    FaultOnce(EngineStatus),
    Broken,
    Panic,
}

struct Scripted {
    id: &'static str,
    weight: f64,
    script: Script,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(id: &'static str, weight: f64, script: Script) -> Arc<Self> {
        Arc::new(Self {
            id,
            weight,
            script,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn answer(status: EngineStatus) -> EngineVerdict {
    EngineVerdict::new(
        status,
        1.0,
        EngineDetail::Inconclusive {
            reason: "scripted".into(),
        },
    )
}

impl VerificationEngine for Scripted {
    fn id(&self) -> &str {
        self.id
    }

    fn supports(&self, kind: ArtifactKind) -> bool {
        kind == ArtifactKind::Logic
    }

    fn default_weight(&self) -> f64 {
        self.weight
    }

    fn verify(&self, _artifact: &Artifact) -> Result<EngineVerdict, EngineFault> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Answer(status) => Ok(answer(*status)),
            Script::Sleep(pause, status) => {
                std::thread::sleep(*pause);
                Ok(answer(*status))
            }
            Script::Fault => Err(SolverError::Internal("backend unavailable".into()).into()),
            Script::FaultOnce(_) if call == 0 => {
                Err(SolverError::Internal("connection reset".into()).into())
            }
            Script::Broken => Err(EngineFault::Internal("unsupported artifact".into())),
            Script::FaultOnce(status) => Ok(answer(*status)),
            Script::Panic => panic!("engine bug"),
        }
    }
}

fn formula() -> Artifact {
    Artifact::Logic {
        formula: "(GT x 1)".into(),
    }
}

fn orchestrator(
    engines: Vec<Arc<Scripted>>,
    breaker: BreakerConfig,
    consensus: ConsensusConfig,
) -> Orchestrator {
    let mut registry = Registry::new(breaker);
    for engine in engines {
        registry.register(engine, None).unwrap();
    }
    Orchestrator::new(Arc::new(registry), consensus)
}

fn default_orchestrator(engines: Vec<Arc<Scripted>>) -> Orchestrator {
    orchestrator(engines, BreakerConfig::default(), ConsensusConfig::default())
}

#[tokio::test]
async fn weighted_majority_carries_the_request() {
    let orchestrator = default_orchestrator(vec![
        Scripted::new("a", 1.0, Script::Answer(EngineStatus::Verified)),
        Scripted::new("b", 0.995, Script::Answer(EngineStatus::Failed)),
        Scripted::new("c", 0.99, Script::Answer(EngineStatus::Verified)),
    ]);
    let verdict = orchestrator
        .verify(formula(), VerificationMode::Maximum)
        .await;
    assert_eq!(verdict.status, EngineStatus::Verified);
    assert_eq!(verdict.agreement, Agreement::Majority);
    let expected = 1.99 / 2.985;
    assert!((verdict.confidence - expected).abs() < 1e-9);
    let ids: Vec<&str> = verdict.results.iter().map(|r| r.engine.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert!(verdict.degraded.is_none());
}

#[tokio::test]
async fn single_mode_uses_the_heaviest_engine() {
    let light = Scripted::new("light", 0.5, Script::Answer(EngineStatus::Failed));
    let heavy = Scripted::new("heavy", 0.9, Script::Answer(EngineStatus::Verified));
    let orchestrator = default_orchestrator(vec![light.clone(), heavy.clone()]);
    let verdict = orchestrator.verify(formula(), VerificationMode::Single).await;
    assert!(verdict.is_verified());
    assert_eq!(verdict.results.len(), 1);
    assert_eq!(light.calls(), 0);
    assert_eq!(heavy.calls(), 1);
}

#[tokio::test]
async fn open_breaker_short_circuits_without_calling_the_engine() {
    let flaky = Scripted::new("flaky", 1.0, Script::Fault);
    let breaker = BreakerConfig {
        window: 4,
        failure_threshold: 0.5,
        minimum_calls: 1,
        cooldown_ms: 60_000,
    };
    let orchestrator = orchestrator(vec![flaky.clone()], breaker, ConsensusConfig::default());

    let first = orchestrator.verify(formula(), VerificationMode::Single).await;
    assert_eq!(first.results[0].status, EngineStatus::Error);
    assert_eq!(first.status, EngineStatus::Failed);
    // Original call plus one retry.
    assert_eq!(flaky.calls(), 2);
    let snapshot = orchestrator.registry().breaker_snapshot("flaky").unwrap();
    assert!(matches!(snapshot.state, BreakerState::Open { .. }));

    let second = orchestrator.verify(formula(), VerificationMode::Single).await;
    assert_eq!(second.results[0].detail, EngineDetail::CircuitOpen);
    assert_eq!(second.results[0].status, EngineStatus::Error);
    assert_eq!(second.agreement, Agreement::Split);
    assert_eq!(flaky.calls(), 2);
}

#[tokio::test]
async fn transient_fault_is_retried_once() {
    let engine = Scripted::new("e", 1.0, Script::FaultOnce(EngineStatus::Verified));
    let orchestrator = default_orchestrator(vec![engine.clone()]);
    let verdict = orchestrator.verify(formula(), VerificationMode::Single).await;
    assert!(verdict.is_verified());
    assert_eq!(engine.calls(), 2);
    let snapshot = orchestrator.registry().breaker_snapshot("e").unwrap();
    assert_eq!(snapshot.window_failure_rate, 0.0);
    assert_eq!(snapshot.window_len, 1);
}

#[tokio::test]
async fn deterministic_fault_is_not_retried() {
    let engine = Scripted::new("e", 1.0, Script::Broken);
    let orchestrator = default_orchestrator(vec![engine.clone()]);
    let verdict = orchestrator.verify(formula(), VerificationMode::Single).await;
    assert_eq!(verdict.results[0].status, EngineStatus::Error);
    assert_eq!(verdict.status, EngineStatus::Failed);
    assert_eq!(engine.calls(), 1);
}

#[tokio::test]
async fn panicking_engine_becomes_an_error_result() {
    let orchestrator = default_orchestrator(vec![
        Scripted::new("ok", 1.0, Script::Answer(EngineStatus::Verified)),
        Scripted::new("buggy", 0.5, Script::Panic),
    ]);
    let verdict = orchestrator
        .verify(formula(), VerificationMode::Maximum)
        .await;
    let buggy = &verdict.results[1];
    assert_eq!(buggy.status, EngineStatus::Error);
    match &buggy.detail {
        EngineDetail::Fault { message } => assert!(message.contains("engine bug")),
        other => panic!("unexpected detail {other:?}"),
    }
    // 1.0 verified against 0.5 error mass.
    assert!(verdict.is_verified());
    assert_eq!(verdict.agreement, Agreement::Majority);
}

#[tokio::test]
async fn deadline_reports_missing_engines_and_keeps_responders() {
    let consensus = ConsensusConfig {
        majority_threshold: 0.5,
        deadline_ms: 50,
    };
    let orchestrator = orchestrator(
        vec![
            Scripted::new("fast", 1.0, Script::Answer(EngineStatus::Verified)),
            Scripted::new(
                "slow",
                1.0,
                Script::Sleep(Duration::from_millis(400), EngineStatus::Failed),
            ),
        ],
        BreakerConfig::default(),
        consensus,
    );
    let verdict = orchestrator
        .verify(formula(), VerificationMode::Maximum)
        .await;

    assert_eq!(verdict.results[1].status, EngineStatus::Timeout);
    assert_eq!(
        verdict.results[1].detail,
        EngineDetail::TimedOut { deadline_ms: 50 }
    );
    assert_eq!(verdict.status, EngineStatus::Verified);
    assert!((verdict.confidence - 0.5).abs() < 1e-9);
    assert_eq!(
        verdict.degraded,
        Some(OrchestratorError::RequestDeadlineExceeded {
            deadline_ms: 50,
            missing: vec!["slow".to_string()],
        })
    );
    // A cancelled call is not held against the engine.
    let snapshot = orchestrator.registry().breaker_snapshot("slow").unwrap();
    assert_eq!(snapshot.state, BreakerState::Closed);
    assert_eq!(snapshot.window_len, 0);
}

#[tokio::test]
async fn unsupported_kind_degrades_to_a_split() {
    let orchestrator = default_orchestrator(vec![Scripted::new(
        "logic-only",
        1.0,
        Script::Answer(EngineStatus::Verified),
    )]);
    let verdict = orchestrator
        .verify(
            Artifact::Sql {
                query: "SELECT 1".into(),
                schema: None,
                allow_mutation: false,
            },
            VerificationMode::Maximum,
        )
        .await;
    assert_eq!(verdict.status, EngineStatus::Failed);
    assert_eq!(verdict.agreement, Agreement::Split);
    assert_eq!(verdict.confidence, 0.0);
    assert!(verdict.results.is_empty());
    assert_eq!(
        verdict.degraded,
        Some(OrchestratorError::NoApplicableEngine {
            artifact: ArtifactKind::Sql
        })
    );
}

#[tokio::test]
async fn default_engines_without_solvers() {
    let orchestrator = Orchestrator::from_config(&VerificationConfig::default()).unwrap();

    let sum = orchestrator
        .verify(
            Artifact::Arithmetic {
                expression: "(PLUS 2 (MULT 3 4))".into(),
                expected: "14".into(),
                tolerance: None,
            },
            VerificationMode::Single,
        )
        .await;
    assert!(sum.is_verified());
    assert_eq!(sum.results[0].engine, "arithmetic");

    let injection = orchestrator
        .verify(
            Artifact::Sql {
                query: "SELECT * FROM users WHERE name = '' OR 1 = 1; DROP TABLE users".into(),
                schema: None,
                allow_mutation: false,
            },
            VerificationMode::Single,
        )
        .await;
    assert_eq!(injection.status, EngineStatus::Blocked);

    let shell = orchestrator
        .verify(
            Artifact::Code {
                source: "data = input()\nresult = eval(data)\n".into(),
                language: "python".into(),
            },
            VerificationMode::Maximum,
        )
        .await;
    assert_eq!(shell.status, EngineStatus::Blocked);
    assert_eq!(shell.agreement, Agreement::Unanimous);
}

#[tokio::test]
async fn repeated_requests_agree_apart_from_timings() {
    let orchestrator = Orchestrator::from_config(&VerificationConfig::default()).unwrap();
    let artifact = Artifact::Sql {
        query: "SELECT id, email FROM accounts WHERE id = 7".into(),
        schema: Some("CREATE TABLE accounts (id INT, email TEXT)".into()),
        allow_mutation: false,
    };
    let first = orchestrator
        .verify(artifact.clone(), VerificationMode::High)
        .await;
    let second = orchestrator.verify(artifact, VerificationMode::High).await;
    assert_eq!(first.without_timings(), second.without_timings());
}

#[tokio::test]
#[ignore = "requires z3 and cvc5 on PATH"]
async fn solver_engines_confirm_exact_arithmetic() {
    let orchestrator = Orchestrator::from_config(&VerificationConfig::default()).unwrap();
    let verdict = orchestrator
        .verify(
            Artifact::Arithmetic {
                expression: "(DIV 7 2)".into(),
                expected: "3".into(),
                tolerance: None,
            },
            VerificationMode::Maximum,
        )
        .await;
    assert!(verdict.is_verified());
    assert_eq!(verdict.agreement, Agreement::Unanimous);
    assert_eq!(verdict.results.len(), 3);
}

#[tokio::test]
#[ignore = "requires z3 on PATH"]
async fn satisfiable_formula_is_verified_by_z3() {
    let orchestrator = Orchestrator::from_config(&VerificationConfig::default()).unwrap();
    let verdict = orchestrator
        .verify(
            Artifact::Logic {
                formula: "(AND (GT x 5) (LT x 7))".into(),
            },
            VerificationMode::Single,
        )
        .await;
    assert!(verdict.is_verified());
    match &verdict.results[0].detail {
        EngineDetail::Satisfiable { model, .. } => assert_eq!(model["x"], "6"),
        other => panic!("unexpected detail {other:?}"),
    }
}
