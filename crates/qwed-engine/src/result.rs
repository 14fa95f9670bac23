use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::orchestrator::OrchestratorError;

/// Outcome of one engine invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Verified,
    Failed,
    /// The artifact violates a safety rule and must not be used.
    Blocked,
    /// The engine could not reach a verdict.
    Error,
    /// No answer arrived in time.
    Timeout,
}

impl EngineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineStatus::Verified => "VERIFIED",
            EngineStatus::Failed => "FAILED",
            EngineStatus::Blocked => "BLOCKED",
            EngineStatus::Error => "ERROR",
            EngineStatus::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

/// One finding from a static safety engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub severity: Severity,
    pub rule: String,
    pub message: String,
    /// 1-based source line, when the rule matched a single line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Issue {
    pub fn new(severity: Severity, rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            rule: rule.into(),
            message: message.into(),
            line: None,
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

/// Engine-specific payload attached to a result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineDetail {
    /// The formula has a model.
    Satisfiable {
        model: BTreeMap<String, String>,
        fingerprint: String,
    },
    Unsatisfiable { fingerprint: String },
    /// The negated claim is unsatisfiable, so the claim holds.
    Proved { fingerprint: String },
    /// An assignment under which the claim is false.
    Counterexample {
        model: BTreeMap<String, String>,
        fingerprint: String,
    },
    Inconclusive { reason: String },
    Evaluation {
        computed: String,
        expected: String,
        difference: String,
    },
    Issues { issues: Vec<Issue> },
    InputRejected {
        stage: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
    },
    Fault { message: String },
    CircuitOpen,
    TimedOut { deadline_ms: u64 },
}

impl fmt::Display for EngineDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineDetail::Satisfiable { model, .. } => {
                write!(f, "satisfiable")?;
                write_model(f, model)
            }
            EngineDetail::Unsatisfiable { .. } => write!(f, "unsatisfiable"),
            EngineDetail::Proved { .. } => write!(f, "proved"),
            EngineDetail::Counterexample { model, .. } => {
                write!(f, "counterexample")?;
                write_model(f, model)
            }
            EngineDetail::Inconclusive { reason } => write!(f, "inconclusive: {reason}"),
            EngineDetail::Evaluation {
                computed, expected, ..
            } => write!(f, "computed {computed}, expected {expected}"),
            EngineDetail::Issues { issues } => write!(f, "{} issue(s)", issues.len()),
            EngineDetail::InputRejected {
                stage,
                message,
                position,
            } => match position {
                Some(at) => write!(f, "{stage} rejected input at byte {at}: {message}"),
                None => write!(f, "{stage} rejected input: {message}"),
            },
            EngineDetail::Fault { message } => write!(f, "engine fault: {message}"),
            EngineDetail::CircuitOpen => write!(f, "circuit open"),
            EngineDetail::TimedOut { deadline_ms } => {
                write!(f, "no answer within {deadline_ms} ms")
            }
        }
    }
}

fn write_model(f: &mut fmt::Formatter<'_>, model: &BTreeMap<String, String>) -> fmt::Result {
    if model.is_empty() {
        return Ok(());
    }
    let bindings: Vec<String> = model.iter().map(|(k, v)| format!("{k} = {v}")).collect();
    write!(f, " ({})", bindings.join(", "))
}

/// What an engine says about an artifact, before the orchestrator stamps
/// it with an engine id and latency.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineVerdict {
    pub status: EngineStatus,
    pub confidence: f64,
    pub detail: EngineDetail,
}

impl EngineVerdict {
    pub fn new(status: EngineStatus, confidence: f64, detail: EngineDetail) -> Self {
        Self {
            status,
            confidence: confidence.clamp(0.0, 1.0),
            detail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineResult {
    pub engine: String,
    pub status: EngineStatus,
    pub confidence: f64,
    pub detail: EngineDetail,
    pub latency_ms: u64,
}

impl EngineResult {
    pub fn from_verdict(engine: impl Into<String>, verdict: EngineVerdict, latency_ms: u64) -> Self {
        Self {
            engine: engine.into(),
            status: verdict.status,
            confidence: verdict.confidence,
            detail: verdict.detail,
            latency_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Agreement {
    Unanimous,
    Majority,
    Split,
}

/// Aggregated answer for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusVerdict {
    pub status: EngineStatus,
    pub confidence: f64,
    pub agreement: Agreement,
    /// Per-engine results in registry order.
    pub results: Vec<EngineResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<OrchestratorError>,
}

impl ConsensusVerdict {
    pub fn is_verified(&self) -> bool {
        self.status == EngineStatus::Verified
    }

    /// Copy with every latency zeroed, for comparing two runs.
    pub fn without_timings(&self) -> Self {
        let mut copy = self.clone();
        for result in &mut copy.results {
            result.latency_ms = 0;
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_open_renders_as_plain_text() {
        assert_eq!(EngineDetail::CircuitOpen.to_string(), "circuit open");
    }

    #[test]
    fn detail_serializes_with_type_tag() {
        let detail = EngineDetail::InputRejected {
            stage: "parse".into(),
            message: "unknown operator".into(),
            position: Some(3),
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["type"], "input_rejected");
        assert_eq!(json["position"], 3);
    }

    #[test]
    fn verdict_confidence_is_clamped() {
        let verdict = EngineVerdict::new(EngineStatus::Verified, 1.7, EngineDetail::CircuitOpen);
        assert_eq!(verdict.confidence, 1.0);
    }

    #[test]
    fn model_is_listed_in_display() {
        let mut model = BTreeMap::new();
        model.insert("x".to_string(), "6".to_string());
        model.insert("y".to_string(), "9".to_string());
        let detail = EngineDetail::Satisfiable {
            model,
            fingerprint: String::new(),
        };
        assert_eq!(detail.to_string(), "satisfiable (x = 6, y = 9)");
    }
}
