//! Configuration record consumed by the engines and the orchestrator.
//!
//! The library never touches files or the environment. Callers build a
//! [`VerificationConfig`] in code or hand over JSON text they loaded
//! themselves.

use std::time::Duration;

use indexmap::IndexMap;
use qwed_dsl::parser::MAX_DEPTH_CEILING;
use qwed_dsl::Limits;
use qwed_smt::CompileOptions;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("`{field}` must be {requirement}, got {value}")]
    OutOfRange {
        field: String,
        requirement: &'static str,
        value: String,
    },
}

fn out_of_range(field: impl Into<String>, requirement: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::OutOfRange {
        field: field.into(),
        requirement,
        value: value.to_string(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub limits: LimitsConfig,
    pub solver: SolverConfig,
    pub breaker: BreakerConfig,
    pub consensus: ConsensusConfig,
    /// Reliability weight overrides keyed by engine id.
    pub weights: IndexMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_input_bytes: usize,
    pub max_depth: usize,
    pub max_nodes: usize,
    pub max_exponent: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            max_input_bytes: limits.max_input_bytes,
            max_depth: limits.max_depth,
            max_nodes: limits.max_nodes,
            max_exponent: CompileOptions::default().max_exponent,
        }
    }
}

impl LimitsConfig {
    pub fn parser_limits(&self) -> Limits {
        Limits {
            max_input_bytes: self.max_input_bytes,
            max_depth: self.max_depth,
            max_nodes: self.max_nodes,
        }
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            max_exponent: self.max_exponent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub timeout_ms: u64,
    pub z3_command: String,
    pub cvc5_command: String,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            z3_command: "z3".into(),
            cvc5_command: "cvc5".into(),
        }
    }
}

impl SolverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Number of recent outcomes kept in the sliding window.
    pub window: usize,
    /// Failure rate above which a closed breaker opens.
    pub failure_threshold: f64,
    /// The breaker never trips on fewer outcomes than this.
    pub minimum_calls: usize,
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window: 20,
            failure_threshold: 0.5,
            minimum_calls: 5,
            cooldown_ms: 30_000,
        }
    }
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// A status wins when its share of the vote mass reaches this and
    /// outweighs everything else.
    pub majority_threshold: f64,
    pub deadline_ms: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            majority_threshold: 0.5,
            deadline_ms: 10_000,
        }
    }
}

impl ConsensusConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl VerificationConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        if limits.max_input_bytes == 0 {
            return Err(out_of_range("limits.max_input_bytes", "positive", 0));
        }
        if limits.max_depth == 0 || limits.max_depth > MAX_DEPTH_CEILING {
            return Err(out_of_range(
                "limits.max_depth",
                "between 1 and 512",
                limits.max_depth,
            ));
        }
        if limits.max_nodes == 0 {
            return Err(out_of_range("limits.max_nodes", "positive", 0));
        }
        if limits.max_exponent > 64 {
            return Err(out_of_range(
                "limits.max_exponent",
                "at most 64",
                limits.max_exponent,
            ));
        }

        if self.solver.timeout_ms == 0 {
            return Err(out_of_range("solver.timeout_ms", "positive", 0));
        }
        for (field, command) in [
            ("solver.z3_command", &self.solver.z3_command),
            ("solver.cvc5_command", &self.solver.cvc5_command),
        ] {
            if command.trim().is_empty() {
                return Err(out_of_range(field, "a non-empty command", "\"\""));
            }
        }

        let breaker = &self.breaker;
        if breaker.window == 0 {
            return Err(out_of_range("breaker.window", "positive", 0));
        }
        if !(breaker.failure_threshold > 0.0 && breaker.failure_threshold < 1.0) {
            return Err(out_of_range(
                "breaker.failure_threshold",
                "strictly between 0 and 1",
                breaker.failure_threshold,
            ));
        }
        if breaker.minimum_calls == 0 || breaker.minimum_calls > breaker.window {
            return Err(out_of_range(
                "breaker.minimum_calls",
                "between 1 and the window size",
                breaker.minimum_calls,
            ));
        }

        let threshold = self.consensus.majority_threshold;
        if !(0.5..1.0).contains(&threshold) {
            return Err(out_of_range(
                "consensus.majority_threshold",
                "at least 0.5 and below 1",
                threshold,
            ));
        }
        if self.consensus.deadline_ms == 0 {
            return Err(out_of_range("consensus.deadline_ms", "positive", 0));
        }

        for (engine, weight) in &self.weights {
            if !(weight.is_finite() && *weight > 0.0) {
                return Err(out_of_range(
                    format!("weights.{engine}"),
                    "a positive finite number",
                    weight,
                ));
            }
        }
        Ok(())
    }
}
