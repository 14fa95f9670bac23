//! Engine registry: engines in registration order, each with its effective
//! weight and its own circuit breaker.

use std::sync::{Arc, Mutex, MutexGuard};

use qwed_smt::backends::process::Dialect;
use thiserror::Error;

use crate::artifact::{ArtifactKind, VerificationMode};
use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::config::{BreakerConfig, ConfigError, VerificationConfig};
use crate::engine::{ProcessBackend, VerificationEngine};
use crate::engines::{
    ArithmeticEngine, CodeSafetyEngine, JsonSchemaEngine, LogicEngine, SqlSafetyEngine,
};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("engine `{0}` is already registered")]
    DuplicateEngine(String),
    #[error("failed to build rule table: {0}")]
    Rules(#[from] regex::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub struct EngineEntry {
    engine: Arc<dyn VerificationEngine>,
    weight: f64,
    breaker: Mutex<CircuitBreaker>,
}

impl EngineEntry {
    pub fn id(&self) -> &str {
        self.engine.id()
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn engine(&self) -> &Arc<dyn VerificationEngine> {
        &self.engine
    }

    /// The breaker is plain data, so a panic while it was held cannot leave
    /// it half-updated in a way that matters; poisoning is ignored.
    pub fn breaker(&self) -> MutexGuard<'_, CircuitBreaker> {
        match self.breaker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub struct Registry {
    entries: Vec<EngineEntry>,
    breaker_config: BreakerConfig,
}

impl Registry {
    pub fn new(breaker_config: BreakerConfig) -> Self {
        Self {
            entries: Vec::new(),
            breaker_config,
        }
    }

    /// The standard engine family: exact arithmetic, z3 and cvc5 logic
    /// engines, SQL and code safety, JSON Schema conformance.
    pub fn with_default_engines(config: &VerificationConfig) -> Result<Self, RegistryError> {
        config.validate()?;
        let limits = config.limits.parser_limits();
        let options = config.limits.compile_options();
        let timeout = config.solver.timeout();

        let mut registry = Self::new(config.breaker);
        let engines: Vec<Arc<dyn VerificationEngine>> = vec![
            Arc::new(ArithmeticEngine::new(limits, options.max_exponent)),
            Arc::new(LogicEngine::new(
                "logic-z3",
                0.995,
                Arc::new(ProcessBackend::new(
                    Dialect::Z3,
                    &config.solver.z3_command,
                    timeout,
                )),
                limits,
                options,
            )),
            Arc::new(LogicEngine::new(
                "logic-cvc5",
                0.99,
                Arc::new(ProcessBackend::new(
                    Dialect::Cvc5,
                    &config.solver.cvc5_command,
                    timeout,
                )),
                limits,
                options,
            )),
            Arc::new(SqlSafetyEngine::new()?),
            Arc::new(CodeSafetyEngine::new()?),
            Arc::new(JsonSchemaEngine::new(limits.max_input_bytes)?),
        ];
        for engine in engines {
            let weight = config.weights.get(engine.id()).copied();
            registry.register(engine, weight)?;
        }
        Ok(registry)
    }

    pub fn register(
        &mut self,
        engine: Arc<dyn VerificationEngine>,
        weight: Option<f64>,
    ) -> Result<(), RegistryError> {
        if self.entries.iter().any(|entry| entry.id() == engine.id()) {
            return Err(RegistryError::DuplicateEngine(engine.id().to_string()));
        }
        let weight = weight.unwrap_or_else(|| engine.default_weight());
        let breaker = CircuitBreaker::new(engine.id(), self.breaker_config);
        self.entries.push(EngineEntry {
            engine,
            weight,
            breaker: Mutex::new(breaker),
        });
        Ok(())
    }

    pub fn entries(&self) -> &[EngineEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&EngineEntry> {
        self.entries.iter().find(|entry| entry.id() == id)
    }

    pub fn breaker_snapshot(&self, id: &str) -> Option<BreakerSnapshot> {
        self.get(id).map(|entry| entry.breaker().snapshot())
    }

    /// Indices of the engines a request is dispatched to, in registry order.
    ///
    /// Applicable engines are ranked by weight (ties keep registration
    /// order) and the mode's budget is taken from the top.
    pub fn select(&self, kind: ArtifactKind, mode: VerificationMode) -> Vec<usize> {
        let mut ranked: Vec<usize> = (0..self.entries.len())
            .filter(|&i| self.entries[i].engine.supports(kind))
            .collect();
        ranked.sort_by(|&a, &b| self.entries[b].weight.total_cmp(&self.entries[a].weight));
        if let Some(budget) = mode.engine_budget() {
            ranked.truncate(budget);
        }
        ranked.sort_unstable();
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_registry() -> Registry {
        Registry::with_default_engines(&VerificationConfig::default()).unwrap()
    }

    fn ids(registry: &Registry, picked: &[usize]) -> Vec<String> {
        picked
            .iter()
            .map(|&i| registry.entries()[i].id().to_string())
            .collect()
    }

    #[test]
    fn default_family_in_registration_order() {
        let registry = default_registry();
        let all: Vec<&str> = registry.entries().iter().map(EngineEntry::id).collect();
        assert_eq!(
            all,
            vec![
                "arithmetic",
                "logic-z3",
                "logic-cvc5",
                "sql-safety",
                "code-safety",
                "json-schema"
            ]
        );
    }

    #[test]
    fn modes_pick_top_weights() {
        let registry = default_registry();
        let single = registry.select(ArtifactKind::Arithmetic, VerificationMode::Single);
        assert_eq!(ids(&registry, &single), vec!["arithmetic"]);
        let high = registry.select(ArtifactKind::Arithmetic, VerificationMode::High);
        assert_eq!(ids(&registry, &high), vec!["arithmetic", "logic-z3"]);
        let max = registry.select(ArtifactKind::Arithmetic, VerificationMode::Maximum);
        assert_eq!(ids(&registry, &max), vec!["arithmetic", "logic-z3", "logic-cvc5"]);
        let logic = registry.select(ArtifactKind::Logic, VerificationMode::Single);
        assert_eq!(ids(&registry, &logic), vec!["logic-z3"]);
        let schema = registry.select(ArtifactKind::Schema, VerificationMode::Maximum);
        assert_eq!(ids(&registry, &schema), vec!["json-schema"]);
    }

    #[test]
    fn weight_overrides_change_the_ranking() {
        let mut config = VerificationConfig::default();
        config.weights.insert("logic-cvc5".into(), 1.0);
        let registry = Registry::with_default_engines(&config).unwrap();
        let single = registry.select(ArtifactKind::Logic, VerificationMode::Single);
        assert_eq!(ids(&registry, &single), vec!["logic-cvc5"]);
        // Equal weights keep registration order.
        let high = registry.select(ArtifactKind::Arithmetic, VerificationMode::High);
        assert_eq!(ids(&registry, &high), vec!["arithmetic", "logic-cvc5"]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut registry = default_registry();
        let err = registry
            .register(Arc::new(SqlSafetyEngine::new().unwrap()), None)
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateEngine(id) if id == "sql-safety"));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = VerificationConfig::default();
        config.breaker.window = 0;
        assert!(matches!(
            Registry::with_default_engines(&config),
            Err(RegistryError::Config(_))
        ));
    }
}
