use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Category of a structured artifact, used to pick applicable engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Logic,
    Arithmetic,
    Sql,
    Code,
    Schema,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Logic => "logic",
            ArtifactKind::Arithmetic => "arithmetic",
            ArtifactKind::Sql => "sql",
            ArtifactKind::Code => "code",
            ArtifactKind::Schema => "schema",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured output of the untrusted translator, to be proved or refuted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    /// A constraint-language formula; verified means satisfiable.
    Logic { formula: String },
    /// Claim that a ground expression evaluates to `expected`, optionally
    /// within `tolerance`.
    Arithmetic {
        expression: String,
        expected: String,
        #[serde(default)]
        tolerance: Option<String>,
    },
    Sql {
        query: String,
        /// `CREATE TABLE` statements the query is checked against.
        #[serde(default)]
        schema: Option<String>,
        #[serde(default)]
        allow_mutation: bool,
    },
    Code { source: String, language: String },
    /// A JSON document that must conform to a JSON Schema, both as text.
    Schema { data: String, schema: String },
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Artifact::Logic { .. } => ArtifactKind::Logic,
            Artifact::Arithmetic { .. } => ArtifactKind::Arithmetic,
            Artifact::Sql { .. } => ArtifactKind::Sql,
            Artifact::Code { .. } => ArtifactKind::Code,
            Artifact::Schema { .. } => ArtifactKind::Schema,
        }
    }
}

/// How many applicable engines a request is dispatched to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    /// The single most reliable engine.
    #[default]
    Single,
    /// The two most reliable engines.
    High,
    /// Every applicable engine.
    Maximum,
}

impl VerificationMode {
    /// Engine budget for this mode; `None` means unbounded.
    pub fn engine_budget(self) -> Option<usize> {
        match self {
            VerificationMode::Single => Some(1),
            VerificationMode::High => Some(2),
            VerificationMode::Maximum => None,
        }
    }
}

impl FromStr for VerificationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(VerificationMode::Single),
            "high" => Ok(VerificationMode::High),
            "maximum" => Ok(VerificationMode::Maximum),
            other => Err(format!(
                "unknown verification mode '{other}' (expected single, high or maximum)"
            )),
        }
    }
}
