//! CLI argument definitions: top-level `Cli` struct and `Commands` enum.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use qwed_engine::VerificationMode;

#[derive(Parser)]
#[command(name = "qwed")]
#[command(
    about = "Deterministic verification of logic, arithmetic, SQL, code and JSON artifacts"
)]
#[command(version)]
pub(crate) struct Cli {
    /// JSON configuration file; defaults apply to every missing field
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Verify an artifact and print the consensus verdict as JSON
    Verify {
        /// Artifact file; reads stdin when omitted or `-`
        input: Option<PathBuf>,

        /// What the input is
        #[arg(long, value_enum, default_value_t = KindArg::Logic)]
        kind: KindArg,

        /// How many engines to consult: single | high | maximum
        #[arg(long, default_value = "single")]
        mode: VerificationMode,

        /// Expected value of an arithmetic expression
        #[arg(long, required_if_eq("kind", "arithmetic"))]
        expected: Option<String>,

        /// Accepted absolute difference for an arithmetic claim
        #[arg(long)]
        tolerance: Option<String>,

        /// Source language of a code artifact
        #[arg(long, default_value = "python")]
        language: String,

        /// CREATE TABLE statements for SQL checks, or the JSON Schema a
        /// schema artifact must conform to
        #[arg(long, required_if_eq("kind", "schema"))]
        schema: Option<PathBuf>,

        /// Permit INSERT, UPDATE, DELETE and DDL statements in SQL
        #[arg(long, default_value_t = false)]
        allow_mutation: bool,
    },
    /// Compile a formula and print its SMT-LIB2 script and fingerprint
    Compile {
        /// Formula file; reads stdin when omitted or `-`
        input: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum KindArg {
    Logic,
    Arithmetic,
    Sql,
    Code,
    Schema,
}
