use std::path::PathBuf;

use miette::IntoDiagnostic;
use qwed_engine::{Artifact, ConsensusVerdict, Orchestrator, VerificationConfig, VerificationMode};
use tracing::info;

use super::helpers::read_input;
use crate::cli::KindArg;

pub(crate) struct VerifyArgs {
    pub(crate) input: Option<PathBuf>,
    pub(crate) kind: KindArg,
    pub(crate) mode: VerificationMode,
    pub(crate) expected: Option<String>,
    pub(crate) tolerance: Option<String>,
    pub(crate) language: String,
    pub(crate) schema: Option<PathBuf>,
    pub(crate) allow_mutation: bool,
}

fn build_artifact(args: VerifyArgs, text: String) -> miette::Result<Artifact> {
    Ok(match args.kind {
        KindArg::Logic => Artifact::Logic { formula: text },
        KindArg::Arithmetic => Artifact::Arithmetic {
            expression: text,
            expected: args
                .expected
                .ok_or_else(|| miette::miette!("--expected is required for arithmetic claims"))?,
            tolerance: args.tolerance,
        },
        KindArg::Sql => Artifact::Sql {
            query: text,
            schema: read_schema(args.schema.as_ref())?,
            allow_mutation: args.allow_mutation,
        },
        KindArg::Code => Artifact::Code {
            source: text,
            language: args.language,
        },
        KindArg::Schema => Artifact::Schema {
            data: text,
            schema: read_schema(args.schema.as_ref())?
                .ok_or_else(|| miette::miette!("--schema is required for schema artifacts"))?,
        },
    })
}

fn read_schema(path: Option<&PathBuf>) -> miette::Result<Option<String>> {
    path.map(|path| {
        std::fs::read_to_string(path)
            .map_err(|e| miette::miette!("Failed to read schema {}: {e}", path.display()))
    })
    .transpose()
}

pub(crate) fn run_verify_command(
    config: &VerificationConfig,
    args: VerifyArgs,
) -> miette::Result<ConsensusVerdict> {
    let (name, text) = read_input(args.input.as_ref())?;
    let mode = args.mode;
    let artifact = build_artifact(args, text)?;
    info!(input = %name, kind = %artifact.kind(), ?mode, "verifying");

    let orchestrator = Orchestrator::from_config(config).into_diagnostic()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;
    let verdict = runtime.block_on(orchestrator.verify(artifact, mode));

    println!("{}", serde_json::to_string_pretty(&verdict).into_diagnostic()?);
    Ok(verdict)
}
