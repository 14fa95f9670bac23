mod cli;
mod commands;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use commands::helpers::load_config;
use commands::verify::VerifyArgs;

/// Exit status of `verify` when the consensus is anything but verified.
const NOT_VERIFIED: u8 = 2;

fn main() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Verify {
            input,
            kind,
            mode,
            expected,
            tolerance,
            language,
            schema,
            allow_mutation,
        } => {
            let verdict = commands::verify::run_verify_command(
                &config,
                VerifyArgs {
                    input,
                    kind,
                    mode,
                    expected,
                    tolerance,
                    language,
                    schema,
                    allow_mutation,
                },
            )?;
            if verdict.is_verified() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(NOT_VERIFIED))
            }
        }
        Commands::Compile { input } => {
            commands::compile::run_compile_command(&config, input)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
