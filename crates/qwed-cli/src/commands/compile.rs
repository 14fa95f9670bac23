use std::path::PathBuf;

use miette::{IntoDiagnostic, NamedSource};
use qwed_dsl::parse_and_validate;
use qwed_engine::VerificationConfig;
use qwed_smt::compile;

use super::helpers::read_input;

/// Print the SMT-LIB2 script for a formula, followed by its fingerprint as
/// a comment line.
pub(crate) fn run_compile_command(
    config: &VerificationConfig,
    input: Option<PathBuf>,
) -> miette::Result<()> {
    let (name, text) = read_input(input.as_ref())?;
    let validated = parse_and_validate(&text, &config.limits.parser_limits()).map_err(|err| {
        miette::Report::new(err).with_source_code(NamedSource::new(name, text.clone()))
    })?;
    let compiled = compile(&validated, &config.limits.compile_options()).into_diagnostic()?;
    print!("{}", compiled.to_smtlib_script());
    println!("; sha256 {}", compiled.fingerprint());
    Ok(())
}
