//! Input and configuration loading shared by the subcommands.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use miette::IntoDiagnostic;
use qwed_engine::VerificationConfig;

/// Defaults when no file is given; otherwise the file must parse and
/// validate.
pub(crate) fn load_config(path: Option<&Path>) -> miette::Result<VerificationConfig> {
    let Some(path) = path else {
        return Ok(VerificationConfig::default());
    };
    let text = fs::read_to_string(path)
        .map_err(|e| miette::miette!("Failed to read config {}: {e}", path.display()))?;
    VerificationConfig::from_json_str(&text)
        .map_err(|e| miette::miette!("Invalid config {}: {e}", path.display()))
}

/// Source text and a display name for diagnostics. `None` and `-` read
/// stdin.
pub(crate) fn read_input(input: Option<&PathBuf>) -> miette::Result<(String, String)> {
    match input {
        Some(path) if path.as_os_str() != "-" => {
            let text = fs::read_to_string(path)
                .map_err(|e| miette::miette!("Failed to read {}: {e}", path.display()))?;
            Ok((path.display().to_string(), text))
        }
        _ => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text).into_diagnostic()?;
            Ok(("<stdin>".to_string(), text))
        }
    }
}
