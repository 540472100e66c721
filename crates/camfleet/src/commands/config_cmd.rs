//! `camfleet config`

use camfleet_config::AgentConfig;

use crate::cli::{ConfigArgs, OutputFormat};
use crate::error::CliError;

pub fn handle(args: &ConfigArgs, config: &AgentConfig) -> Result<(), CliError> {
    println!("{}", render(args.output, config)?);
    Ok(())
}

/// Validate `config`, then render it with passwords redacted.
fn render(format: OutputFormat, config: &AgentConfig) -> Result<String, CliError> {
    config.to_runtime()?;
    let shown = config.redacted();
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&shown)?),
        OutputFormat::Toml | OutputFormat::Text => Ok(shown.to_toml_string()?),
    }
}
