//! Command handlers.

pub mod config_cmd;
pub mod interfaces;

use camfleet_config::AgentConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

pub async fn dispatch(command: Command, global: &GlobalOpts) -> Result<(), CliError> {
    let config = AgentConfig::load(global.config.as_deref())?;
    tracing::debug!(command = ?command, config = ?global.config, "dispatching command");

    match command {
        Command::Config(args) => config_cmd::handle(&args, &config),
        Command::Interfaces(args) => interfaces::handle(&args, &config).await,
    }
}
