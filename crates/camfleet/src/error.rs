//! CLI error types with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use camfleet_config::ConfigError;
use camfleet_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const SYSTEM: i32 = 4;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file not found: {path}")]
    #[diagnostic(
        code(camfleet::no_config),
        help("Pass an existing .json or .toml file with --config, or unset CAMFLEET_CONFIG.")
    )]
    NoConfig { path: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(camfleet::validation))]
    Validation { field: String, reason: String },

    #[error("Could not load configuration")]
    #[diagnostic(
        code(camfleet::config),
        help("Supported formats are JSON and TOML; CAMFLEET_* variables override file values.")
    )]
    Config(#[source] ConfigError),

    // ── System ───────────────────────────────────────────────────────
    #[error("Could not enumerate network interfaces: {reason}")]
    #[diagnostic(
        code(camfleet::interfaces),
        help("The agent reads interface names from /sys/class/net.")
    )]
    Interfaces { reason: String },

    #[error("{0}")]
    #[diagnostic(code(camfleet::core))]
    Core(CoreError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render JSON: {0}")]
    #[diagnostic(code(camfleet::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } => exit_code::USAGE,
            Self::NoConfig { .. } | Self::Config(_) => exit_code::CONFIG,
            Self::Interfaces { .. } | Self::Io(_) => exit_code::SYSTEM,
            Self::Core(_) | Self::Json(_) => exit_code::GENERAL,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Missing { path } => Self::NoConfig {
                path: path.display().to_string(),
            },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InterfaceEnumeration { reason } => Self::Interfaces { reason },
            other => Self::Core(other),
        }
    }
}
