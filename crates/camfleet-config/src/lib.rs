//! Configuration for the camfleet agent.
//!
//! An [`AgentConfig`] is layered with `figment`: built-in defaults (or a
//! caller-supplied base), then a JSON or TOML file, then `CAMFLEET_`
//! environment variables. [`AgentConfig::to_runtime`] validates the result
//! and translates it to the `camfleet_core` runtime types.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use camfleet_core::{
    CameraOptions, Credentials, LanConfig, StaticCamera, UnmatchedInterfacePolicy, UpstreamConfig,
};

/// Prefix of the environment overrides. Nested keys use `__`
/// (`CAMFLEET_DEFAULT_CREDENTIALS__USER`).
pub const ENV_PREFIX: &str = "CAMFLEET_";

const REDACTED: &str = "********";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config file not found: {}", path.display())]
    Missing { path: PathBuf },

    #[error("unsupported config file type: {} (expected .json or .toml)", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── Config structs ──────────────────────────────────────────────────

/// Everything the agent reads at startup. Periods are in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Local user name presented to the remote controller.
    pub user: String,

    /// Ordered interface patterns; a leading `!` excludes.
    #[serde(rename = "discover")]
    pub discover_patterns: Vec<String>,

    pub scan_period: u64,
    pub check_period: u64,
    pub register_period: u64,

    /// Missed discovery rounds before a camera is dropped.
    pub grace_generations: u32,

    /// Pause between two capture attempts of a failing camera.
    pub retry_backoff: u64,

    pub unmatched_interfaces: UnmatchedInterfacePolicy,

    /// Interfaces swept whatever the patterns say.
    pub interfaces: Vec<String>,

    /// Cameras assumed present on every round.
    pub cameras: Vec<CameraEntry>,

    #[serde(rename = "upstreams")]
    pub upstream: UpstreamEntry,

    pub default_credentials: CredentialsEntry,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            user: "camfleet".into(),
            discover_patterns: vec!["!lo".into(), "!docker.*".into(), ".*".into()],
            scan_period: 60,
            check_period: 10,
            register_period: 5,
            grace_generations: 3,
            retry_backoff: 5,
            unmatched_interfaces: UnmatchedInterfacePolicy::Exclude,
            interfaces: Vec::new(),
            cameras: Vec::new(),
            upstream: UpstreamEntry::default(),
            default_credentials: CredentialsEntry::default(),
        }
    }
}

/// A statically configured camera. Missing credentials fall back to
/// `default_credentials`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CameraEntry {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl CameraEntry {
    pub fn new(address: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            user: Some(user.into()),
            password: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamEntry {
    /// Controller endpoint, `host:port`.
    pub address: String,
    /// Dial timeout in seconds.
    pub timeout: u64,
}

impl Default for UpstreamEntry {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:6000".into(),
            timeout: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CredentialsEntry {
    pub user: String,
    pub password: String,
}

impl Default for CredentialsEntry {
    fn default() -> Self {
        Self {
            user: "admin".into(),
            password: String::new(),
        }
    }
}

// ── Loading ─────────────────────────────────────────────────────────

impl AgentConfig {
    /// Defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_over(&Self::default(), path)
    }

    /// Like [`load`](Self::load) with `base` in place of the defaults.
    /// Arrays present in a later layer replace the earlier ones.
    pub fn load_over(base: &Self, path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(base));

        if let Some(path) = path {
            if !path.is_file() {
                return Err(ConfigError::Missing {
                    path: path.to_owned(),
                });
            }
            figment = match path.extension().and_then(OsStr::to_str) {
                Some("json") => figment.merge(Json::file(path)),
                Some("toml") => figment.merge(Toml::file(path)),
                _ => {
                    return Err(ConfigError::UnsupportedFormat {
                        path: path.to_owned(),
                    });
                }
            };
        }

        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Overlay a JSON document on `base`, without touching the
    /// environment.
    pub fn load_str_json(base: &Self, text: &str) -> Result<Self, ConfigError> {
        let config = Figment::from(Serialized::defaults(base))
            .merge(Json::string(text))
            .extract()?;
        Ok(config)
    }

    /// Copy with every password replaced, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        redact(&mut copy.default_credentials.password);
        for camera in &mut copy.cameras {
            if let Some(password) = camera.password.as_mut() {
                redact(password);
            }
        }
        copy
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    // ── Translation ─────────────────────────────────────────────────

    /// Validate and build the runtime configuration of both sides.
    pub fn to_runtime(&self) -> Result<(LanConfig, UpstreamConfig), ConfigError> {
        self.validate()?;
        if self.grace_generations < 2 && self.may_sweep_several_interfaces() {
            warn!(
                grace_generations = self.grace_generations,
                "several interfaces may be swept; cameras seen on one can be purged by \
                 another's batch of the same round, use grace_generations >= 2"
            );
        }

        let defaults = &self.default_credentials;
        let static_cameras = self
            .cameras
            .iter()
            .map(|cam| StaticCamera {
                address: cam.address.clone(),
                credentials: Credentials::new(
                    cam.user.as_deref().unwrap_or(&defaults.user),
                    cam.password.as_deref().unwrap_or(&defaults.password),
                ),
            })
            .collect();

        let lan = LanConfig {
            scan_period: Duration::from_secs(self.scan_period),
            check_period: Duration::from_secs(self.check_period),
            grace_generations: self.grace_generations,
            discover_patterns: self.discover_patterns.clone(),
            unmatched_interfaces: self.unmatched_interfaces,
            static_interfaces: self.interfaces.clone(),
            static_cameras,
            default_credentials: Credentials::new(&defaults.user, &defaults.password),
            camera: CameraOptions {
                retry_backoff: Duration::from_secs(self.retry_backoff),
                ..CameraOptions::default()
            },
        };

        let upstream = UpstreamConfig {
            user: self.user.clone(),
            address: self.upstream.address.clone(),
            timeout: Duration::from_secs(self.upstream.timeout),
            register_period: Duration::from_secs(self.register_period),
        };

        Ok((lan, upstream))
    }

    /// `true` unless the sweep is pinned to at most one static interface:
    /// no selecting pattern and unmatched interfaces excluded.
    fn may_sweep_several_interfaces(&self) -> bool {
        let selecting = self
            .discover_patterns
            .iter()
            .any(|p| !p.starts_with('!'));
        self.interfaces.len() > 1
            || selecting
            || self.unmatched_interfaces == UnmatchedInterfacePolicy::Include
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.user.trim().is_empty() {
            return Err(ConfigError::invalid("user", "must not be empty"));
        }
        if self.grace_generations == 0 {
            return Err(ConfigError::invalid("grace_generations", "must be at least 1"));
        }
        validate_endpoint(&self.upstream.address)?;
        if let Some(cam) = self.cameras.iter().find(|c| c.address.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "cameras",
                format!("entry without address (user {:?})", cam.user),
            ));
        }
        Ok(())
    }
}

fn validate_endpoint(address: &str) -> Result<(), ConfigError> {
    let Some((host, port)) = address.rsplit_once(':') else {
        return Err(ConfigError::invalid(
            "upstreams.address",
            format!("expected host:port, got '{address}'"),
        ));
    };
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(ConfigError::invalid(
            "upstreams.address",
            format!("expected host:port, got '{address}'"),
        ));
    }
    Ok(())
}

fn redact(password: &mut String) {
    if !password.is_empty() {
        REDACTED.clone_into(password);
    }
}
