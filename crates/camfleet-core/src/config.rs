// ── Runtime configuration ──
//
// These types describe *how* the agent runs: discovery cadence, which
// interfaces to sweep, which cameras to assume present, and where the
// remote controller lives. They carry credential data but never touch
// disk. The `camfleet-config` crate builds them from files and hands
// them in.

use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::collab::Credentials;

/// What to do with an enumerated interface that no discover pattern
/// matches.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UnmatchedInterfacePolicy {
    #[default]
    Exclude,
    Include,
}

/// A camera assumed present on every discovery round.
#[derive(Debug, Clone)]
pub struct StaticCamera {
    /// Device address; also used as its identity.
    pub address: String,
    pub credentials: Credentials,
}

/// Capture behaviour of a camera session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraOptions {
    /// Pause between two capture attempts after a failure.
    pub retry_backoff: Duration,
    /// `false` = one-shot: the first failure ends the capture task.
    pub retries: bool,
}

impl Default for CameraOptions {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_secs(5),
            retries: true,
        }
    }
}

/// LAN side: discovery and fleet supervision.
#[derive(Debug, Clone)]
pub struct LanConfig {
    /// Time between two discovery rounds. Zero falls back to one second.
    pub scan_period: Duration,
    /// Time between two fleet summaries. Zero falls back to one second.
    pub check_period: Duration,
    /// Missed rounds tolerated before a camera is purged.
    pub grace_generations: u32,
    /// Ordered include/exclude patterns (`!` prefix excludes).
    pub discover_patterns: Vec<String>,
    pub unmatched_interfaces: UnmatchedInterfacePolicy,
    /// Interfaces registered regardless of patterns.
    pub static_interfaces: Vec<String>,
    pub static_cameras: Vec<StaticCamera>,
    /// Used for discovered devices without a static entry.
    pub default_credentials: Credentials,
    pub camera: CameraOptions,
}

impl Default for LanConfig {
    fn default() -> Self {
        Self {
            scan_period: Duration::from_secs(60),
            check_period: Duration::from_secs(10),
            grace_generations: 3,
            discover_patterns: vec!["!lo".into(), "!docker.*".into(), ".*".into()],
            unmatched_interfaces: UnmatchedInterfacePolicy::default(),
            static_interfaces: Vec::new(),
            static_cameras: Vec::new(),
            default_credentials: Credentials {
                username: "admin".into(),
                password: SecretString::from(String::new()),
            },
            camera: CameraOptions::default(),
        }
    }
}

impl LanConfig {
    /// Credentials for the device at `address`: a static entry wins over
    /// the defaults.
    pub fn credentials_for(&self, address: &str) -> &Credentials {
        self.static_cameras
            .iter()
            .find(|c| c.address == address)
            .map_or(&self.default_credentials, |c| &c.credentials)
    }
}

/// Remote side: controller endpoint and registration cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    /// Local user name presented on registration and upload.
    pub user: String,
    /// Controller endpoint (`host:port`).
    pub address: String,
    /// Dial timeout, enforced by the channel implementation.
    pub timeout: Duration,
    /// Time between two registration sweeps. Zero falls back to 5 s.
    pub register_period: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            user: "camfleet".into(),
            address: "127.0.0.1:6000".into(),
            timeout: Duration::from_secs(30),
            register_period: Duration::from_secs(5),
        }
    }
}

/// Zero durations fall back to `fallback`.
pub(crate) fn period_or(period: Duration, fallback: Duration) -> Duration {
    if period.is_zero() { fallback } else { period }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn static_credentials_override_defaults() {
        let config = LanConfig {
            static_cameras: vec![StaticCamera {
                address: "10.0.0.7".into(),
                credentials: Credentials::new("root", "hunter2"),
            }],
            ..LanConfig::default()
        };

        let creds = config.credentials_for("10.0.0.7");
        assert_eq!(creds.username, "root");
        assert_eq!(creds.password.expose_secret(), "hunter2");
        assert_eq!(config.credentials_for("10.0.0.8").username, "admin");
    }

    #[test]
    fn zero_period_falls_back() {
        let one = Duration::from_secs(1);
        assert_eq!(period_or(Duration::ZERO, one), one);
        assert_eq!(period_or(Duration::from_secs(7), one), Duration::from_secs(7));
    }
}
