// ── Core error types ──
//
// Errors surfaced by camfleet-core. Collaborators (discovery, media
// transport, remote channel) report failures through these variants;
// long-lived loops log them with context and never propagate them.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── LAN side ─────────────────────────────────────────────────────
    #[error("Cannot enumerate network interfaces: {reason}")]
    InterfaceEnumeration { reason: String },

    #[error("Discovery failed on interface {interface}: {reason}")]
    Discovery { interface: String, reason: String },

    #[error("Authentication failed for device {device} at {address}: {reason}")]
    Authentication {
        device: String,
        address: String,
        reason: String,
    },

    #[error("Camera not found: {camera}")]
    CameraNotFound { camera: String },

    // ── Media side ───────────────────────────────────────────────────
    #[error("Invalid stream URI {uri:?}: {source}")]
    InvalidStreamUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Media session {action} failed: {reason}")]
    MediaSession { action: String, reason: String },

    #[error("Media session returned no track to set up")]
    NoTrack,

    #[error("Upload sink error: {reason}")]
    UploadSink { reason: String },

    // ── Remote side ──────────────────────────────────────────────────
    #[error("Cannot reach remote controller at {address}: {reason}")]
    RemoteUnavailable { address: String, reason: String },

    #[error("Remote call {call} failed: {reason}")]
    Remote { call: String, reason: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for a failed media-session step.
    pub fn media(action: impl Into<String>, reason: impl ToString) -> Self {
        Self::MediaSession {
            action: action.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for a failed remote call.
    pub fn remote(call: impl Into<String>, reason: impl ToString) -> Self {
        Self::Remote {
            call: call.into(),
            reason: reason.to_string(),
        }
    }
}
