// ── Presence and intent notifications ──
//
// The LAN supervisor and the remote reconciler each need to call into
// the other. Instead of holding references to each other they exchange
// events through these two observer traits, wired up by the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// LAN-side presence change of a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Presence {
    /// First seen on the network; the session exists.
    Online,
    /// Aged out of discovery.
    Offline,
    /// Explicitly forgotten; nothing about it should be kept.
    Vanished,
}

/// Remote operator's intent for a camera stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum StreamExpectation {
    Play,
    Pause,
}

/// Receives presence changes (implemented by the reconciler).
#[async_trait]
pub trait CameraObserver: Send + Sync {
    async fn camera_presence(&self, camera_id: &str, presence: Presence);
}

/// Receives stream expectations (implemented by the LAN supervisor).
#[async_trait]
pub trait StreamExpectationObserver: Send + Sync {
    async fn stream_expectation(&self, camera_id: &str, expectation: StreamExpectation);
}
