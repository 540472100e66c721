//! Camera fleet supervision between a LAN and a remote controller.
//!
//! This crate owns the business logic of the camfleet agent: which cameras
//! exist, whether each one should be streaming, and how to get there from
//! whatever the network and the operator currently say.
//!
//! - **[`LanSupervisor`]**: Enumerates interfaces, sweeps them for devices
//!   every scan period, and folds each discovery batch into the fleet:
//!   new cameras are authenticated and started, known ones refreshed, and
//!   those that missed [`LanConfig::grace_generations`] rounds purged.
//!   Generations are compared with wraparound-safe arithmetic
//!   ([`generation`]).
//!
//! - **[`Camera`]**: One device's session: a single-consumer state machine
//!   (`Off → Idle → Playing ⇄ Pausing/Resuming`) driving a linked
//!   capture + relay [`TaskGroup`] per play attempt.
//!
//! - **[`Reconciler`]**: Keeps the remote connection alive, registers the
//!   fleet, and converges remote play/pause intents with LAN presence in
//!   any arrival order. Frames reach the remote through per-camera
//!   [`UploadMedia`] handles fed by the in-process [`MediaBridge`].
//!
//! - **Collaborators** ([`collab`]): Discovery, authentication, media
//!   transport and the remote channel are traits; the crate never speaks
//!   ONVIF, RTSP or the wire protocol itself.
//!
//! The supervisor and the reconciler never reference each other: they are
//! wired through [`CameraObserver`] and [`StreamExpectationObserver`].

pub mod bridge;
pub mod camera;
pub mod collab;
pub mod config;
pub mod error;
pub mod events;
pub mod generation;
pub mod group;
pub mod lan;
pub mod nic;
pub mod registry;
pub mod upstream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bridge::MediaBridge;
pub use camera::{Camera, CameraCommand, CameraState, CaptureContext};
pub use collab::{
    Appliance, Credentials, Description, DeviceAuthenticator, DeviceDescriptor, DeviceDiscovery,
    FrameKind, InterfaceSource, MediaFrame, MediaSession, MediaTransport, RemoteChannel,
    RemoteCommand, RemoteConnection, RemoteLink, Track, UploadSink,
};
pub use config::{CameraOptions, LanConfig, StaticCamera, UnmatchedInterfacePolicy, UpstreamConfig};
pub use error::CoreError;
pub use events::{CameraObserver, Presence, StreamExpectation, StreamExpectationObserver};
pub use group::TaskGroup;
pub use lan::{LanCollaborators, LanSupervisor};
pub use nic::{InterfaceDecision, InterfaceFilter, NetworkInterface};
pub use registry::{Keyed, Registry};
pub use upstream::{Reconciler, UploadIntent, UploadMedia};
