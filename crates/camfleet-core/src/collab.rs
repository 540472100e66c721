// ── Collaborator contracts ──
//
// Everything the core consumes but does not implement: interface
// enumeration, device discovery and authentication, the media transport
// session, and the remote control channel. Production wiring provides
// real implementations; tests provide mocks.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use secrecy::SecretString;
use url::Url;

use crate::error::CoreError;

// ── LAN discovery ────────────────────────────────────────────────

/// A device found by a discovery sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Stable unique identifier (device UUID or serial number).
    pub id: String,
    /// Endpoint the device answered from (host, host:port or service URL).
    pub address: String,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

/// Credentials presented to a device during authentication.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Enumerates the local network attachment points.
#[async_trait]
pub trait InterfaceSource: Send + Sync {
    async fn interfaces(&self) -> Result<Vec<String>, CoreError>;
}

/// Sweeps one interface for cameras.
#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    async fn discover(&self, interface: &str) -> Result<Vec<DeviceDescriptor>, CoreError>;
}

/// Authenticates against a discovered device.
#[async_trait]
pub trait DeviceAuthenticator: Send + Sync {
    async fn authenticate(
        &self,
        device: &DeviceDescriptor,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Appliance>, CoreError>;
}

/// An authenticated device.
#[async_trait]
pub trait Appliance: Send + Sync {
    /// Best effort: an empty or malformed URI surfaces later as a
    /// connection failure.
    async fn fetch_stream_uri(&self) -> String;
}

// ── Media transport ──────────────────────────────────────────────

/// Payload family of a relayed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum FrameKind {
    Sdp,
    Rtp,
    Rtcp,
}

/// One opaque unit of media or control data. Never decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFrame {
    pub kind: FrameKind,
    pub payload: Bytes,
}

impl MediaFrame {
    pub fn new(kind: FrameKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }
}

/// A track advertised by `describe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: usize,
    pub control: String,
}

/// Session description returned by `describe`.
#[derive(Debug, Clone)]
pub struct Description {
    pub sdp: Bytes,
    pub tracks: Vec<Track>,
}

/// Opens media sessions towards a stream URL.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn open(&self, url: &Url) -> Result<Box<dyn MediaSession>, CoreError>;
}

/// A live capture session. Dropping it releases the transport.
#[async_trait]
pub trait MediaSession: Send {
    async fn describe(&mut self) -> Result<Description, CoreError>;
    async fn setup_track(&mut self, track: &Track) -> Result<(), CoreError>;
    async fn play(&mut self) -> Result<(), CoreError>;
    async fn pause(&mut self) -> Result<(), CoreError>;

    /// Next inbound frame. `Ok(None)` means the peer ended the session.
    async fn next_frame(&mut self) -> Result<Option<MediaFrame>, CoreError>;
}

/// Relay target for captured frames on the remote side.
#[async_trait]
pub trait UploadSink: Send {
    async fn on_sdp(&mut self, payload: Bytes) -> Result<(), CoreError>;
    async fn on_rtp(&mut self, payload: Bytes) -> Result<(), CoreError>;
    async fn on_rtcp(&mut self, payload: Bytes) -> Result<(), CoreError>;
    async fn close(&mut self);
}

// ── Remote control channel ───────────────────────────────────────

/// Command pushed by the remote controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    Play { stream_id: String },
    Pause { stream_id: String },
}

/// An established connection to the remote controller.
pub struct RemoteConnection {
    /// Inbound control stream. Ends (or yields an error) when the
    /// connection drops.
    pub commands: BoxStream<'static, Result<RemoteCommand, CoreError>>,
    /// Unary calls on the same connection.
    pub link: Arc<dyn RemoteLink>,
}

/// Dials the remote controller.
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    async fn connect(&self) -> Result<RemoteConnection, CoreError>;
}

/// Calls available while connected.
#[async_trait]
pub trait RemoteLink: Send + Sync {
    async fn register(&self, user: &str, stream_id: &str) -> Result<(), CoreError>;
    async fn open_upload(
        &self,
        user: &str,
        stream_id: &str,
    ) -> Result<Box<dyn UploadSink>, CoreError>;
}
