#![allow(clippy::unwrap_used, dead_code)]
// Mock collaborators shared by the integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use secrecy::ExposeSecret;
use tokio::sync::mpsc;
use url::Url;

use camfleet_core::{
    Appliance, CameraObserver, CaptureContext, CoreError, Credentials, Description,
    DeviceAuthenticator, DeviceDescriptor, DeviceDiscovery, InterfaceSource, LanCollaborators,
    LanConfig, LanSupervisor, MediaBridge, MediaFrame, MediaSession, MediaTransport, Presence,
    RemoteChannel, RemoteCommand, RemoteConnection, RemoteLink, StreamExpectation,
    StreamExpectationObserver, Track, UploadSink,
};

// ── LAN side ────────────────────────────────────────────────────────

pub struct FixedInterfaces(pub Result<Vec<String>, String>);

#[async_trait]
impl InterfaceSource for FixedInterfaces {
    async fn interfaces(&self) -> Result<Vec<String>, CoreError> {
        self.0
            .clone()
            .map_err(|reason| CoreError::InterfaceEnumeration { reason })
    }
}

/// Answers each interface with whatever the test last scripted for it.
#[derive(Default)]
pub struct ScriptedDiscovery {
    devices: Mutex<HashMap<String, Vec<DeviceDescriptor>>>,
}

impl ScriptedDiscovery {
    pub fn set(&self, interface: &str, devices: Vec<DeviceDescriptor>) {
        self.devices
            .lock()
            .unwrap()
            .insert(interface.to_owned(), devices);
    }
}

#[async_trait]
impl DeviceDiscovery for ScriptedDiscovery {
    async fn discover(&self, interface: &str) -> Result<Vec<DeviceDescriptor>, CoreError> {
        Ok(self
            .devices
            .lock()
            .unwrap()
            .get(interface)
            .cloned()
            .unwrap_or_default())
    }
}

/// Records every attempt; refuses the ids listed in `reject`.
#[derive(Default)]
pub struct RecordingAuthenticator {
    pub attempts: Mutex<Vec<(String, String, String)>>,
    pub reject: Mutex<Vec<String>>,
}

impl RecordingAuthenticator {
    pub fn usernames_for(&self, id: &str) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|(device, _, _)| device == id)
            .map(|(_, user, _)| user.clone())
            .collect()
    }
}

#[async_trait]
impl DeviceAuthenticator for RecordingAuthenticator {
    async fn authenticate(
        &self,
        device: &DeviceDescriptor,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Appliance>, CoreError> {
        self.attempts.lock().unwrap().push((
            device.id.clone(),
            credentials.username.clone(),
            credentials.password.expose_secret().to_owned(),
        ));
        if self.reject.lock().unwrap().contains(&device.id) {
            return Err(CoreError::Authentication {
                device: device.id.clone(),
                address: device.address.clone(),
                reason: "401 Unauthorized".into(),
            });
        }
        Ok(Arc::new(StubAppliance(format!("rtsp://{}/stream1", device.address))))
    }
}

pub struct StubAppliance(String);

#[async_trait]
impl Appliance for StubAppliance {
    async fn fetch_stream_uri(&self) -> String {
        self.0.clone()
    }
}

/// Sessions that stay up until dropped.
#[derive(Default)]
pub struct IdleTransport {
    pub opened: AtomicUsize,
    pub live: Arc<AtomicUsize>,
}

struct IdleSession(Arc<AtomicUsize>);

impl Drop for IdleSession {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaTransport for IdleTransport {
    async fn open(&self, _url: &Url) -> Result<Box<dyn MediaSession>, CoreError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(IdleSession(Arc::clone(&self.live))))
    }
}

#[async_trait]
impl MediaSession for IdleSession {
    async fn describe(&mut self) -> Result<Description, CoreError> {
        Ok(Description {
            sdp: Bytes::from_static(b"v=0"),
            tracks: vec![Track {
                id: 0,
                control: "trackID=0".into(),
            }],
        })
    }
    async fn setup_track(&mut self, _track: &Track) -> Result<(), CoreError> {
        Ok(())
    }
    async fn play(&mut self) -> Result<(), CoreError> {
        Ok(())
    }
    async fn pause(&mut self) -> Result<(), CoreError> {
        Ok(())
    }
    async fn next_frame(&mut self) -> Result<Option<MediaFrame>, CoreError> {
        std::future::pending().await
    }
}

// ── Observers ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct PresenceLog(pub Mutex<Vec<(String, Presence)>>);

impl PresenceLog {
    pub fn count(&self, id: &str, presence: Presence) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, p)| c == id && *p == presence)
            .count()
    }
}

#[async_trait]
impl CameraObserver for PresenceLog {
    async fn camera_presence(&self, camera_id: &str, presence: Presence) {
        self.0.lock().unwrap().push((camera_id.to_owned(), presence));
    }
}

#[derive(Default)]
pub struct ExpectationLog(pub Mutex<Vec<(String, StreamExpectation)>>);

impl ExpectationLog {
    pub fn last(&self, id: &str) -> Option<StreamExpectation> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(c, _)| c == id)
            .map(|(_, e)| *e)
    }
}

#[async_trait]
impl StreamExpectationObserver for ExpectationLog {
    async fn stream_expectation(&self, camera_id: &str, expectation: StreamExpectation) {
        self.0
            .lock()
            .unwrap()
            .push((camera_id.to_owned(), expectation));
    }
}

// ── Remote side ─────────────────────────────────────────────────────

type CommandTx = mpsc::UnboundedSender<Result<RemoteCommand, CoreError>>;

#[derive(Default)]
pub struct RemoteState {
    pub connects: AtomicUsize,
    pub fail_connects: AtomicUsize,
    pub registrations: Mutex<Vec<(String, String)>>,
    pub uploads: AtomicUsize,
    pub frames: AtomicUsize,
    commands: Mutex<Option<CommandTx>>,
}

impl RemoteState {
    /// Push a command down the current connection.
    pub fn send(&self, command: RemoteCommand) -> bool {
        self.commands
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(command)).is_ok())
    }

    /// End the current control stream, as a dropped connection would.
    pub fn hang_up(&self) {
        self.commands.lock().unwrap().take();
    }

    pub fn registered(&self, stream: &str) -> bool {
        self.registrations
            .lock()
            .unwrap()
            .iter()
            .any(|(_, s)| s == stream)
    }
}

#[derive(Clone, Default)]
pub struct MockRemote(pub Arc<RemoteState>);

#[async_trait]
impl RemoteChannel for MockRemote {
    async fn connect(&self) -> Result<RemoteConnection, CoreError> {
        let left = self.0.fail_connects.load(Ordering::SeqCst);
        if left > 0 {
            self.0.fail_connects.store(left - 1, Ordering::SeqCst);
            return Err(CoreError::RemoteUnavailable {
                address: "127.0.0.1:6000".into(),
                reason: "connection refused".into(),
            });
        }
        self.0.connects.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        *self.0.commands.lock().unwrap() = Some(tx);
        let commands = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();

        Ok(RemoteConnection {
            commands,
            link: Arc::new(MockLink(Arc::clone(&self.0))),
        })
    }
}

struct MockLink(Arc<RemoteState>);

#[async_trait]
impl RemoteLink for MockLink {
    async fn register(&self, user: &str, stream_id: &str) -> Result<(), CoreError> {
        self.0
            .registrations
            .lock()
            .unwrap()
            .push((user.to_owned(), stream_id.to_owned()));
        Ok(())
    }

    async fn open_upload(
        &self,
        _user: &str,
        _stream_id: &str,
    ) -> Result<Box<dyn UploadSink>, CoreError> {
        self.0.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingSink(Arc::clone(&self.0))))
    }
}

struct CountingSink(Arc<RemoteState>);

impl CountingSink {
    fn count(&self) -> Result<(), CoreError> {
        self.0.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl UploadSink for CountingSink {
    async fn on_sdp(&mut self, _payload: Bytes) -> Result<(), CoreError> {
        self.count()
    }
    async fn on_rtp(&mut self, _payload: Bytes) -> Result<(), CoreError> {
        self.count()
    }
    async fn on_rtcp(&mut self, _payload: Bytes) -> Result<(), CoreError> {
        self.count()
    }
    async fn close(&mut self) {}
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct LanHarness {
    pub sup: LanSupervisor,
    pub discovery: Arc<ScriptedDiscovery>,
    pub auth: Arc<RecordingAuthenticator>,
    pub transport: Arc<IdleTransport>,
    pub presence: Arc<PresenceLog>,
    pub bridge: MediaBridge,
}

pub fn lan_harness(config: LanConfig, interfaces: Result<Vec<String>, String>) -> LanHarness {
    let discovery = Arc::new(ScriptedDiscovery::default());
    let auth = Arc::new(RecordingAuthenticator::default());
    let transport = Arc::new(IdleTransport::default());
    let presence = Arc::new(PresenceLog::default());
    let bridge = MediaBridge::new();

    let sup = LanSupervisor::new(
        config,
        LanCollaborators {
            interfaces: Arc::new(FixedInterfaces(interfaces)),
            discovery: discovery.clone(),
            authenticator: auth.clone(),
        },
        CaptureContext {
            transport: transport.clone(),
            bridge: bridge.clone(),
            options: camfleet_core::CameraOptions::default(),
        },
    );
    sup.attach_camera_observer(presence.clone());

    LanHarness {
        sup,
        discovery,
        auth,
        transport,
        presence,
        bridge,
    }
}

pub fn device(id: &str, address: &str) -> DeviceDescriptor {
    DeviceDescriptor::new(id, address)
}

pub fn camera_ids(sup: &LanSupervisor) -> Vec<String> {
    sup.cameras().iter().map(|c| c.id().to_owned()).collect()
}

pub async fn wait_until(what: &str, f: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while !f() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}
