// ── Remote command reconciler ──
//
// Converges "what the LAN sees" with "what the remote operator asked
// for". One loop consumes a control channel fed by three producers:
// the remote command stream (play/pause), the LAN supervisor (camera
// up/down/vanished) and the connection reader (disconnect). The loop is
// the only owner of the expectations and of the upload-media handles,
// so no lock guards them.
//
// Presence events are applied whether or not the remote is reachable;
// the connection is retried in the background of the same loop.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::bridge::MediaBridge;
use crate::collab::{
    FrameKind, MediaFrame, RemoteChannel, RemoteCommand, RemoteConnection, RemoteLink, UploadSink,
};
use crate::config::{UpstreamConfig, period_or};
use crate::error::CoreError;
use crate::events::{CameraObserver, Presence, StreamExpectation, StreamExpectationObserver};
use crate::group::TaskGroup;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_REGISTER_PERIOD: Duration = Duration::from_secs(5);
const UPLOAD_RETRY: Duration = Duration::from_millis(500);

#[derive(Debug)]
enum Control {
    Remote(RemoteCommand),
    Presence { camera: String, presence: Presence },
    Disconnected { epoch: u64 },
}

// ── Upload-media handle ──────────────────────────────────────────────

/// Latest intent for an upload handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum UploadIntent {
    Play,
    Pause,
    Shut,
}

/// Per-camera actor relaying bridge frames to the remote upload sink.
/// Control is latest-wins: a burst of play/pause collapses to the last
/// one, and `Shut` is final.
pub struct UploadMedia {
    camera: String,
    user: String,
    bridge: MediaBridge,
    intent: watch::Sender<UploadIntent>,
    running: AtomicBool,
}

impl std::fmt::Debug for UploadMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadMedia")
            .field("camera", &self.camera)
            .field("intent", &self.intent())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl UploadMedia {
    pub fn new(camera: impl Into<String>, user: impl Into<String>, bridge: MediaBridge) -> Arc<Self> {
        let (intent, _) = watch::channel(UploadIntent::Pause);
        Arc::new(Self {
            camera: camera.into(),
            user: user.into(),
            bridge,
            intent,
            running: AtomicBool::new(false),
        })
    }

    pub fn camera(&self) -> &str {
        &self.camera
    }

    pub fn intent(&self) -> UploadIntent {
        *self.intent.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn play(&self) {
        self.set_intent(UploadIntent::Play);
    }

    pub fn pause(&self) {
        self.set_intent(UploadIntent::Pause);
    }

    pub fn shut(&self) {
        self.intent.send_replace(UploadIntent::Shut);
    }

    fn set_intent(&self, next: UploadIntent) {
        // Shut is final.
        self.intent.send_if_modified(|current| {
            if *current == UploadIntent::Shut || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Spawn the relay on `link` inside `group`. Returns `false` if a run
    /// is already active.
    pub fn start(self: &Arc<Self>, group: &TaskGroup, link: Arc<dyn RemoteLink>) -> bool {
        if self.running.swap(true, Ordering::AcqRel) {
            return false;
        }
        let handle = Arc::clone(self);
        group.spawn(move |cancel| async move {
            let _running = RunningGuard(&handle.running);
            handle.serve(link, cancel).await;
        });
        true
    }

    /// Relay on `link` on the current task until shut or cancelled.
    ///
    /// # Panics
    ///
    /// If another run is active for this handle.
    pub async fn run(self: Arc<Self>, link: Arc<dyn RemoteLink>, cancel: CancellationToken) {
        assert!(
            !self.running.swap(true, Ordering::AcqRel),
            "upload for camera {} already running",
            self.camera
        );
        let _running = RunningGuard(&self.running);
        self.serve(link, cancel).await;
    }

    async fn serve(&self, link: Arc<dyn RemoteLink>, cancel: CancellationToken) {
        trace!(camera = %self.camera, action = "start", "up media");
        let mut frames = self.bridge.subscribe(&self.camera);
        let mut intent = self.intent.subscribe();

        'session: loop {
            let Some(mut sink) = self.open_sink(&link, &mut intent, &cancel).await else {
                break;
            };
            debug!(camera = %self.camera, action = "open", "up media");

            let failed = loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break false,
                    changed = intent.changed() => {
                        if changed.is_err() || *intent.borrow_and_update() == UploadIntent::Shut {
                            break false;
                        }
                    }
                    frame = frames.recv() => match frame {
                        Ok(frame) => {
                            if *intent.borrow() != UploadIntent::Play {
                                continue;
                            }
                            if let Err(e) = forward(sink.as_mut(), frame).await {
                                warn!(camera = %self.camera, action = "upload", error = %e, "up media");
                                break true;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(camera = %self.camera, skipped, "upload lagging behind");
                        }
                        Err(RecvError::Closed) => break false,
                    },
                }
            };

            sink.close().await;
            if !failed {
                break 'session;
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => break 'session,
                () = tokio::time::sleep(UPLOAD_RETRY) => {}
            }
        }
        trace!(camera = %self.camera, action = "done", "up media");
    }

    /// Open an upload sink, retrying until it works, the handle is shut
    /// or the run is cancelled.
    async fn open_sink(
        &self,
        link: &Arc<dyn RemoteLink>,
        intent: &mut watch::Receiver<UploadIntent>,
        cancel: &CancellationToken,
    ) -> Option<Box<dyn UploadSink>> {
        loop {
            if cancel.is_cancelled() || *intent.borrow_and_update() == UploadIntent::Shut {
                return None;
            }
            match link.open_upload(&self.user, &self.camera).await {
                Ok(sink) => return Some(sink),
                Err(e) => warn!(camera = %self.camera, action = "open", error = %e, "up media"),
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                () = tokio::time::sleep(UPLOAD_RETRY) => {}
            }
        }
    }
}

async fn forward(sink: &mut dyn UploadSink, frame: MediaFrame) -> Result<(), CoreError> {
    match frame.kind {
        FrameKind::Sdp => sink.on_sdp(frame.payload).await,
        FrameKind::Rtp => sink.on_rtp(frame.payload).await,
        FrameKind::Rtcp => sink.on_rtcp(frame.payload).await,
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ── Reconciler ───────────────────────────────────────────────────────

struct Inner {
    config: UpstreamConfig,
    channel: Arc<dyn RemoteChannel>,
    bridge: MediaBridge,
    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: Mutex<Option<mpsc::UnboundedReceiver<Control>>>,
    observers: RwLock<Vec<Arc<dyn StreamExpectationObserver>>>,
    connected: watch::Sender<bool>,
}

/// Cheaply cloneable handle to the remote side of the agent.
#[derive(Clone)]
pub struct Reconciler {
    inner: Arc<Inner>,
}

/// An established connection and everything that lives on it.
struct Connection {
    link: Arc<dyn RemoteLink>,
    epoch: u64,
    /// Command reader and upload runs of this connection.
    tasks: TaskGroup,
}

/// Loop-local state; never shared.
struct Session {
    expectations: HashMap<String, bool>,
    handles: BTreeMap<String, Arc<UploadMedia>>,
    connection: Option<Connection>,
    epoch: u64,
}

impl Reconciler {
    pub fn new(config: UpstreamConfig, channel: Arc<dyn RemoteChannel>, bridge: MediaBridge) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (connected, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                channel,
                bridge,
                control_tx,
                control_rx: Mutex::new(Some(control_rx)),
                observers: RwLock::new(Vec::new()),
                connected,
            }),
        }
    }

    pub fn attach_stream_observer(&self, observer: Arc<dyn StreamExpectationObserver>) {
        self.inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub fn detach_stream_observer(&self, observer: &Arc<dyn StreamExpectationObserver>) {
        self.inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|o| !Arc::ptr_eq(o, observer));
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    /// Observe connection up/down transitions.
    pub fn subscribe_connection(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    /// Inject a remote command as if it came from the control stream.
    pub fn submit(&self, command: RemoteCommand) {
        self.push(Control::Remote(command));
    }

    fn push(&self, control: Control) {
        if self.inner.control_tx.send(control).is_err() {
            debug!("reconciler gone, control dropped");
        }
    }

    async fn notify(&self, camera_id: &str, expectation: StreamExpectation) {
        let observers = self
            .inner
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer.stream_expectation(camera_id, expectation).await;
        }
    }

    // ── Main loop ────────────────────────────────────────────────────

    /// Process control events and keep the remote connection alive until
    /// `parent` is cancelled.
    ///
    /// # Panics
    ///
    /// If the reconciler already ran.
    pub async fn run(&self, parent: &CancellationToken) {
        let taken = self
            .inner
            .control_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut control_rx) = taken else {
            panic!("reconciler is already running");
        };
        debug!(action = "start", endpoint = %self.inner.config.address, "up");

        let cancel = parent.child_token();
        let register_period =
            period_or(self.inner.config.register_period, DEFAULT_REGISTER_PERIOD);
        let mut session = Session {
            expectations: HashMap::new(),
            handles: BTreeMap::new(),
            connection: None,
            epoch: 0,
        };

        let reconnect = tokio::time::sleep(RECONNECT_DELAY);
        let register = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(reconnect, register);

        loop {
            let connected = session.connection.is_some();
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                control = control_rx.recv() => {
                    let Some(control) = control else { break };
                    self.on_control(&mut session, control).await;
                    if session.connection.is_none() && connected {
                        reconnect.as_mut().reset(Instant::now() + RECONNECT_DELAY);
                    }
                }
                () = &mut reconnect, if !connected => {
                    if self.connect(&mut session, &cancel).await {
                        register.as_mut().reset(Instant::now());
                    } else {
                        reconnect.as_mut().reset(Instant::now() + RECONNECT_DELAY);
                    }
                }
                () = &mut register, if connected => {
                    self.register_all(&mut session).await;
                    if session.connection.is_some() {
                        register.as_mut().reset(Instant::now() + register_period);
                    } else {
                        reconnect.as_mut().reset(Instant::now() + RECONNECT_DELAY);
                    }
                }
            }
        }

        self.disconnect(&mut session).await;
        for handle in session.handles.values() {
            handle.shut();
        }
        debug!(action = "stop", "up");
    }

    async fn connect(&self, session: &mut Session, cancel: &CancellationToken) -> bool {
        trace!(action = "restart", endpoint = %self.inner.config.address, "up");
        let RemoteConnection { mut commands, link } = match self.inner.channel.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(action = "dial", error = %e, "up");
                return false;
            }
        };

        session.epoch += 1;
        let epoch = session.epoch;
        let tasks = TaskGroup::swarm(cancel);

        let tx = self.inner.control_tx.clone();
        tasks.spawn(move |cancel| async move {
            loop {
                let item = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    item = commands.next() => item,
                };
                match item {
                    Some(Ok(command)) => {
                        if tx.send(Control::Remote(command)).is_err() {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(action = "read", error = %e, "up ctrl");
                        break;
                    }
                    None => break,
                }
            }
            let _ = tx.send(Control::Disconnected { epoch });
        });

        info!(action = "connected", epoch, "up");
        session.connection = Some(Connection { link, epoch, tasks });
        self.inner.connected.send_replace(true);

        for handle in session.handles.values() {
            if handle.intent() == UploadIntent::Play {
                start_upload(session.connection.as_ref(), handle);
            }
        }
        true
    }

    async fn disconnect(&self, session: &mut Session) {
        let Some(connection) = session.connection.take() else {
            return;
        };
        info!(action = "disconnected", epoch = connection.epoch, "up");
        self.inner.connected.send_replace(false);
        connection.tasks.shutdown().await;
    }

    async fn register_all(&self, session: &mut Session) {
        let Some(link) = session.connection.as_ref().map(|c| Arc::clone(&c.link)) else {
            return;
        };
        let cameras: Vec<String> = session.handles.keys().cloned().collect();
        for camera in &cameras {
            if let Err(e) = link.register(&self.inner.config.user, camera).await {
                warn!(camera = %camera, action = "register", error = %e, "up reg");
                self.disconnect(session).await;
                return;
            }
        }
        trace!(count = cameras.len(), action = "register", "up reg");
    }

    async fn on_control(&self, session: &mut Session, control: Control) {
        match control {
            Control::Remote(RemoteCommand::Play { stream_id }) => {
                session.expectations.insert(stream_id.clone(), true);
                self.notify(&stream_id, StreamExpectation::Play).await;
                match session.handles.get(&stream_id) {
                    Some(handle) => {
                        handle.play();
                        start_upload(session.connection.as_ref(), handle);
                    }
                    None => warn!(camera = %stream_id, "play for unknown camera"),
                }
            }
            Control::Remote(RemoteCommand::Pause { stream_id }) => {
                session.expectations.insert(stream_id.clone(), false);
                self.notify(&stream_id, StreamExpectation::Pause).await;
                match session.handles.get(&stream_id) {
                    Some(handle) => handle.pause(),
                    None => warn!(camera = %stream_id, "pause for unknown camera"),
                }
            }
            Control::Presence { camera, presence } => {
                self.on_presence(session, camera, presence).await;
            }
            Control::Disconnected { epoch } => {
                if session.connection.as_ref().is_some_and(|c| c.epoch == epoch) {
                    self.disconnect(session).await;
                } else {
                    trace!(epoch, "stale disconnect");
                }
            }
        }
    }

    async fn on_presence(&self, session: &mut Session, camera: String, presence: Presence) {
        info!(camera = %camera, %presence, "up ctrl");
        match presence {
            Presence::Online => {
                let handle = session
                    .handles
                    .entry(camera.clone())
                    .or_insert_with(|| {
                        UploadMedia::new(&camera, &self.inner.config.user, self.inner.bridge.clone())
                    })
                    .clone();
                if session.expectations.get(&camera).copied().unwrap_or(false) {
                    self.notify(&camera, StreamExpectation::Play).await;
                    handle.play();
                    start_upload(session.connection.as_ref(), &handle);
                }
            }
            Presence::Offline => match session.handles.get(&camera) {
                Some(handle) => {
                    handle.pause();
                    self.notify(&camera, StreamExpectation::Pause).await;
                }
                None => warn!(camera = %camera, "down for unknown camera"),
            },
            Presence::Vanished => {
                session.expectations.remove(&camera);
                match session.handles.remove(&camera) {
                    Some(handle) => handle.shut(),
                    None => warn!(camera = %camera, "vanished unknown camera"),
                }
            }
        }
    }
}

fn start_upload(connection: Option<&Connection>, handle: &Arc<UploadMedia>) {
    if let Some(connection) = connection {
        if handle.start(&connection.tasks, Arc::clone(&connection.link)) {
            debug!(camera = %handle.camera(), epoch = connection.epoch, "upload started");
        }
    }
}

#[async_trait]
impl CameraObserver for Reconciler {
    async fn camera_presence(&self, camera_id: &str, presence: Presence) {
        self.push(Control::Presence {
            camera: camera_id.to_owned(),
            presence,
        });
    }
}
