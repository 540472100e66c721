// ── Camera session ──
//
// One physical device's streaming lifecycle. A single loop task owns the
// command queue and is the only writer of the state; everything else
// talks to it through `play`/`pause`/`ping`/`exit` and observes the
// state through a `watch` receiver.
//
//   Off ──run──▶ Idle ──Play──▶ Playing ──Pause──▶ Pausing ──drained──▶ Idle
//                                  ▲                  │
//                                  └──── Resuming ◀───┘ Play before drained
//
// A play attempt is a linked child group (capture + relay). When the group
// drains, a watcher posts `Settled` into the same queue so transitional
// states are reaped without polling.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::bridge::MediaBridge;
use crate::collab::{
    Appliance, Description, DeviceDescriptor, FrameKind, MediaFrame, MediaSession, MediaTransport,
};
use crate::config::CameraOptions;
use crate::error::CoreError;
use crate::generation::is_after;
use crate::group::TaskGroup;
use crate::registry::Keyed;

const QUEUE_CAPACITY: usize = 4;
const FRAME_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum CameraState {
    /// No lifecycle loop running.
    Off,
    /// Loop running, no capture.
    Idle,
    /// Capture group active.
    Playing,
    /// Capture group cancelled, waiting for it to drain.
    Pausing,
    /// Like `Pausing`, but play again once drained.
    Resuming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CameraCommand {
    Play,
    Pause,
    Ping,
    Exit,
}

#[derive(Debug)]
enum Event {
    Command(CameraCommand),
    /// The child group started under `epoch` has no running member left.
    Settled { epoch: u64 },
}

/// Media plumbing shared by every camera of a fleet.
#[derive(Clone)]
pub struct CaptureContext {
    pub transport: Arc<dyn MediaTransport>,
    pub bridge: MediaBridge,
    pub options: CameraOptions,
}

pub struct Camera {
    id: String,
    address: String,
    generation: AtomicU32,
    appliance: Arc<dyn Appliance>,
    media: CaptureContext,
    state: watch::Sender<CameraState>,
    queue: mpsc::Sender<Event>,
    /// Held here while no loop runs; the loop takes it on start and puts
    /// it back on exit.
    inbox: Mutex<Option<mpsc::Receiver<Event>>>,
}

impl std::fmt::Debug for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("generation", &self.generation())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Keyed for Camera {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Camera {
    pub fn new(
        device: &DeviceDescriptor,
        generation: u32,
        appliance: Arc<dyn Appliance>,
        media: CaptureContext,
    ) -> Arc<Self> {
        let (queue, inbox) = mpsc::channel(QUEUE_CAPACITY);
        let (state, _) = watch::channel(CameraState::Off);
        Arc::new(Self {
            id: device.id.clone(),
            address: device.address.clone(),
            generation: AtomicU32::new(generation),
            appliance,
            media,
            state,
            queue,
            inbox: Mutex::new(Some(inbox)),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    /// Record an observation from round `generation`. Older or equal
    /// rounds are ignored. Returns `true` if the generation moved.
    pub fn refresh(&self, generation: u32) -> bool {
        self.generation
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |seen| {
                is_after(generation, seen).then_some(generation)
            })
            .is_ok()
    }

    pub fn state(&self) -> CameraState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CameraState> {
        self.state.subscribe()
    }

    /// `true` while a lifecycle loop owns the command queue.
    pub fn is_running(&self) -> bool {
        self.inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub async fn play(&self) {
        self.send(CameraCommand::Play).await;
    }

    pub async fn pause(&self) {
        self.send(CameraCommand::Pause).await;
    }

    pub async fn ping(&self) {
        self.send(CameraCommand::Ping).await;
    }

    /// Stop the lifecycle loop. A camera without a running loop has
    /// nothing to stop.
    pub async fn exit(&self) {
        self.send(CameraCommand::Exit).await;
    }

    /// Commands only reach a running loop. Without one, or once the loop
    /// ends while the queue is full, the command is dropped and logged.
    async fn send(&self, command: CameraCommand) {
        let mut state = self.state.subscribe();
        if !self.is_running() {
            debug!(camera = %self.id, %command, "camera off, command dropped");
            return;
        }
        tokio::select! {
            biased;
            sent = self.queue.send(Event::Command(command)) => {
                if sent.is_err() {
                    debug!(camera = %self.id, %command, "lifecycle gone, command dropped");
                }
            }
            _ = state.wait_for(|s| *s == CameraState::Off) => {
                debug!(camera = %self.id, %command, "lifecycle ended, command dropped");
            }
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start the lifecycle loop inside `group` unless one already runs.
    /// Returns `false` if the loop was already running.
    pub fn start(self: &Arc<Self>, group: &TaskGroup) -> bool {
        let Some(inbox) = self.claim() else {
            return false;
        };
        let camera = Arc::clone(self);
        group.spawn(move |cancel| async move { camera.lifecycle(inbox, cancel).await });
        true
    }

    /// Run the lifecycle loop on the current task until `Exit` or
    /// cancellation.
    ///
    /// # Panics
    ///
    /// If another loop already runs for this camera.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let Some(inbox) = self.claim() else {
            panic!("camera {}: lifecycle started twice", self.id);
        };
        self.lifecycle(inbox, cancel).await;
    }

    /// Take the queue for a new loop. Leftovers from a previous run are
    /// discarded, and the camera counts as `Idle` from here on.
    fn claim(&self) -> Option<mpsc::Receiver<Event>> {
        let mut inbox = self
            .inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        self.discard_stale(&mut inbox);
        self.set_state(CameraState::Idle);
        Some(inbox)
    }

    /// Hand the queue back once the loop is done with it.
    fn release(&self, mut inbox: mpsc::Receiver<Event>) {
        let mut slot = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);
        self.discard_stale(&mut inbox);
        *slot = Some(inbox);
    }

    fn discard_stale(&self, inbox: &mut mpsc::Receiver<Event>) {
        while let Ok(event) = inbox.try_recv() {
            debug!(camera = %self.id, ?event, "stale event discarded");
        }
    }

    async fn lifecycle(&self, mut inbox: mpsc::Receiver<Event>, cancel: CancellationToken) {
        let mut lc = Lifecycle {
            watchers: TaskGroup::swarm(&cancel),
            cancel,
            active: None,
            epoch: 0,
        };

        loop {
            let event = tokio::select! {
                biased;
                () = lc.cancel.cancelled() => break,
                event = inbox.recv() => event,
            };
            let Some(event) = event else { break };
            if self.handle(&mut lc, event) == Flow::Exit {
                break;
            }
        }

        if let Some(active) = lc.active.take() {
            active.group.shutdown().await;
        }
        lc.watchers.shutdown().await;
        self.set_state(CameraState::Idle);
        self.set_state(CameraState::Off);

        self.release(inbox);
        info!(camera = %self.id, "lifecycle ended");
    }

    fn set_state(&self, next: CameraState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(camera = %self.id, from = %prev, to = %next, "state");
        }
    }

    fn handle(&self, lc: &mut Lifecycle, event: Event) -> Flow {
        let state = self.state();
        assert!(
            state != CameraState::Off,
            "camera {}: {event:?} handled while Off",
            self.id
        );

        match event {
            Event::Command(CameraCommand::Exit) => return Flow::Exit,
            Event::Command(CameraCommand::Play) => self.on_play(lc, state),
            Event::Command(CameraCommand::Pause) => self.on_pause(lc, state),
            Event::Command(CameraCommand::Ping) => self.on_check(lc, state),
            Event::Settled { epoch } if lc.is_current(epoch) => {
                if state == CameraState::Playing {
                    info!(camera = %self.id, "capture ended on its own");
                    lc.active = None;
                    self.set_state(CameraState::Idle);
                } else {
                    self.on_check(lc, state);
                }
            }
            Event::Settled { epoch } => trace!(camera = %self.id, epoch, "stale settle"),
        }
        Flow::Continue
    }

    fn on_play(&self, lc: &mut Lifecycle, state: CameraState) {
        match state {
            CameraState::Idle => self.begin_playing(lc),
            CameraState::Pausing | CameraState::Resuming => {
                if lc.is_drained() {
                    lc.active = None;
                    self.set_state(CameraState::Idle);
                    self.begin_playing(lc);
                } else {
                    self.set_state(CameraState::Resuming);
                }
            }
            CameraState::Playing | CameraState::Off => {}
        }
    }

    fn on_pause(&self, lc: &mut Lifecycle, state: CameraState) {
        match state {
            CameraState::Playing | CameraState::Resuming => {
                if let Some(active) = &lc.active {
                    active.group.cancel();
                }
                self.set_state(CameraState::Pausing);
                self.on_check(lc, CameraState::Pausing);
            }
            CameraState::Pausing => self.on_check(lc, state),
            CameraState::Idle | CameraState::Off => {}
        }
    }

    /// Reap a drained group in the transitional states.
    fn on_check(&self, lc: &mut Lifecycle, state: CameraState) {
        if !lc.is_drained() {
            return;
        }
        match state {
            CameraState::Pausing => {
                lc.active = None;
                self.set_state(CameraState::Idle);
            }
            CameraState::Resuming => {
                lc.active = None;
                self.set_state(CameraState::Idle);
                self.begin_playing(lc);
            }
            CameraState::Idle | CameraState::Playing | CameraState::Off => {}
        }
    }

    fn begin_playing(&self, lc: &mut Lifecycle) {
        lc.epoch += 1;
        let epoch = lc.epoch;
        let group = TaskGroup::linked(&lc.cancel);
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);

        let capture = Capture {
            camera: self.id.clone(),
            appliance: Arc::clone(&self.appliance),
            transport: Arc::clone(&self.media.transport),
            options: self.media.options,
        };
        group.spawn(move |cancel| capture.run(tx, cancel));

        let publisher = self.media.bridge.publisher(&self.id);
        let camera = self.id.clone();
        group.spawn(move |cancel| relay(camera, rx, publisher, cancel));

        let settled = group.settled();
        let queue = self.queue.clone();
        lc.watchers.spawn(move |cancel| async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = settled => {}
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                _ = queue.send(Event::Settled { epoch }) => {}
            }
        });

        lc.active = Some(Active { group, epoch });
        self.set_state(CameraState::Playing);
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

struct Active {
    group: TaskGroup,
    epoch: u64,
}

/// Loop-local bookkeeping; never shared.
struct Lifecycle {
    cancel: CancellationToken,
    watchers: TaskGroup,
    active: Option<Active>,
    epoch: u64,
}

impl Lifecycle {
    fn is_current(&self, epoch: u64) -> bool {
        self.active.as_ref().is_some_and(|a| a.epoch == epoch)
    }

    fn is_drained(&self) -> bool {
        self.active.as_ref().is_none_or(|a| a.group.is_settled())
    }
}

// ── Child tasks ──────────────────────────────────────────────────────

struct Capture {
    camera: String,
    appliance: Arc<dyn Appliance>,
    transport: Arc<dyn MediaTransport>,
    options: CameraOptions,
}

impl Capture {
    async fn run(self, tx: mpsc::Sender<MediaFrame>, cancel: CancellationToken) {
        loop {
            debug!(camera = %self.camera, action = "start", "capture");
            let outcome = self.attempt(&tx, &cancel).await;
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = outcome {
                warn!(camera = %self.camera, action = "capture", error = %e, "capture failed");
            }
            if !self.options.retries {
                break;
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.options.retry_backoff) => {}
            }
        }
        info!(camera = %self.camera, action = "done", "capture");
    }

    async fn attempt(
        &self,
        tx: &mpsc::Sender<MediaFrame>,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        // Setup is abandoned outright on cancel; only a playing session
        // gets the courtesy pause.
        let (mut session, description) = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            setup = self.setup() => setup?,
        };

        if tx
            .send(MediaFrame::new(FrameKind::Sdp, description.sdp))
            .await
            .is_err()
        {
            return Ok(());
        }

        let outcome = loop {
            let frame = tokio::select! {
                biased;
                () = cancel.cancelled() => break Ok(()),
                frame = session.next_frame() => frame,
            };
            match frame {
                Ok(Some(frame)) => {
                    if tx.send(frame).await.is_err() {
                        break Ok(());
                    }
                }
                Ok(None) => break Err(CoreError::media("read", "session ended by peer")),
                Err(e) => break Err(e),
            }
        };

        if cancel.is_cancelled() {
            if let Err(e) = session.pause().await {
                debug!(camera = %self.camera, error = %e, "pause on stop failed");
            }
        }
        outcome
    }

    async fn setup(&self) -> Result<(Box<dyn MediaSession>, Description), CoreError> {
        let uri = self.appliance.fetch_stream_uri().await;
        let url = Url::parse(&uri).map_err(|source| CoreError::InvalidStreamUri {
            uri: uri.clone(),
            source,
        })?;

        let mut session = self.transport.open(&url).await?;
        let description = session.describe().await?;
        let track = description.tracks.first().ok_or(CoreError::NoTrack)?;
        session.setup_track(track).await?;
        session.play().await?;
        info!(camera = %self.camera, host = url.host_str().unwrap_or_default(), "streaming");
        Ok((session, description))
    }
}

async fn relay(
    camera: String,
    mut rx: mpsc::Receiver<MediaFrame>,
    publisher: broadcast::Sender<MediaFrame>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = rx.recv() => frame,
        };
        let Some(frame) = frame else { break };
        if publisher.send(frame).is_err() {
            trace!(camera = %camera, "no listener, frame dropped");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
