// ── LAN supervisor ──
//
// Owns the fleet: the interfaces swept for devices and the cameras found
// on them. Discovery batches refresh, insert and age out cameras;
// presence changes go out to `CameraObserver`s and stream expectations
// come in through `StreamExpectationObserver`.
//
// The fleet mutex guards the two registries only. It is never held
// across authentication, observer calls or camera queue sends.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::camera::{Camera, CameraState, CaptureContext};
use crate::collab::{DeviceAuthenticator, DeviceDescriptor, DeviceDiscovery, InterfaceSource};
use crate::config::{LanConfig, period_or};
use crate::error::CoreError;
use crate::events::{CameraObserver, Presence, StreamExpectation, StreamExpectationObserver};
use crate::generation::is_expired;
use crate::group::TaskGroup;
use crate::nic::{InterfaceFilter, NetworkInterface};
use crate::registry::Registry;

/// Collaborators the supervisor drives.
#[derive(Clone)]
pub struct LanCollaborators {
    pub interfaces: Arc<dyn InterfaceSource>,
    pub discovery: Arc<dyn DeviceDiscovery>,
    pub authenticator: Arc<dyn DeviceAuthenticator>,
}

struct Fleet {
    cameras: Registry<Camera>,
    interfaces: Registry<NetworkInterface>,
}

impl Fleet {
    fn register_interface(&mut self, name: &str) {
        if !self.interfaces.add(NetworkInterface::new(name)) {
            debug!(itf = %name, "interface already registered");
        }
    }
}

struct Inner {
    config: LanConfig,
    collab: LanCollaborators,
    media: CaptureContext,
    fleet: Mutex<Fleet>,
    camera_view: watch::Receiver<Arc<Vec<Arc<Camera>>>>,
    interface_view: watch::Receiver<Arc<Vec<Arc<NetworkInterface>>>>,
    observers: RwLock<Vec<Arc<dyn CameraObserver>>>,
    /// Last discovery round handed out.
    generation: AtomicU32,
    running: AtomicBool,
    /// Root of everything the supervisor spawns.
    cancel: CancellationToken,
    /// Camera lifecycle loops.
    cameras: TaskGroup,
}

/// Cheaply cloneable handle to the LAN side of the agent.
#[derive(Clone)]
pub struct LanSupervisor {
    inner: Arc<Inner>,
}

impl LanSupervisor {
    pub fn new(config: LanConfig, collab: LanCollaborators, media: CaptureContext) -> Self {
        let cameras = Registry::new();
        let interfaces = Registry::new();
        let camera_view = cameras.subscribe();
        let interface_view = interfaces.subscribe();
        let cancel = CancellationToken::new();

        let mut fleet = Fleet {
            cameras,
            interfaces,
        };
        for name in &config.static_interfaces {
            info!(itf = %name, action = "force", "disc");
            fleet.register_interface(name);
        }

        Self {
            inner: Arc::new(Inner {
                cameras: TaskGroup::swarm(&cancel),
                cancel,
                config,
                collab,
                media,
                fleet: Mutex::new(fleet),
                camera_view,
                interface_view,
                observers: RwLock::new(Vec::new()),
                generation: AtomicU32::new(0),
                running: AtomicBool::new(false),
            }),
        }
    }

    // ── Observers ────────────────────────────────────────────────────

    pub fn attach_camera_observer(&self, observer: Arc<dyn CameraObserver>) {
        self.inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub fn detach_camera_observer(&self, observer: &Arc<dyn CameraObserver>) {
        self.inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|o| !Arc::ptr_eq(o, observer));
    }

    async fn notify(&self, camera_id: &str, presence: Presence) {
        let observers = self
            .inner
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer.camera_presence(camera_id, presence).await;
        }
    }

    // ── Fleet views ──────────────────────────────────────────────────

    /// Cameras currently known, sorted by identity.
    pub fn cameras(&self) -> Arc<Vec<Arc<Camera>>> {
        self.inner.camera_view.borrow().clone()
    }

    pub fn subscribe_cameras(&self) -> watch::Receiver<Arc<Vec<Arc<Camera>>>> {
        self.inner.camera_view.clone()
    }

    /// Interfaces registered for discovery, sorted by name.
    pub fn interfaces(&self) -> Arc<Vec<Arc<NetworkInterface>>> {
        self.inner.interface_view.borrow().clone()
    }

    pub fn camera(&self, camera_id: &str) -> Option<Arc<Camera>> {
        self.cameras()
            .iter()
            .find(|c| c.id() == camera_id)
            .map(Arc::clone)
    }

    /// Last discovery round handed out.
    pub fn generation(&self) -> u32 {
        self.inner.generation.load(Ordering::Acquire)
    }

    // ── Main loop ────────────────────────────────────────────────────

    /// Enumerate interfaces, then sweep them periodically until `parent`
    /// is cancelled or [`shutdown`](Self::shutdown) is called. No task
    /// outlives this call.
    ///
    /// # Panics
    ///
    /// If called while another `run` is in progress.
    pub async fn run(&self, parent: &CancellationToken) -> Result<(), CoreError> {
        assert!(
            !self.inner.running.swap(true, Ordering::AcqRel),
            "LAN supervisor is already running"
        );
        let _running = RunningGuard(&self.inner.running);
        info!(action = "start", "lan");

        let result = self.run_inner(parent).await;

        info!(action = "wait cams", "lan");
        self.inner.cameras.shutdown().await;
        info!(action = "stop", "lan");
        result
    }

    async fn run_inner(&self, parent: &CancellationToken) -> Result<(), CoreError> {
        self.discover_interfaces().await?;

        let loops = TaskGroup::swarm(&self.inner.cancel);
        {
            let parent = parent.clone();
            let root = self.inner.cancel.clone();
            loops.spawn(move |cancel| async move {
                tokio::select! {
                    () = parent.cancelled() => root.cancel(),
                    () = cancel.cancelled() => {}
                }
            });
        }

        for itf in self.interfaces().iter() {
            let itf = Arc::clone(itf);
            let discovery = Arc::clone(&self.inner.collab.discovery);
            let sup = self.clone();
            loops.spawn(move |cancel| async move {
                itf.run_rescan_loop(
                    discovery,
                    |generation, devices| {
                        let sup = sup.clone();
                        async move { sup.learn_all_cameras(generation, devices).await }
                    },
                    cancel,
                )
                .await;
            });
        }

        let sup = self.clone();
        loops.spawn(move |cancel| async move { sup.run_timers(cancel).await });

        info!(action = "wait nics", "lan");
        loops.wait().await;
        Ok(())
    }

    /// Cancel everything the supervisor runs.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    async fn discover_interfaces(&self) -> Result<(), CoreError> {
        let names = self
            .inner
            .collab
            .interfaces
            .interfaces()
            .await
            .inspect_err(|e| error!(error = %e, "interface enumeration failed"))?;
        debug!(interfaces = ?names, "disc");

        let filter = InterfaceFilter::new(
            &self.inner.config.discover_patterns,
            self.inner.config.unmatched_interfaces,
        );
        let mut fleet = self.inner.fleet.lock().await;
        for name in &names {
            let decision = filter.decide(name);
            if decision.is_included() {
                info!(itf = %name, ?decision, action = "add", "disc");
                fleet.register_interface(name);
            } else {
                debug!(itf = %name, ?decision, action = "skip", "disc");
            }
        }
        Ok(())
    }

    async fn run_timers(&self, cancel: CancellationToken) {
        let scan_period = period_or(self.inner.config.scan_period, Duration::from_secs(1));
        let check_period = period_or(self.inner.config.check_period, Duration::from_secs(1));

        let next_scan = tokio::time::sleep(Duration::ZERO);
        let next_check = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(next_scan, next_check);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = &mut next_scan => {
                    let generation = self.trigger_rescan().await;
                    next_scan.as_mut().reset(Instant::now() + scan_period + jitter(generation));
                }
                () = &mut next_check => {
                    self.log_check();
                    let seed = self.generation().wrapping_add(1);
                    next_check.as_mut().reset(Instant::now() + check_period + jitter(seed));
                }
            }
        }
    }

    /// Start a new discovery round on every interface. Returns the round.
    pub async fn trigger_rescan(&self) -> u32 {
        let generation = self
            .inner
            .generation
            .fetch_add(1, Ordering::AcqRel)
            .wrapping_add(1);
        let interfaces = self.interfaces();
        for itf in interfaces.iter() {
            itf.trigger_rescan(generation);
        }
        // Without any interface to sweep, static cameras are still kept
        // alive round after round.
        if interfaces.is_empty() && !self.inner.config.static_cameras.is_empty() {
            self.learn_all_cameras(generation, Vec::new()).await;
        }
        generation
    }

    fn log_check(&self) {
        let cameras = self.cameras();
        let playing = cameras
            .iter()
            .filter(|c| c.state() == CameraState::Playing)
            .count();
        info!(
            action = "check",
            cameras = cameras.len(),
            playing,
            interfaces = self.interfaces().len(),
            "lan"
        );
        for camera in cameras.iter() {
            debug!(camera = %camera.id(), gen = camera.generation(), state = %camera.state(), "check");
        }
    }

    // ── Discovery batches ────────────────────────────────────────────

    /// Fold one discovery batch from round `generation` into the fleet:
    /// refresh known cameras, authenticate and start new ones, then purge
    /// those that missed too many rounds.
    pub async fn learn_all_cameras(&self, generation: u32, devices: Vec<DeviceDescriptor>) {
        for device in &self.with_static_cameras(devices) {
            if let Err(e) = self.learn_camera(generation, device).await {
                warn!(camera = %device.id, address = %device.address, error = %e, "invalid device discovered");
            }
        }

        let grace = self.inner.config.grace_generations.max(1);
        let purged: Vec<Arc<Camera>> = {
            let mut fleet = self.inner.fleet.lock().await;
            let expired: Vec<String> = fleet
                .cameras
                .iter()
                .filter(|c| is_expired(generation, c.generation(), grace))
                .map(|c| c.id().to_owned())
                .collect();
            expired
                .iter()
                .filter_map(|id| fleet.cameras.remove(id))
                .collect()
        };
        if !purged.is_empty() {
            info!(action = "purge", count = purged.len(), gen = generation, "lan");
        }

        for camera in purged {
            info!(camera = %camera.id(), gen = camera.generation(), action = "del", "device");
            self.notify(camera.id(), Presence::Offline).await;
            camera.exit().await;
        }
    }

    async fn learn_camera(&self, generation: u32, device: &DeviceDescriptor) -> Result<(), CoreError> {
        let known = self.inner.fleet.lock().await.cameras.get(&device.id);
        if let Some(camera) = known {
            camera.refresh(generation);
            return Ok(());
        }

        let credentials = self.inner.config.credentials_for(&device.address);
        let appliance = self
            .inner
            .collab
            .authenticator
            .authenticate(device, credentials)
            .await?;
        let camera = Camera::new(device, generation, appliance, self.inner.media.clone());

        {
            let mut fleet = self.inner.fleet.lock().await;
            if !fleet.cameras.add(Arc::clone(&camera)) {
                // A concurrent batch got there first.
                if let Some(existing) = fleet.cameras.get(&device.id) {
                    existing.refresh(generation);
                }
                return Ok(());
            }
        }

        info!(camera = %device.id, endpoint = %device.address, gen = generation, action = "add", "device");
        camera.start(&self.inner.cameras);
        self.notify(camera.id(), Presence::Online).await;
        Ok(())
    }

    /// Static cameras count as seen in every batch (identity = address),
    /// unless discovery already reported a device at that address.
    fn with_static_cameras(&self, mut devices: Vec<DeviceDescriptor>) -> Vec<DeviceDescriptor> {
        for cam in &self.inner.config.static_cameras {
            if !devices
                .iter()
                .any(|d| d.id == cam.address || d.address == cam.address)
            {
                devices.push(DeviceDescriptor::new(&cam.address, &cam.address));
            }
        }
        devices
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Apply a remote intent to a camera, starting its lifecycle loop
    /// again if it had stopped.
    pub async fn update_stream_expectation(
        &self,
        camera_id: &str,
        expectation: StreamExpectation,
    ) -> Result<(), CoreError> {
        let camera = self.inner.fleet.lock().await.cameras.get(camera_id);
        let Some(camera) = camera else {
            info!(camera = %camera_id, %expectation, "camera not found");
            return Err(CoreError::CameraNotFound {
                camera: camera_id.to_owned(),
            });
        };

        match expectation {
            StreamExpectation::Play => {
                if camera.start(&self.inner.cameras) {
                    debug!(camera = %camera_id, "lifecycle restarted");
                }
                camera.play().await;
            }
            StreamExpectation::Pause => camera.pause().await,
        }
        Ok(())
    }

    /// Drop a camera outright: nothing about it is kept.
    pub async fn forget_camera(&self, camera_id: &str) -> Result<(), CoreError> {
        let removed = self.inner.fleet.lock().await.cameras.remove(camera_id);
        let Some(camera) = removed else {
            return Err(CoreError::CameraNotFound {
                camera: camera_id.to_owned(),
            });
        };

        info!(camera = %camera_id, action = "forget", "device");
        self.notify(camera_id, Presence::Vanished).await;
        camera.exit().await;
        self.inner.media.bridge.remove(camera_id);
        Ok(())
    }
}

#[async_trait]
impl StreamExpectationObserver for LanSupervisor {
    async fn stream_expectation(&self, camera_id: &str, expectation: StreamExpectation) {
        // Unknown cameras are logged by the call itself.
        let _ = self.update_stream_expectation(camera_id, expectation).await;
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Deterministic spread in `[0, 1s)`, seeded by the round.
fn jitter(seed: u32) -> Duration {
    let spread = (f64::from(seed) * 7.3).sin().abs();
    Duration::from_secs_f64(spread * 0.999)
}
