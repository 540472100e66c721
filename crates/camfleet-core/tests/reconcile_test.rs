#![allow(clippy::unwrap_used)]
// End-to-end convergence of remote intents and LAN presence.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use camfleet_core::{LanConfig, Reconciler, RemoteCommand, StreamExpectation, UpstreamConfig};
use common::{ExpectationLog, LanHarness, MockRemote, device, lan_harness, wait_until};

struct Wired {
    lan: LanHarness,
    reconciler: Reconciler,
    remote: MockRemote,
    expectations: Arc<ExpectationLog>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// LAN supervisor and reconciler observing each other, with the
/// reconciler loop running against a mock remote.
fn wired(grace_generations: u32) -> Wired {
    let lan = lan_harness(
        LanConfig {
            grace_generations,
            ..LanConfig::default()
        },
        Ok(vec![]),
    );
    let remote = MockRemote::default();
    let reconciler = Reconciler::new(
        UpstreamConfig::default(),
        Arc::new(remote.clone()),
        lan.bridge.clone(),
    );
    let expectations = Arc::new(ExpectationLog::default());

    lan.sup.attach_camera_observer(Arc::new(reconciler.clone()));
    reconciler.attach_stream_observer(Arc::new(lan.sup.clone()));
    reconciler.attach_stream_observer(expectations.clone());

    let cancel = CancellationToken::new();
    let task = {
        let reconciler = reconciler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { reconciler.run(&cancel).await })
    };

    Wired {
        lan,
        reconciler,
        remote,
        expectations,
        cancel,
        task,
    }
}

fn play(stream_id: &str) -> RemoteCommand {
    RemoteCommand::Play {
        stream_id: stream_id.into(),
    }
}

impl Wired {
    async fn connected(&self) {
        wait_until("connected", || self.reconciler.is_connected()).await;
    }

    fn opened(&self) -> usize {
        self.lan.transport.opened.load(Ordering::SeqCst)
    }

    fn uploads(&self) -> usize {
        self.remote.0.uploads.load(Ordering::SeqCst)
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.task.await.unwrap();
        assert!(!self.reconciler.is_connected());
    }
}

// ── Convergence ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_remote_play_before_discovery() {
    let w = wired(3);
    w.connected().await;

    assert!(w.remote.0.send(play("cam-1")));
    wait_until("expectation seen", || {
        w.expectations.last("cam-1") == Some(StreamExpectation::Play)
    })
    .await;
    assert_eq!(w.opened(), 0);

    w.lan.sup.learn_all_cameras(1, vec![device("cam-1", "10.0.0.7")]).await;
    wait_until("capture opened", || w.opened() == 1).await;
    wait_until("upload opened", || w.uploads() == 1).await;

    w.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_discovery_before_remote_play() {
    let w = wired(3);
    w.connected().await;

    w.lan.sup.learn_all_cameras(1, vec![device("cam-1", "10.0.0.7")]).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(w.opened(), 0);
    assert_eq!(w.uploads(), 0);

    assert!(w.remote.0.send(play("cam-1")));
    wait_until("capture opened", || w.opened() == 1).await;
    wait_until("upload opened", || w.uploads() == 1).await;

    w.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_submitted_command_behaves_like_a_remote_one() {
    let w = wired(3);
    w.lan.sup.learn_all_cameras(1, vec![device("cam-1", "10.0.0.7")]).await;

    w.reconciler.submit(play("cam-1"));
    wait_until("capture opened", || w.opened() == 1).await;

    w.reconciler.submit(RemoteCommand::Pause {
        stream_id: "cam-1".into(),
    });
    wait_until("paused", || {
        w.expectations.last("cam-1") == Some(StreamExpectation::Pause)
    })
    .await;
    wait_until("capture closed", || {
        w.lan.transport.live.load(Ordering::SeqCst) == 0
    })
    .await;

    w.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_camera_down_keeps_the_expectation() {
    let w = wired(1);
    w.connected().await;

    w.lan.sup.learn_all_cameras(1, vec![device("cam-1", "10.0.0.7")]).await;
    assert!(w.remote.0.send(play("cam-1")));
    wait_until("capture opened", || w.opened() == 1).await;

    // Missed round: purged, the remote intent survives.
    w.lan.sup.learn_all_cameras(2, vec![]).await;
    wait_until("paused", || {
        w.expectations.last("cam-1") == Some(StreamExpectation::Pause)
    })
    .await;
    wait_until("capture closed", || {
        w.lan.transport.live.load(Ordering::SeqCst) == 0
    })
    .await;

    w.lan.sup.learn_all_cameras(3, vec![device("cam-1", "10.0.0.7")]).await;
    wait_until("replayed", || w.opened() == 2).await;
    assert_eq!(w.expectations.last("cam-1"), Some(StreamExpectation::Play));

    w.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_vanished_camera_forgets_the_expectation() {
    let w = wired(3);
    w.connected().await;

    w.lan.sup.learn_all_cameras(1, vec![device("cam-1", "10.0.0.7")]).await;
    assert!(w.remote.0.send(play("cam-1")));
    wait_until("capture opened", || w.opened() == 1).await;

    w.lan.sup.forget_camera("cam-1").await.unwrap();
    w.lan.sup.learn_all_cameras(2, vec![device("cam-1", "10.0.0.7")]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(w.opened(), 1, "rediscovered camera must not replay");

    w.stop().await;
}

// ── Connection ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_cameras_are_registered_periodically() {
    let w = wired(3);
    w.connected().await;
    w.lan.sup.learn_all_cameras(1, vec![device("cam-1", "10.0.0.7")]).await;

    wait_until("registered", || w.remote.0.registered("cam-1")).await;
    let first = w.remote.0.registrations.lock().unwrap().len();
    tokio::time::sleep(Duration::from_secs(11)).await;
    let later = w.remote.0.registrations.lock().unwrap().len();
    assert!(later >= first + 2, "registrations: {first} then {later}");
    assert!(
        w.remote
            .0
            .registrations
            .lock()
            .unwrap()
            .iter()
            .all(|(user, _)| user == "camfleet")
    );

    w.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_connection_is_retried_until_it_succeeds() {
    let w = wired(3);
    w.remote.0.fail_connects.store(2, Ordering::SeqCst);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(!w.reconciler.is_connected());

    w.connected().await;
    assert_eq!(w.remote.0.connects.load(Ordering::SeqCst), 1);

    w.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_restarts_uploads() {
    let w = wired(3);
    w.connected().await;
    w.lan.sup.learn_all_cameras(1, vec![device("cam-1", "10.0.0.7")]).await;
    assert!(w.remote.0.send(play("cam-1")));
    wait_until("upload opened", || w.uploads() == 1).await;

    w.remote.0.hang_up();
    wait_until("reconnected", || {
        w.remote.0.connects.load(Ordering::SeqCst) == 2
    })
    .await;
    wait_until("upload reopened", || w.uploads() == 2).await;
    assert!(w.reconciler.is_connected());
    assert_eq!(w.opened(), 1, "LAN capture is untouched by the reconnect");

    w.stop().await;
}

#[tokio::test]
#[should_panic(expected = "already running")]
async fn test_reconciler_run_is_a_singleton() {
    let w = wired(3);
    tokio::task::yield_now().await;
    w.reconciler.run(&CancellationToken::new()).await;
}
