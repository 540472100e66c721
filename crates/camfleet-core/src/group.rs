// ── Cancellable task groups ──
//
// A `TaskGroup` is a set of tokio tasks sharing one cancellation token
// derived from a parent. Two flavours:
//
// - `TaskGroup::swarm`: members are independent (camera lifecycles,
//   upload handles). Membership changes over time.
// - `TaskGroup::linked`: the first member to finish cancels the rest
//   (capture + relay of one play attempt, watcher loops).

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Debug, Clone)]
pub struct TaskGroup {
    tracker: TaskTracker,
    cancel: CancellationToken,
    linked: bool,
}

impl TaskGroup {
    /// Independent members under a child of `parent`.
    pub fn swarm(parent: &CancellationToken) -> Self {
        Self {
            tracker: TaskTracker::new(),
            cancel: parent.child_token(),
            linked: false,
        }
    }

    /// Members whose first exit cancels the whole group.
    pub fn linked(parent: &CancellationToken) -> Self {
        Self {
            tracker: TaskTracker::new(),
            cancel: parent.child_token(),
            linked: true,
        }
    }

    /// Spawn a member. The closure receives the group's token.
    pub fn spawn<F, Fut>(&self, f: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let fut = f(self.cancel.clone());
        if self.linked {
            let guard = self.cancel.clone().drop_guard();
            self.tracker.spawn(async move {
                // Dropped on exit, panic included.
                let _guard = guard;
                fut.await;
            });
        } else {
            self.tracker.spawn(fut);
        }
    }

    /// Request every member to stop. Does not wait.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Number of members still running.
    pub fn count(&self) -> usize {
        self.tracker.len()
    }

    /// `true` once no member is running.
    pub fn is_settled(&self) -> bool {
        self.tracker.is_empty()
    }

    /// No further members will be spawned; `wait` can now complete.
    pub fn close(&self) {
        self.tracker.close();
    }

    /// Close the group and wait for every member to finish.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Cancel, then wait for every member to finish.
    pub async fn shutdown(&self) {
        self.cancel();
        self.wait().await;
    }

    /// A future resolving once the (closed) group is empty, detached from
    /// `self` so it can be moved into a watcher task.
    pub fn settled(&self) -> impl Future<Output = ()> + Send + 'static {
        let tracker = self.tracker.clone();
        tracker.close();
        async move { tracker.wait().await }
    }
}
