/// Background tasks with their own cancellation token
///
/// Each task gets a `CancellationToken`, either fresh or a child of an owner
/// token. Cancelling one task never touches its siblings; cancelling the
/// owner stops all of its children. Tasks notice cancellation at their sleep
/// boundaries only.

use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

/// Sleep for `duration`; false if `token` was cancelled first
pub async fn pause(token: &CancellationToken, duration: Duration) -> bool {
    if token.is_cancelled() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = token.cancelled() => false,
    }
}

/// A named task; dropping the handle cancels it
#[derive(Debug)]
pub struct BackgroundTask {
    name: String,
    token: CancellationToken,
    guard: DropGuard,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Spawn on the current runtime; must be called from inside one
    pub fn spawn<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn_on(&Handle::current(), CancellationToken::new(), name, body)
    }

    /// Spawn on the current runtime as a child of `parent`
    pub fn spawn_child<F, Fut>(parent: &CancellationToken, name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn_on(&Handle::current(), parent.child_token(), name, body)
    }

    pub fn spawn_on<F, Fut>(
        runtime: &Handle,
        token: CancellationToken,
        name: impl Into<String>,
        body: F,
    ) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let handle = runtime.spawn(body(token.clone()));
        debug!(task = %name, "background task started");

        Self {
            name,
            guard: token.clone().drop_guard(),
            token,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Ask the task to stop at its next sleep boundary
    pub fn cancel(&self) {
        self.token.cancel();
        debug!(task = %self.name, "background task cancelled");
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task to end; only tests need this, the loop never joins
    pub async fn join(self) {
        let Self { guard, handle, .. } = self;
        let _ = handle.await;
        drop(guard);
    }
}

/// The background tasks owned by the dispatcher
///
/// Tasks started with `spawn` are children of the set's token, so
/// `cancel_all` reaches them even if they were never pushed.
#[derive(Debug, Default)]
pub struct TaskSet {
    shutdown: CancellationToken,
    tasks: Vec<BackgroundTask>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a task owned by this set
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, body: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = BackgroundTask::spawn_child(&self.shutdown, name, body);
        self.push(task);
    }

    pub fn push(&mut self, task: BackgroundTask) {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(task);
    }

    pub fn names(&self) -> Vec<&str> {
        self.tasks.iter().map(BackgroundTask::name).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel every task with this name
    pub fn cancel(&mut self, name: &str) -> bool {
        let mut found = false;
        self.tasks.retain(|task| {
            if task.name() == name {
                task.cancel();
                found = true;
                false
            } else {
                true
            }
        });
        found
    }

    /// Signal every task; nothing is awaited
    pub fn cancel_all(&mut self) {
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            task.cancel();
        }
        self.shutdown = CancellationToken::new();
    }
}

impl Drop for TaskSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
