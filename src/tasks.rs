//! Keyed registry of background tasks.
//!
//! Every task the dashboard spawns (feed connection, periodic tickers,
//! in-flight fetches) is registered here under a key. Spawning under a key
//! that is already running aborts the old task first, and dropping the
//! registry aborts everything, so nothing outlives the dashboard.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

/// Identifies a task for cancellation and replacement.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TaskKey(String);

impl TaskKey {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for TaskKey {
    fn from(s: &'static str) -> Self {
        Self::new(s)
    }
}

/// Background tasks that report back as events of type `E`.
pub struct BackgroundTasks<E> {
    tasks: HashMap<TaskKey, AbortHandle>,
    event_tx: mpsc::UnboundedSender<E>,
}

impl<E> BackgroundTasks<E>
where
    E: Send + 'static,
{
    #[must_use]
    pub fn new(event_tx: mpsc::UnboundedSender<E>) -> Self {
        Self {
            tasks: HashMap::new(),
            event_tx,
        }
    }

    /// Run `future` and send its output as an event, replacing any task with
    /// the same key. Nothing is sent if the task is aborted.
    pub fn spawn<F>(&mut self, key: impl Into<TaskKey>, future: F) -> &mut Self
    where
        F: Future<Output = E> + Send + 'static,
    {
        let tx = self.event_tx.clone();
        self.spawn_detached(key, async move {
            let event = future.await;
            let _ = tx.send(event);
        })
    }

    /// Run a task that reports through its own means (or not at all).
    pub fn spawn_detached<F>(&mut self, key: impl Into<TaskKey>, future: F) -> &mut Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        self.cancel(&key);

        trace!(task = key.name(), "spawning background task");
        let handle = tokio::spawn(future);
        self.tasks.insert(key, handle.abort_handle());
        self
    }

    /// Send `make_event()` every `period`, starting one period from now.
    pub fn spawn_interval<M>(
        &mut self,
        key: impl Into<TaskKey>,
        period: Duration,
        make_event: M,
    ) -> &mut Self
    where
        M: Fn() -> E + Send + 'static,
    {
        let tx = self.event_tx.clone();
        self.spawn_detached(key, async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(make_event()).is_err() {
                    break;
                }
            }
        })
    }

    /// Abort a task by key. No-op if it is not registered.
    pub fn cancel(&mut self, key: &TaskKey) {
        if let Some(handle) = self.tasks.remove(key) {
            trace!(task = key.name(), "aborting background task");
            handle.abort();
        }
    }

    /// Abort every task.
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }

    /// Registered and not yet finished.
    #[must_use]
    pub fn is_running(&self, key: &TaskKey) -> bool {
        self.tasks.get(key).is_some_and(|h| !h.is_finished())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

impl<E> Drop for BackgroundTasks<E> {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}
