//! Inactivity watchdog.
//!
//! A single outstanding deferred task per session. Every schedule cancels the
//! previous task and bumps a generation counter; the fired callback receives
//! the generation it was scheduled under so the owner can ignore late fires.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Default)]
pub(crate) struct InactivityWatchdog {
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl InactivityWatchdog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Cancel any pending task and run `on_fire` once `timeout` has elapsed.
    ///
    /// The deadline is fixed here, not when the spawned task is first polled.
    /// Returns the generation passed to `on_fire`.
    pub(crate) fn schedule<F, Fut>(&mut self, timeout: Duration, on_fire: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();

        let generation = self.generation;
        let deadline = Instant::now() + timeout;
        self.task = Some(tokio::spawn(async move {
            sleep_until(deadline).await;
            on_fire(generation).await;
        }));
        generation
    }

    /// Stop the pending task, if any. Takes effect immediately: a task that
    /// already woke up sees a stale generation.
    pub(crate) fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Claim a fire for `generation`.
    ///
    /// Returns `true` and disarms the watchdog only if `generation` is still
    /// current. The handle is released without aborting, since the caller is
    /// the fired task itself.
    pub(crate) fn claim(&mut self, generation: u64) -> bool {
        if self.task.is_none() || self.generation != generation {
            return false;
        }
        self.generation = self.generation.wrapping_add(1);
        self.task = None;
        true
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for InactivityWatchdog {
    fn drop(&mut self) {
        self.cancel();
    }
}
