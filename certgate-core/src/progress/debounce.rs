//! Debounced callbacks on tokio timers

use std::time::Duration;

use tokio::task::JoinHandle;

/// Cancel handle for a scheduled callback
#[derive(Debug)]
pub struct DebounceHandle {
    task: JoinHandle<()>,
}

impl DebounceHandle {
    /// Drop the callback if it has not run yet
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// True once the callback has run or been cancelled
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Run `callback` after `delay` unless cancelled first
///
/// Must be called from within a tokio runtime.
pub fn debounce<F>(delay: Duration, callback: F) -> DebounceHandle
where
    F: FnOnce() + Send + 'static,
{
    let task = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        callback();
    });
    DebounceHandle { task }
}

/// Keeps at most one pending callback; scheduling replaces the previous one
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Option<DebounceHandle>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn schedule<F>(&mut self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        self.pending = Some(debounce(self.delay, callback));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.cancel();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
