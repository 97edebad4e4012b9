//! Cancellable background task slot shared by the sources.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::TelemetryError;

/// Holds at most one running task plus the token that stops it.
#[derive(Default)]
pub(crate) struct Worker {
    slot: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Worker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.slot.lock().as_ref().is_some_and(|(_, handle)| !handle.is_finished())
    }

    /// Spawn `task` unless one is already running. Returns whether it spawned.
    pub(crate) fn spawn_with<F, Fut>(&self, task: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|(_, handle)| !handle.is_finished()) {
            return false;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(task(cancel.clone()));
        *slot = Some((cancel, handle));
        true
    }

    /// Cancel and join the task, waiting at most `timeout`. Returns whether
    /// there was a task to stop.
    pub(crate) async fn stop(&self, timeout: Duration, name: &str) -> bool {
        let Some((cancel, handle)) = self.slot.lock().take() else {
            return false;
        };
        cancel.cancel();
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => debug!(task = name, "Task joined"),
            Ok(Err(e)) => warn!(task = name, "Task ended abnormally: {}", e),
            Err(_) => {
                let error = TelemetryError::timeout(name, timeout);
                warn!(error = %error, hint = error.recovery_hint(), "Task abandoned")
            }
        }
        true
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some((cancel, _)) = self.slot.get_mut().take() {
            cancel.cancel();
        }
    }
}
