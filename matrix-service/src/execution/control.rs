// Run Control
// Cooperative stop and pause signals shared by every matrix of a run

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use std::sync::Arc;
use std::time::Duration;

/// Cancellation and pause state for one scheduler run.
///
/// A stop is honoured before every action, before every step and inside
/// re-check waits. The action already running is never cut short.
#[derive(Clone)]
pub struct RunControl {
    stop: CancellationToken,
    pause: Arc<watch::Sender<Option<String>>>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (pause, _) = watch::channel(None);
        Self {
            stop: CancellationToken::new(),
            pause: Arc::new(pause),
        }
    }

    /// Let the running action finish, then skip every action not yet started
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn pause(&self, reason: impl Into<String>) {
        self.pause.send_replace(Some(reason.into()));
    }

    pub fn resume(&self) {
        self.pause.send_replace(None);
    }

    pub fn is_paused(&self) -> bool {
        self.pause.borrow().is_some()
    }

    pub fn pause_reason(&self) -> Option<String> {
        self.pause.borrow().clone()
    }

    /// Block while paused. Returns early when the run is stopped.
    pub async fn wait_if_paused(&self) {
        let mut rx = self.pause.subscribe();
        loop {
            if rx.borrow_and_update().is_none() || self.is_stopped() {
                return;
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = self.stop.cancelled() => return,
            }
        }
    }

    /// Sleep for `duration`; returns false when the run is stopped first
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.stop.cancelled() => false,
        }
    }
}
