//! Background reclamation loop.
//!
//! The reaper thread holds an `Arc<DeallocatorRegistry>` and calls
//! [`poll_and_reap`](DeallocatorRegistry::poll_and_reap) every
//! `poll_interval`, or immediately when [`Reaper::wake`] is called.
//! Allocation failures do not wake it; the service reaps synchronously
//! on that path instead. Wake and shutdown signals arrive over a bounded
//! crossbeam channel; a full channel means a poll is already pending, so
//! extra wakes are dropped.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender, TrySendError};

use ndbuf_core::RegistryError;

use crate::registry::{DeallocatorRegistry, ReapReport};

/// Configuration for the reaper thread.
#[derive(Clone, Debug)]
pub struct ReaperConfig {
    /// Time between unprompted polls. Default: 50ms. Must be non-zero.
    pub poll_interval: Duration,
    /// OS thread name. Default: `ndbuf-reaper`.
    pub thread_name: String,
}

impl ReaperConfig {
    /// Default poll interval.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            thread_name: "ndbuf-reaper".to_string(),
        }
    }
}

enum Signal {
    Wake,
    Shutdown,
}

/// Handle to a running reaper thread. Dropping it stops and joins the
/// thread.
pub struct Reaper {
    tx: Sender<Signal>,
    handle: Option<JoinHandle<ReapReport>>,
}

impl Reaper {
    /// Spawn the reaper thread for `registry`.
    pub fn spawn(
        registry: Arc<DeallocatorRegistry>,
        config: &ReaperConfig,
    ) -> Result<Self, RegistryError> {
        let (tx, rx) = bounded::<Signal>(8);
        let interval = config.poll_interval;

        let handle = std::thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                tracing::debug!(interval_ms = interval.as_millis() as u64, "reaper started");
                let mut total = ReapReport::default();
                loop {
                    match rx.recv_timeout(interval) {
                        Ok(Signal::Wake) | Err(RecvTimeoutError::Timeout) => {
                            total.merge(registry.poll_and_reap());
                        }
                        Ok(Signal::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!(
                    reaped = total.reaped,
                    failed = total.failed,
                    "reaper stopped"
                );
                total
            })
            .map_err(|e| RegistryError::ReaperSpawnFailed {
                reason: e.to_string(),
            })?;

        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    /// Request an immediate poll.
    pub fn wake(&self) {
        match self.tx.try_send(Signal::Wake) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!("reaper thread is gone; wake ignored");
            }
        }
    }

    /// Whether the thread is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the thread and return what it reaped over its lifetime.
    pub fn shutdown(mut self) -> ReapReport {
        self.stop()
    }

    fn stop(&mut self) -> ReapReport {
        let Some(handle) = self.handle.take() else {
            return ReapReport::default();
        };
        // A send error means the thread already exited.
        let _ = self.tx.send(Signal::Shutdown);
        match handle.join() {
            Ok(report) => report,
            Err(_) => {
                tracing::error!("reaper thread panicked");
                ReapReport::default()
            }
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl std::fmt::Debug for Reaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaper")
            .field("running", &self.is_running())
            .finish()
    }
}
