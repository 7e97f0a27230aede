//! Periodic retention sweeping for the audit log.

use super::AuditLog;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

/// Handle to a running retention sweeper, cancellable at process shutdown.
///
/// Cancellation only ever lands on the timer wait, not inside a sweep, so
/// the log is never left half-swept.
pub struct SweeperHandle {
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn shutdown(&self) {
        self.handle.abort();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawn a background task that sweeps `log` on a fixed cadence.
pub fn spawn_retention_sweeper(log: Arc<AuditLog>, interval: Duration) -> SweeperHandle {
    let handle = tokio::spawn(async move {
        debug!(interval_seconds = interval.as_secs(), "retention sweeper started");
        loop {
            sleep(interval).await;
            log.sweep(Utc::now()).await;
        }
    });

    SweeperHandle { handle }
}
