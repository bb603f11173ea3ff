//! Background sweep that closes expired and long-idle pooled connections.

use crate::error::{ClientError, Result};
use crate::pool::manager::{Connect, ConnectionPool, PoolCore, Poolable};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Handle to the `idle-reaper` thread. Stops the thread on drop.
pub struct IdleReaper {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl IdleReaper {
    /// Start sweeping `pool` every `interval`. The reaper holds the pool weakly,
    /// so it never keeps a dropped pool alive.
    pub fn start<K: Connect>(
        pool: &ConnectionPool<K>,
        interval: Duration,
        max_idle: Duration,
    ) -> Result<Self> {
        if interval.is_zero() {
            return Err(ClientError::Config(
                "reaper interval must be positive".to_string(),
            ));
        }

        let weak = pool.downgrade();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("idle-reaper".to_string())
            .spawn(move || {
                debug!(
                    interval_secs = interval.as_secs(),
                    max_idle_secs = max_idle.as_secs(),
                    "Idle reaper started"
                );
                // A message or a dropped sender both mean stop
                while let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(interval) {
                    run_sweep(&weak, max_idle);
                }
                debug!("Idle reaper stopped");
            })?;

        Ok(IdleReaper {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for an in-progress sweep to finish.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Idle reaper thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for IdleReaper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Counts from one sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SweepReport {
    pub expired: usize,
    pub idle: usize,
}

/// One sweep: expired connections first, then idle ones. `None` when the pool is gone
/// or the sweep panicked.
pub(crate) fn run_sweep<C: Poolable>(pool: &Weak<PoolCore<C>>, max_idle: Duration) -> Option<SweepReport> {
    let Some(pool) = pool.upgrade() else {
        debug!("Idle reaper found no pool, skipping sweep");
        return None;
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let now = Instant::now();
        SweepReport {
            expired: pool.close_expired_at(now),
            idle: pool.close_idle_at(now, max_idle),
        }
    }));

    match result {
        Ok(report) => {
            if report.expired > 0 || report.idle > 0 {
                info!(
                    expired = report.expired,
                    idle = report.idle,
                    "Idle reaper closed expired and idle connections"
                );
            } else {
                debug!("Idle reaper sweep found nothing to close");
            }
            Some(report)
        }
        Err(_) => {
            error!("Idle reaper sweep panicked, continuing");
            None
        }
    }
}
