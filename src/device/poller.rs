//! Background accumulator poller

use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::Device;

/// Control handle for a device's poller task.
#[derive(Debug)]
pub(crate) struct Poller {
    cancel: CancellationToken,
    wake: Arc<Notify>,
}

impl Poller {
    /// Spawn the poller for `device`. It stops with `cancel` or when no accumulated
    /// registers remain; either way the token ends up cancelled.
    pub fn spawn(device: Device, cancel: CancellationToken) -> Self {
        let wake = Arc::new(Notify::new());
        tokio::spawn(run(device, cancel.clone(), wake.clone()));
        Self { cancel, wake }
    }

    /// Re-evaluate the schedule after a configuration change.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(device: Device, cancel: CancellationToken, wake: Arc<Notify>) {
    let address = device.address();
    info!(%address, "Accumulator poller started");
    let mut reads = JoinSet::new();
    let mut launched = 0u64;

    loop {
        let due = device.take_due(Instant::now());
        for read in due {
            launched += 1;
            let device = device.clone();
            reads.spawn(async move { device.sample(read).await });
        }

        if reads.is_empty() && device.retire_poller_if_idle(&cancel) {
            debug!(%address, "No accumulated registers left");
            break;
        }
        let next = device.next_due();

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = wake.notified() => {}
            Some(joined) = reads.join_next() => {
                if let Err(e) = joined {
                    error!(%address, error = %e, "Accumulator read task failed");
                }
            }
            _ = sleep_until_due(next) => {}
        }
    }

    reads.abort_all();
    cancel.cancel();
    info!(%address, launched, "Accumulator poller stopped");
}

async fn sleep_until_due(next: Option<Instant>) {
    match next {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
