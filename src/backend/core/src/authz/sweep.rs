//! Periodic expiry sweep.
//!
//! Flips grants whose `expires_at` has passed to `is_granted = false` and
//! records an `Expired` history event for each. Decisions never depend on
//! the sweep having run.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::overrides::OverrideStore;

/// Handle to a running sweeper task.
pub struct ExpirySweeper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ExpirySweeper {
    /// Spawn the sweep loop on the current runtime. The first sweep runs
    /// immediately.
    pub fn spawn(store: Arc<OverrideStore>, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_ms = interval.as_millis() as u64, "Expiry sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match store.sweep_expired().await {
                            Ok(0) => debug!("No expired overrides"),
                            Ok(_) => {}
                            Err(e) => error!(error = %e, "Expiry sweep failed"),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Expiry sweeper stopped");
        });

        Self { shutdown, handle }
    }

    /// Signal the loop to stop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "Expiry sweeper task panicked");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
