use crate::services::staging::StagingService;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

/// Periodically purges staged entries whose deferred release never ran (crash, restart).
pub struct StagingSweeper {
    staging: Arc<StagingService>,
    max_age: Duration,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl StagingSweeper {
    pub fn new(
        staging: Arc<StagingService>,
        max_age: Duration,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            staging,
            max_age,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("🚀 Staging sweeper started");

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Staging sweeper shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.sweep().await;
                }
            }
        }
    }

    pub async fn sweep(&self) -> usize {
        tracing::debug!("🧹 Sweeping staging directory...");

        let staging = self.staging.clone();
        let max_age = self.max_age;
        match tokio::task::spawn_blocking(move || staging.purge_older_than(max_age)).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::error!("Staging sweep failed: {}", e);
                0
            }
        }
    }
}
