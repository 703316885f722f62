use anyhow::Result;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

/// Graceful shutdown coordinator for the dispatch loops
pub struct ShutdownCoordinator {
    sender: watch::Sender<bool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Receiver handed to each background loop; flips to `true` on shutdown.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    pub fn trigger(&self) {
        info!("Shutdown requested");
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Wait for Ctrl-C, then signal every subscriber.
    pub async fn wait_for_signal(&self) -> Result<()> {
        info!("Shutdown coordinator ready - will shutdown gracefully on Ctrl-C");
        tokio::signal::ctrl_c().await?;
        self.trigger();
        Ok(())
    }

    /// Signal shutdown and give the loops `grace` to finish their current
    /// pass; loops still running after that are aborted.
    pub async fn shutdown_all(&self, handles: Vec<JoinHandle<()>>, grace: Duration) {
        self.trigger();
        for mut handle in handles {
            match timeout(grace, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Dispatch loop ended abnormally"),
                Err(_) => {
                    warn!("Dispatch loop did not stop within the grace period, aborting");
                    handle.abort();
                }
            }
        }
        info!("Graceful shutdown completed");
    }
}
