//! Graceful shutdown coordination.
//!
//! On SIGINT or SIGTERM the coordinator cancels its token, which stops the
//! ops listener from accepting connections and tells the crawl scheduler to
//! stop after the registration at hand. Background tasks spawned through
//! [`ShutdownCoordinator::spawn`] are then drained within
//! [`ShutdownConfig::drain_timeout`].

use anyhow::{Result, anyhow};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// How long background tasks may take to finish once cancelled
    pub drain_timeout: Duration,
    /// Report success even when the drain timed out
    pub force_shutdown_on_timeout: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(45),
            force_shutdown_on_timeout: true,
        }
    }
}

impl ShutdownConfig {
    pub fn with_drain_timeout(mut self, timeout_secs: u64) -> Self {
        self.drain_timeout = Duration::from_secs(timeout_secs);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    /// Token cancelled, no new work accepted
    StopAccepting,
    /// Waiting for background tasks
    Draining,
    Complete,
    /// Drain timed out
    Forced,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::StopAccepting => write!(f, "stop_accepting"),
            ShutdownPhase::Draining => write!(f, "draining"),
            ShutdownPhase::Complete => write!(f, "complete"),
            ShutdownPhase::Forced => write!(f, "forced"),
        }
    }
}

pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    phase: Arc<RwLock<ShutdownPhase>>,
    token: CancellationToken,
    tasks: TaskTracker,
}

impl ShutdownCoordinator {
    pub fn new(config: ShutdownConfig) -> Self {
        Self {
            config,
            phase: Arc::new(RwLock::new(ShutdownPhase::Running)),
            token: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Token cancelled when shutdown starts.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn phase(&self) -> ShutdownPhase {
        *self.phase.read().await
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn a background task that shutdown waits for.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Resolve on SIGINT, SIGTERM or an explicit cancel of the token, and
    /// cancel the token in every case.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!("failed to install SIGTERM handler: {e}");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received SIGINT (Ctrl+C), initiating graceful shutdown"),
            _ = terminate => info!("received SIGTERM, initiating graceful shutdown"),
            _ = self.token.cancelled() => info!("shutdown requested"),
        }
        self.token.cancel();
    }

    /// Cancel the token and drain background tasks.
    pub async fn shutdown(&self) -> Result<()> {
        *self.phase.write().await = ShutdownPhase::StopAccepting;
        self.token.cancel();
        self.tasks.close();

        *self.phase.write().await = ShutdownPhase::Draining;
        info!(tasks = self.tasks.len(), "draining background tasks");

        match timeout(self.config.drain_timeout, self.tasks.wait()).await {
            Ok(()) => {
                *self.phase.write().await = ShutdownPhase::Complete;
                info!("graceful shutdown completed");
                Ok(())
            }
            Err(_) => {
                *self.phase.write().await = ShutdownPhase::Forced;
                let remaining = self.tasks.len();
                if self.config.force_shutdown_on_timeout {
                    warn!(
                        remaining,
                        timeout_secs = self.config.drain_timeout.as_secs(),
                        "drain timed out, forcing shutdown"
                    );
                    Ok(())
                } else {
                    Err(anyhow!("{remaining} background tasks still running after drain timeout"))
                }
            }
        }
    }
}
