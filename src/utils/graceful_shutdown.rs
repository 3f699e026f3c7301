use std::{future::Future, time::Duration};

use tokio::{signal, time::timeout};
use tokio_util::sync::CancellationToken;

/// Why the gateway is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT or SIGTERM
    Signal,
    /// Requested from code
    Manual,
}

/// Owns the process-wide cancellation token and the drain deadline.
///
/// Cancelling the token stops the listener from accepting, stops the change
/// detector and the key refresher, and starts the drain of in-flight
/// requests.
#[derive(Debug, Clone)]
pub struct GracefulShutdown {
    token: CancellationToken,
    drain_timeout: Duration,
}

impl GracefulShutdown {
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            drain_timeout,
        }
    }

    /// A clone of the shutdown token for a background task.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        if self.token.is_cancelled() {
            tracing::debug!(?reason, "Shutdown already initiated");
            return;
        }
        tracing::info!(?reason, "Initiating graceful shutdown");
        self.token.cancel();
    }

    /// Wait for SIGINT/SIGTERM (or a manual trigger) and cancel the token.
    pub async fn run_signal_handler(&self) {
        tokio::select! {
            res = signal::ctrl_c() => {
                match res {
                    Ok(()) => tracing::info!("Received SIGINT"),
                    Err(e) => tracing::error!(error = %e, "Failed to listen for SIGINT"),
                }
                self.trigger_shutdown(ShutdownReason::Signal);
            }
            _ = wait_for_sigterm() => {
                tracing::info!("Received SIGTERM");
                self.trigger_shutdown(ShutdownReason::Signal);
            }
            _ = self.token.cancelled() => {}
        }
    }

    /// Resolves once shutdown has been initiated.
    pub async fn wait_for_shutdown_signal(&self) {
        self.token.cancelled().await;
    }

    /// Run `fut` to completion unless the drain deadline passes first.
    /// Returns `false` when the deadline cut it short.
    pub async fn drain<F: Future<Output = ()>>(&self, fut: F) -> bool {
        match timeout(self.drain_timeout, fut).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    drain_timeout = ?self.drain_timeout,
                    "Drain deadline exceeded, abandoning in-flight requests"
                );
                false
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
