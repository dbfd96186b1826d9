use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::{signal, sync::broadcast};

/// Why the gateway is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT or SIGTERM.
    Signal,
    /// `RouterService::shutdown` or another in-process caller.
    Requested,
    /// The drain deadline elapsed.
    Force,
}

/// Process-wide shutdown signal shared by the router service and the binary.
///
/// Triggering is idempotent: only the first call broadcasts. Tokens created
/// after the trigger still observe it through the shared flag.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Start shutting down. Returns `false` if shutdown was already under way.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) -> bool {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tracing::info!(?reason, "shutdown triggered");
            // No receivers simply means nothing is running yet.
            let _ = self.shutdown_tx.send(reason);
            true
        } else {
            tracing::debug!(?reason, "shutdown already initiated, ignoring trigger");
            false
        }
    }

    /// Wait for SIGINT/SIGTERM and trigger shutdown. Returns early if shutdown
    /// is triggered from elsewhere first.
    pub async fn run_signal_handler(&self) {
        tracing::info!("signal handler started, listening for SIGINT and SIGTERM");
        let mut token = self.shutdown_token();

        tokio::select! {
            result = signal::ctrl_c() => {
                match result {
                    Ok(()) => {
                        tracing::info!("received SIGINT, initiating graceful shutdown");
                        self.trigger_shutdown(ShutdownReason::Signal);
                    }
                    Err(e) => tracing::error!(error = %e, "failed to listen for SIGINT"),
                }
            }
            _ = wait_for_sigterm() => {
                tracing::info!("received SIGTERM, initiating graceful shutdown");
                self.trigger_shutdown(ShutdownReason::Signal);
            }
            reason = token.wait_for_shutdown() => {
                tracing::debug!(?reason, "signal handler exiting on in-process shutdown");
            }
        }
    }

    /// Wait until shutdown is triggered.
    pub async fn wait_for_shutdown_signal(&self) -> ShutdownReason {
        self.shutdown_token().wait_for_shutdown().await
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        ShutdownToken {
            receiver: self.subscribe(),
            shutdown_initiated: Arc::clone(&self.shutdown_initiated),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
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
            tracing::error!(error = %e, "failed to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}

/// Cheap handle for tasks that need to stop with the gateway.
pub struct ShutdownToken {
    receiver: broadcast::Receiver<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl Clone for ShutdownToken {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.resubscribe(),
            shutdown_initiated: Arc::clone(&self.shutdown_initiated),
        }
    }
}

impl ShutdownToken {
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been triggered, including before this token
    /// was created.
    pub async fn wait_for_shutdown(&mut self) -> ShutdownReason {
        if let Ok(reason) = self.receiver.try_recv() {
            return reason;
        }
        if self.is_shutdown_initiated() {
            return ShutdownReason::Requested;
        }
        match self.receiver.recv().await {
            Ok(reason) => reason,
            Err(_) => ShutdownReason::Force,
        }
    }
}
