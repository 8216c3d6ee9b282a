//! Graceful shutdown support for the REST gateway.
//!
//! The HTTP server stops accepting connections on SIGTERM/SIGINT and the
//! coordinator then waits for in-flight work to drain. Backing gRPC calls
//! started by instances hold a [`RequestGuard`] for their whole lifetime, so
//! a response stream that is still being consumed delays shutdown up to the
//! configured timeout.
//!
//! # Example
//!
//! ```rust,no_run
//! use grpc_rest_gateway::{Gateway, ShutdownConfig};
//! use std::time::Duration;
//!
//! # async fn example(descriptor_set: Vec<u8>) -> Result<(), Box<dyn std::error::Error>> {
//! Gateway::builder()
//!     .with_descriptor_set_bytes(&descriptor_set)
//!     .with_grpc_endpoint("http://127.0.0.1:50051")
//!     .with_graceful_shutdown(ShutdownConfig {
//!         timeout: Duration::from_secs(30),
//!         ..Default::default()
//!     })
//!     .serve("0.0.0.0:8080")
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Configuration for graceful shutdown behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownConfig {
    /// Maximum time to wait for in-flight work to complete (default: 30 seconds)
    pub timeout: Duration,
    /// Whether to handle OS signals (SIGTERM, SIGINT) automatically (default: true)
    pub handle_signals: bool,
    /// Grace period before forceful shutdown after timeout (default: 5 seconds)
    pub force_shutdown_delay: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            handle_signals: true,
            force_shutdown_delay: Duration::from_secs(5),
        }
    }
}

/// Shutdown coordinator shared by the server and the instance manager.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    state_tx: Arc<watch::Sender<ShutdownState>>,
    state_rx: watch::Receiver<ShutdownState>,
    /// Requests and backing calls currently in flight
    active_count: Arc<AtomicUsize>,
    is_shutting_down: Arc<AtomicBool>,
    config: ShutdownConfig,
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("active_count", &self.active_count())
            .field("is_shutting_down", &self.is_shutting_down())
            .field("config", &self.config)
            .finish()
    }
}

/// Current state of the shutdown process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    /// Server is running normally
    Running,
    /// Shutdown initiated, draining in-flight work
    Draining,
    /// Shutdown complete
    Shutdown,
}

impl ShutdownCoordinator {
    pub fn new(config: ShutdownConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (state_tx, state_rx) = watch::channel(ShutdownState::Running);

        Self {
            shutdown_tx,
            state_tx: Arc::new(state_tx),
            state_rx,
            active_count: Arc::new(AtomicUsize::new(0)),
            is_shutting_down: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ShutdownConfig::default())
    }

    pub fn config(&self) -> &ShutdownConfig {
        &self.config
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    /// Number of tracked requests and backing calls
    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<ShutdownState> {
        self.state_rx.clone()
    }

    /// Guard that keeps the active count raised until dropped
    pub fn request_guard(&self) -> RequestGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            coordinator: self.clone(),
        }
    }

    fn request_completed(&self) {
        let prev = self.active_count.fetch_sub(1, Ordering::SeqCst);
        debug!(active_count = prev.saturating_sub(1), "In-flight work completed");
    }

    /// Initiate graceful shutdown.
    ///
    /// Notifies subscribers, then waits for in-flight work up to the timeout,
    /// then waits the force delay if anything is still running.
    pub async fn shutdown(&self) {
        if self.is_shutting_down.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already in progress");
            return;
        }

        info!("Initiating graceful shutdown...");
        let _ = self.state_tx.send(ShutdownState::Draining);
        let _ = self.shutdown_tx.send(());

        let start = std::time::Instant::now();
        loop {
            let active = self.active_count();
            if active == 0 {
                info!("All in-flight work completed, shutting down");
                break;
            }
            if start.elapsed() >= self.config.timeout {
                warn!(active_count = active, "Shutdown timeout reached with work still active");
                break;
            }
            debug!(
                active_count = active,
                elapsed_secs = start.elapsed().as_secs(),
                "Waiting for in-flight work to complete"
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if self.active_count() > 0 {
            warn!(
                delay_secs = self.config.force_shutdown_delay.as_secs(),
                "Waiting before forcing shutdown"
            );
            tokio::time::sleep(self.config.force_shutdown_delay).await;
        }

        let _ = self.state_tx.send(ShutdownState::Shutdown);
        info!("Graceful shutdown complete");
    }

    /// Future that completes when shutdown is signaled.
    ///
    /// Suitable for `axum::serve().with_graceful_shutdown()`.
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.subscribe();
        let already = self.is_shutting_down();
        async move {
            if !already {
                let _ = rx.recv().await;
            }
        }
    }
}

/// RAII guard that tracks one unit of in-flight work.
pub struct RequestGuard {
    coordinator: ShutdownCoordinator,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.coordinator.request_completed();
    }
}

/// Completes on SIGTERM or SIGINT (Ctrl+C).
#[cfg(unix)]
pub async fn signal_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Failed to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT (Ctrl+C)"),
    }
}

/// Completes on Ctrl+C.
#[cfg(not(unix))]
pub async fn signal_shutdown() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        return;
    }
    info!("Received Ctrl+C");
}

/// Serve `app` until an OS signal or an explicit shutdown, then drain.
pub async fn run_with_graceful_shutdown(
    listener: tokio::net::TcpListener,
    app: axum::Router,
    coordinator: ShutdownCoordinator,
) -> std::io::Result<()> {
    if coordinator.config().handle_signals {
        let coordinator_for_signal = coordinator.clone();
        tokio::spawn(async move {
            signal_shutdown().await;
            coordinator_for_signal.shutdown().await;
        });
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(coordinator.shutdown_signal())
        .await?;

    coordinator.shutdown().await;
    Ok(())
}
