//! Service lifecycle
//!
//! A [`Serve`] implementation runs on an already bound listener until its
//! shutdown token fires. [`start`] runs it in the background and hands back
//! a [`ServiceHandle`]; [`ServiceHandle::stop`] requests a graceful drain and
//! waits for the serving task. [`run_until_signal`] wires this to SIGINT and
//! SIGTERM for a process main.

use std::io;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Errors a serving task can end with
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("{context}: {source}")]
    Failed {
        context: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl ServiceError {
    pub fn failed<E>(context: &'static str, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Failed {
            context,
            source: source.into(),
        }
    }
}

/// A service that serves connections from a listener
#[async_trait]
pub trait Serve: Send + Sized + 'static {
    /// Name used in lifecycle logs
    fn name(&self) -> &'static str;

    /// Serve until `shutdown` fires, then stop accepting and let in-flight
    /// sessions finish. Returning `Ok` means a clean stop.
    async fn serve(self, listener: TcpListener, shutdown: CancellationToken)
        -> Result<(), ServiceError>;
}

/// A running service
#[derive(Debug)]
pub struct ServiceHandle {
    name: &'static str,
    shutdown: CancellationToken,
    exited: CancellationToken,
    task: JoinHandle<Result<(), ServiceError>>,
}

/// Begin serving in a background task; returns immediately
pub fn start<S: Serve>(service: S, listener: TcpListener) -> ServiceHandle {
    let name = service.name();
    let shutdown = CancellationToken::new();
    let exited = CancellationToken::new();

    if let Ok(addr) = listener.local_addr() {
        info!(service = name, %addr, "service listening");
    }

    let task = tokio::spawn({
        let shutdown = shutdown.clone();
        let exited = exited.clone();
        async move {
            let result = service.serve(listener, shutdown).await;
            exited.cancel();
            result
        }
    });

    ServiceHandle {
        name,
        shutdown,
        exited,
        task,
    }
}

impl ServiceHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the serving task has already returned
    pub fn has_exited(&self) -> bool {
        self.exited.is_cancelled()
    }

    /// Resolves once the serving task returns
    pub async fn exited(&self) {
        self.exited.cancelled().await
    }

    /// Request graceful shutdown and wait for the serving task.
    ///
    /// Returns `true` when the task ended without an error.
    pub async fn stop(self) -> bool {
        info!(service = self.name, "stopping service");
        self.shutdown.cancel();

        match self.task.await {
            Ok(Ok(())) => {
                info!(service = self.name, "service stopped");
                true
            }
            Ok(Err(e)) => {
                error!(service = self.name, "service failed: {}", e);
                false
            }
            Err(e) => {
                error!(service = self.name, "service task failed: {}", e);
                false
            }
        }
    }
}

/// Wait for SIGINT or SIGTERM
pub async fn wait_for_signal() -> io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => Ok("SIGTERM"),
            _ = sigint.recv() => Ok("SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("ctrl-c")
    }
}

/// Block until a termination signal (or an early service exit), run
/// `before_shutdown`, then stop the service.
///
/// The result is suitable as the process exit status: `true` on a clean,
/// signal-triggered shutdown.
pub async fn run_until_signal<F>(handle: ServiceHandle, before_shutdown: F) -> bool
where
    F: FnOnce(),
{
    info!("waiting for termination signal...");

    let signalled = tokio::select! {
        signal = wait_for_signal() => match signal {
            Ok(name) => {
                info!("signal received: {}", name);
                true
            }
            Err(e) => {
                error!("failed to install signal handlers: {}", e);
                false
            }
        },
        _ = handle.exited() => {
            error!(service = handle.name(), "service exited before shutdown was requested");
            false
        }
    };

    before_shutdown();

    let stopped = handle.stop().await;
    signalled && stopped
}
