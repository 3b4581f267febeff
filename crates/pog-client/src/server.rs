//! HTTP/1 proxy listener

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use pog_lifecycle::{Serve, ServiceError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::handler::ProxyClient;

/// Pause after a failed accept; errors like EMFILE tend to repeat immediately
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts proxy connections and hands each request to [`ProxyClient`].
///
/// On shutdown it stops accepting, asks open connections to finish their
/// current request and waits for them. Established tunnels are detached from
/// their HTTP connection and keep running.
pub struct ConnectServer {
    client: Arc<ProxyClient>,
}

impl ConnectServer {
    pub fn new(client: Arc<ProxyClient>) -> Self {
        Self { client }
    }

    /// Serve every connection `incoming` yields until `shutdown` fires.
    ///
    /// Accept errors are logged and retried after a short pause; only the
    /// end of `incoming` or shutdown stop the loop.
    pub async fn serve_incoming<S, IO>(self, incoming: S, shutdown: CancellationToken)
    where
        S: Stream<Item = io::Result<(IO, SocketAddr)>> + Send,
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let connections = TaskTracker::new();
        tokio::pin!(incoming);

        loop {
            let (stream, remote_addr) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = incoming.next() => match accepted {
                    Some(Ok(accepted)) => accepted,
                    Some(Err(e)) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(ACCEPT_BACKOFF) => continue,
                        }
                    }
                    None => break,
                },
            };
            debug!("New connection from {}", remote_addr);

            let client = self.client.clone();
            let shutdown = shutdown.clone();
            connections.spawn(async move {
                let service = service_fn(move |req| client.clone().handle(req, remote_addr));
                let conn = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .with_upgrades();
                tokio::pin!(conn);

                let result = tokio::select! {
                    result = conn.as_mut() => result,
                    _ = shutdown.cancelled() => {
                        conn.as_mut().graceful_shutdown();
                        conn.await
                    }
                };
                if let Err(e) = result {
                    debug!("Connection from {} ended: {:?}", remote_addr, e);
                }
            });
        }

        info!(
            open_connections = connections.len(),
            "waiting for proxy connections to finish"
        );
        connections.close();
        connections.wait().await;
    }
}

#[async_trait]
impl Serve for ConnectServer {
    fn name(&self) -> &'static str {
        "http-connect"
    }

    async fn serve(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), ServiceError> {
        let incoming = futures::stream::unfold(listener, |listener| async move {
            let accepted = listener.accept().await;
            Some((accepted, listener))
        });

        self.serve_incoming(incoming, shutdown).await;
        Ok(())
    }
}
