//! `HTTPProxy` service implementation

use std::sync::Arc;
use std::time::Duration;

use pog_auth::{AuthenticatedUser, ANONYMOUS};
use pog_proto::{HttpProxy, Packet, PacketSender, STREAM_BUFFER};
use pog_tunnel::{AccessLog, TunnelMetrics};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::session::run_session;
use crate::CONNECT_TIMEOUT;

/// Settings shared by every session of one server
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    pub access_log: AccessLog,
    pub metrics: Arc<TunnelMetrics>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            access_log: AccessLog::default(),
            metrics: Arc::new(TunnelMetrics::new()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProxyService {
    config: SessionConfig,
}

impl ProxyService {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    pub fn metrics(&self) -> &Arc<TunnelMetrics> {
        &self.config.metrics
    }
}

#[tonic::async_trait]
impl HttpProxy for ProxyService {
    type RunStream = ReceiverStream<Result<Packet, Status>>;

    async fn run(
        &self,
        request: Request<Streaming<Packet>>,
    ) -> Result<Response<Self::RunStream>, Status> {
        let user = request
            .extensions()
            .get::<AuthenticatedUser>()
            .map(|user| user.0.clone())
            .unwrap_or_else(|| ANONYMOUS.to_string());
        let remote_addr = request
            .remote_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "-".to_string());

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let span = info_span!(
            "session",
            session_id = %Uuid::new_v4(),
            user = %user,
            remote_addr = %remote_addr,
        );

        tokio::spawn(
            run_session(
                request.into_inner(),
                PacketSender::new(tx),
                user,
                remote_addr,
                self.config.clone(),
            )
            .instrument(span),
        );

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
