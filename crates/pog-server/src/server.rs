//! gRPC server assembly and its lifecycle binding

use std::sync::Arc;

use async_trait::async_trait;
use pog_auth::{AuthInterceptor, CredentialStore};
use pog_lifecycle::{Serve, ServiceError};
use pog_proto::HttpProxyServer;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Router;
use tonic::transport::Server;
use tracing::info;

use crate::service::ProxyService;

/// `HTTPProxy` service behind the RPC-channel auth interceptor
pub struct GrpcServer {
    service: ProxyService,
    auth: AuthInterceptor,
}

impl GrpcServer {
    pub fn new(service: ProxyService, credentials: Arc<CredentialStore>) -> Self {
        Self {
            service,
            auth: AuthInterceptor::new(credentials),
        }
    }

    pub fn router(&self) -> Router {
        Server::builder().add_service(HttpProxyServer::with_interceptor(
            self.service.clone(),
            self.auth.clone(),
        ))
    }
}

#[async_trait]
impl Serve for GrpcServer {
    fn name(&self) -> &'static str {
        "grpc"
    }

    async fn serve(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), ServiceError> {
        let incoming = TcpListenerStream::new(listener);

        self.router()
            .serve_with_incoming_shutdown(incoming, shutdown.cancelled_owned())
            .await
            .map_err(|e| ServiceError::failed("grpc server", e))?;

        info!("grpc server drained");
        Ok(())
    }
}
