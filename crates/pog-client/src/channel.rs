//! gRPC channel to the proxy server

use http::Uri;
use pog_auth::BasicAuthCredentials;
use pog_proto::HttpProxyClient;
use thiserror::Error;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::info;

pub type GrpcClient = HttpProxyClient<InterceptedService<Channel, BasicAuthCredentials>>;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("server address is empty")]
    MissingAddress,

    #[error("invalid server address {address}: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("invalid server host {0:?}")]
    InvalidHost(String),

    #[error("TLS setup failed: {0}")]
    Tls(#[source] tonic::transport::Error),

    #[error("gRPC credentials are not a valid header value")]
    InvalidCredentials,
}

/// Where and how to reach the proxy server
#[derive(Clone, Default)]
pub struct ChannelConfig {
    /// `host:port` of the gRPC server
    pub server_addr: String,
    /// TLS server name and `:authority` override
    pub server_host: Option<String>,
    /// Plain-text HTTP/2 instead of TLS
    pub insecure: bool,
    /// `user:password` sent with every call
    pub grpc_auth: Option<String>,
}

impl std::fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("server_addr", &self.server_addr)
            .field("server_host", &self.server_host)
            .field("insecure", &self.insecure)
            .field("grpc_auth", &self.grpc_auth.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ChannelConfig {
    pub fn endpoint(&self) -> Result<Endpoint, ChannelError> {
        if self.server_addr.is_empty() {
            return Err(ChannelError::MissingAddress);
        }

        let scheme = if self.insecure { "http" } else { "https" };
        let address = format!("{}://{}", scheme, self.server_addr);
        let mut endpoint = Endpoint::from_shared(address.clone())
            .map_err(|source| ChannelError::InvalidAddress { address, source })?;

        if let Some(host) = &self.server_host {
            let origin: Uri = format!("{}://{}", scheme, host)
                .parse()
                .map_err(|_| ChannelError::InvalidHost(host.clone()))?;
            endpoint = endpoint.origin(origin);
        }

        if !self.insecure {
            let mut tls = ClientTlsConfig::new().with_webpki_roots();
            if let Some(host) = &self.server_host {
                tls = tls.domain_name(host.clone());
            }
            endpoint = endpoint.tls_config(tls).map_err(ChannelError::Tls)?;
        }

        Ok(endpoint)
    }

    /// Build a client; the connection is established on first use
    pub fn connect_lazy(&self) -> Result<GrpcClient, ChannelError> {
        let credentials = match &self.grpc_auth {
            Some(user_pass) => BasicAuthCredentials::new(user_pass)
                .map_err(|_| ChannelError::InvalidCredentials)?,
            None => BasicAuthCredentials::none(),
        };

        let channel = self.endpoint()?.connect_lazy();
        info!(
            server_addr = %self.server_addr,
            tls = !self.insecure,
            "grpc channel configured"
        );

        Ok(HttpProxyClient::with_interceptor(channel, credentials))
    }
}
