//! Client session failures and their HTTP mapping

use http::StatusCode;
use pog_auth::AuthError;
use pog_proto::{ProtocolViolation, StreamError};
use thiserror::Error;
use tonic::{Code, Status};

/// Why a CONNECT request did not become a tunnel
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Not implemented")]
    NotImplemented,

    #[error("CONNECT request has no target authority")]
    MissingTarget,

    #[error("Proxy-Authorization: {0}")]
    ProxyAuth(#[source] AuthError),

    /// The credential check could not run to completion
    #[error("internal error: {0}")]
    Internal(String),

    /// The `Run` stream could not be opened
    #[error("grpc connection failed: {}", describe_status(.0))]
    Connect(Status),

    /// The stream failed during the handshake
    #[error("grpc i/o failure: {}", describe_stream(.0))]
    Stream(StreamError),

    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    /// The server answered with an `HTTPError`
    #[error("{message}")]
    Rejected { status_code: i32, message: String },
}

impl SessionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SessionError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            SessionError::MissingTarget => StatusCode::BAD_REQUEST,
            SessionError::ProxyAuth(_) => StatusCode::PROXY_AUTHENTICATION_REQUIRED,
            SessionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SessionError::Connect(status) => rpc_code_status(status.code()),
            SessionError::Stream(err) => rpc_code_status(err.code()),
            SessionError::Protocol(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SessionError::Rejected { status_code, .. } => u16::try_from(*status_code)
                .ok()
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or(StatusCode::BAD_GATEWAY),
        }
    }
}

impl From<StreamError> for SessionError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Protocol(violation) => SessionError::Protocol(violation),
            other => SessionError::Stream(other),
        }
    }
}

/// Upstream unavailability and rejected RPC credentials are both the
/// proxy's fault from the HTTP caller's point of view
fn rpc_code_status(code: Code) -> StatusCode {
    match code {
        Code::Unavailable | Code::Unauthenticated => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn describe_status(status: &Status) -> String {
    if status.message().is_empty() {
        format!("{:?}", status.code())
    } else {
        format!("{:?}: {}", status.code(), status.message())
    }
}

fn describe_stream(err: &StreamError) -> String {
    match err {
        StreamError::Status(status) => describe_status(status),
        other => other.to_string(),
    }
}
