//! Stream error taxonomy and end-of-stream classification

use std::io;

use thiserror::Error;
use tonic::{Code, Status};
use tracing::{error, trace};

/// A packet of the wrong variant arrived for the current protocol stage
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("got wrong packet type: expected {expected}, got {got}")]
pub struct ProtocolViolation {
    pub expected: &'static str,
    pub got: &'static str,
}

impl From<ProtocolViolation> for Status {
    fn from(violation: ProtocolViolation) -> Self {
        Status::failed_precondition(violation.to_string())
    }
}

/// Errors produced while sending or receiving packets
#[derive(Debug, Error)]
pub enum StreamError {
    /// The remote side ended the stream
    #[error("stream closed by peer")]
    Closed,

    /// The local cancellation token fired
    #[error("stream cancelled")]
    Cancelled,

    /// The gRPC layer reported a failure
    #[error("rpc failure: {0}")]
    Status(#[from] Status),

    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
}

impl StreamError {
    /// Whether this error is the normal way for a tunnel to end.
    ///
    /// Both an intentional shutdown (one bridge direction finished and
    /// cancelled the other) and a natural close look like errors at this
    /// layer; only genuine faults should reach the error log.
    pub fn is_expected_end(&self) -> bool {
        match self {
            StreamError::Closed | StreamError::Cancelled => true,
            StreamError::Status(status) => status.code() == Code::Cancelled,
            StreamError::Protocol(_) => false,
        }
    }

    /// gRPC code describing this error, used for access logs and HTTP mapping
    pub fn code(&self) -> Code {
        match self {
            StreamError::Closed => Code::Unknown,
            StreamError::Cancelled => Code::Cancelled,
            StreamError::Status(status) => status.code(),
            StreamError::Protocol(_) => Code::FailedPrecondition,
        }
    }

    /// Log the error unless it is an expected end of stream
    pub fn report(&self, op: &'static str) {
        if self.is_expected_end() {
            trace!(op, error = %self, "stream ended");
        } else {
            error!(op, error = %self, "stream operation failed");
        }
    }

    /// Recover a `StreamError` carried inside an `io::Error`
    pub fn from_io(err: &io::Error) -> Option<&StreamError> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<StreamError>())
    }
}

impl From<StreamError> for Status {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Status(status) => status,
            StreamError::Protocol(violation) => violation.into(),
            StreamError::Cancelled => Status::cancelled("stream cancelled"),
            StreamError::Closed => Status::aborted("stream closed by peer"),
        }
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        let kind = match &err {
            StreamError::Closed => io::ErrorKind::UnexpectedEof,
            StreamError::Cancelled => io::ErrorKind::ConnectionAborted,
            StreamError::Status(status) if status.code() == Code::Cancelled => {
                io::ErrorKind::ConnectionAborted
            }
            StreamError::Status(_) => io::ErrorKind::ConnectionReset,
            StreamError::Protocol(_) => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, err)
    }
}
