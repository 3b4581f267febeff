//! gRPC proxy server
//!
//! Each `HTTPProxy.Run` stream is one CONNECT session: the first packet names
//! the target, the server dials it and then tunnels bytes until either side
//! closes.

pub mod server;
pub mod service;
mod session;

pub use server::GrpcServer;
pub use service::{ProxyService, SessionConfig};

use std::time::Duration;

/// Upper bound on dialing a CONNECT target
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
