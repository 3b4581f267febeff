//! Proxy client: HTTP CONNECT in front, gRPC `Run` streams behind
//!
//! Browsers and other HTTP clients talk to [`ConnectServer`] as a plain HTTP
//! proxy. Every CONNECT request becomes one `Run` stream to the proxy
//! server, which dials the target on the client's behalf.

pub mod channel;
pub mod error;
pub mod handler;
pub mod server;

pub use channel::{ChannelConfig, ChannelError, GrpcClient};
pub use error::SessionError;
pub use handler::ProxyClient;
pub use server::ConnectServer;
