//! Proxy-over-gRPC protocol definitions
//!
//! This crate defines the packet schema exchanged on the `HTTPProxy.Run`
//! stream and the primitives both sides use to talk over it.
//!
//! # Session shape
//!
//! ```text
//! client                                   server
//!   │ ── ConnectRequest{host_port} ─────────▶ │
//!   │ ◀──────── ConnectResponse{error?} ───── │
//!   │ ◀═══════════ Payload ... ══════════════▶ │
//! ```
//!
//! The first packet from the client is always a `ConnectRequest`, the first
//! reply is exactly one `ConnectResponse`, and everything after that is
//! `Payload` until the stream ends.

pub mod error;
pub mod packet;
pub mod stream;

/// Generated protobuf/gRPC code from `proto/grpcproxy/v1/proxy.proto`.
pub mod pb {
    tonic::include_proto!("grpcproxy.v1");
}

pub use error::{ProtocolViolation, StreamError};
pub use packet::{extract, PacketVariant, Payload};
pub use pb::http_proxy_client::HttpProxyClient;
pub use pb::http_proxy_server::{HttpProxy, HttpProxyServer};
pub use pb::{ConnectRequest, ConnectResponse, HttpError, Packet};
pub use stream::{receive, send, OutboundItem, PacketReceiver, PacketSender};

/// Number of packets buffered between a session and the gRPC layer
pub const STREAM_BUFFER: usize = 32;
