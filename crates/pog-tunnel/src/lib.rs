//! Tunnel plumbing shared by the client and server halves
//!
//! - [`StreamReader`] / [`StreamWriter`] turn the packet stream into
//!   `AsyncRead` / `AsyncWrite` byte streams.
//! - [`run_tunnel`] copies bytes both ways between such a stream and a raw
//!   connection until either side finishes.
//! - [`TunnelMetrics`] and [`AccessLog`] are the process-scoped sinks the
//!   sessions report into.

pub mod access_log;
pub mod adapter;
pub mod bridge;
pub mod metrics;

pub use access_log::{AccessLog, LogRecord};
pub use adapter::{StreamReader, StreamWriter};
pub use bridge::{run_tunnel, TunnelStats};
pub use metrics::{ActiveTunnel, MetricsSnapshot, TunnelMetrics};
