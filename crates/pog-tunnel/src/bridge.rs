//! Bidirectional copy between a packet stream and a raw connection
//!
//! Each direction has its own stop action:
//!
//! - connection → stream: when the connection hits EOF (or fails) the
//!   outbound stream is closed and the session token is cancelled, which
//!   unblocks the stream receive of the other direction.
//! - stream → connection: when the stream ends (or fails) the connection's
//!   write half is shut down and its read loop is told to stop, so the
//!   other direction ends as if the connection had closed.
//!
//! [`run_tunnel`] returns only after both directions finished.

use std::io;

use pog_proto::{OutboundItem, StreamError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::adapter::{StreamReader, StreamWriter};
use crate::metrics::TunnelMetrics;

const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// Bytes moved by one tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TunnelStats {
    /// Connection → stream
    pub bytes_to_remote: u64,
    /// Stream → connection
    pub bytes_to_local: u64,
}

/// Run both copy directions until each has finished.
///
/// `cancel` is the session token the `reader` was built with.
pub async fn run_tunnel<C, T>(
    reader: StreamReader,
    writer: StreamWriter<T>,
    conn: C,
    cancel: CancellationToken,
    metrics: &TunnelMetrics,
) -> TunnelStats
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    T: OutboundItem,
{
    let _active = metrics.open();
    let (conn_read, conn_write) = tokio::io::split(conn);
    let conn_closed = CancellationToken::new();

    let to_remote = tokio::spawn({
        let conn_closed = conn_closed.clone();
        async move {
            let (bytes, result) = copy_to_stream(conn_read, writer, conn_closed).await;
            cancel.cancel();
            report("connection -> stream", result);
            bytes
        }
    });

    let to_local = tokio::spawn(async move {
        let (bytes, result) = copy_to_conn(reader, conn_write).await;
        conn_closed.cancel();
        report("stream -> connection", result);
        bytes
    });

    let (to_remote, to_local) = tokio::join!(to_remote, to_local);
    let stats = TunnelStats {
        bytes_to_remote: joined(to_remote),
        bytes_to_local: joined(to_local),
    };
    metrics.record_bytes(stats.bytes_to_remote, stats.bytes_to_local);

    debug!(
        bytes_to_remote = stats.bytes_to_remote,
        bytes_to_local = stats.bytes_to_local,
        "tunnel finished"
    );
    stats
}

async fn copy_to_stream<R, T>(
    mut conn: R,
    mut writer: StreamWriter<T>,
    conn_closed: CancellationToken,
) -> (u64, io::Result<()>)
where
    R: AsyncRead + Unpin,
    T: OutboundItem,
{
    let mut total = 0u64;
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];

    let result = loop {
        let n = tokio::select! {
            _ = conn_closed.cancelled() => break Ok(()),
            read = conn.read(&mut buffer) => match read {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) => break Err(e),
            },
        };

        if let Err(e) = writer.write_all(&buffer[..n]).await {
            break Err(e);
        }
        total += n as u64;
    };

    // remote sees end of input
    let _ = writer.shutdown().await;
    (total, result)
}

async fn copy_to_conn<W>(mut reader: StreamReader, mut conn: W) -> (u64, io::Result<()>)
where
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];

    let result = loop {
        let n = match reader.read(&mut buffer).await {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) => break Err(e),
        };

        if let Err(e) = conn.write_all(&buffer[..n]).await {
            break Err(e);
        }
        total += n as u64;
    };

    let _ = conn.shutdown().await;
    (total, result)
}

fn report(direction: &'static str, result: io::Result<()>) {
    let Err(e) = result else {
        debug!(direction, "copy finished");
        return;
    };

    match StreamError::from_io(&e) {
        // already classified and logged by the packet layer
        Some(err) => debug!(direction, "copy stopped: {}", err),
        None => match e.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => debug!(direction, "connection closed: {}", e),
            _ => warn!(direction, "copy failed: {}", e),
        },
    }
}

fn joined(result: Result<u64, tokio::task::JoinError>) -> u64 {
    result.unwrap_or_else(|e| {
        error!("tunnel copy task failed: {}", e);
        0
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use pog_proto::{Packet, PacketReceiver, PacketSender};
    use std::time::Duration;
    use tokio::io::duplex;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;
    use tonic::Status;

    struct RemoteEnd {
        /// Packets the remote side sends into the tunnel
        tx: mpsc::Sender<Packet>,
        /// Packets the tunnel sends to the remote side
        rx: mpsc::Receiver<Packet>,
    }

    fn tunnel_halves() -> (StreamReader, StreamWriter, CancellationToken, RemoteEnd) {
        let (in_tx, in_rx) = mpsc::channel::<Packet>(8);
        let (out_tx, out_rx) = mpsc::channel::<Packet>(8);
        let cancel = CancellationToken::new();

        let inbound = ReceiverStream::new(in_rx).map(Ok::<Packet, Status>);
        let reader = StreamReader::new(PacketReceiver::new(inbound, cancel.clone()));
        let writer = StreamWriter::new(PacketSender::new(out_tx));

        (
            reader,
            writer,
            cancel,
            RemoteEnd {
                tx: in_tx,
                rx: out_rx,
            },
        )
    }

    #[tokio::test]
    async fn test_copies_both_directions() {
        let (reader, writer, cancel, mut remote) = tunnel_halves();
        let (conn, mut peer) = duplex(1024);
        let metrics = std::sync::Arc::new(TunnelMetrics::new());

        let bridge = tokio::spawn({
            let metrics = metrics.clone();
            async move { run_tunnel(reader, writer, conn, cancel, &metrics).await }
        });

        remote.tx.send(Packet::payload(b"from remote".to_vec())).await.unwrap();
        let mut buf = [0u8; 11];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"from remote");

        peer.write_all(b"from local").await.unwrap();
        let packet = remote.rx.recv().await.unwrap();
        assert_eq!(packet, Packet::payload(b"from local".to_vec()));
        assert_eq!(metrics.active(), 1);

        // local EOF stops the bridge
        drop(peer);
        let stats = tokio::time::timeout(Duration::from_secs(1), bridge)
            .await
            .expect("bridge did not finish after local close")
            .unwrap();

        assert_eq!(stats.bytes_to_remote, 10);
        assert_eq!(stats.bytes_to_local, 11);
        assert_eq!(metrics.active(), 0);
        // the outbound stream ended
        assert!(remote.rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_local_close_cancels_stream_receive() {
        let (reader, writer, cancel, remote) = tunnel_halves();
        let (conn, mut peer) = duplex(1024);
        let metrics = TunnelMetrics::new();

        let watch = cancel.clone();
        peer.shutdown().await.unwrap();
        drop(peer);

        // the remote side never ends its stream; only cancellation unblocks it
        tokio::time::timeout(
            Duration::from_secs(1),
            run_tunnel(reader, writer, conn, cancel, &metrics),
        )
        .await
        .expect("bridge stayed blocked on stream receive");

        assert!(watch.is_cancelled());
        drop(remote);
    }

    #[tokio::test]
    async fn test_remote_close_ends_connection() {
        let (reader, writer, cancel, mut remote) = tunnel_halves();
        let (conn, mut peer) = duplex(1024);
        let metrics = std::sync::Arc::new(TunnelMetrics::new());

        let bridge = tokio::spawn({
            let metrics = metrics.clone();
            async move { run_tunnel(reader, writer, conn, cancel, &metrics).await }
        });

        remote.tx.send(Packet::payload(b"bye".to_vec())).await.unwrap();
        drop(remote.tx);

        let mut received = Vec::new();
        peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"bye");

        let stats = tokio::time::timeout(Duration::from_secs(1), bridge)
            .await
            .expect("bridge did not finish after remote close")
            .unwrap();
        assert_eq!(stats.bytes_to_local, 3);
        assert!(remote.rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_protocol_violation_ends_tunnel() {
        let (reader, writer, cancel, mut remote) = tunnel_halves();
        let (conn, _peer) = duplex(1024);
        let metrics = TunnelMetrics::new();

        remote
            .tx
            .send(Packet::connect_request("example.com:443"))
            .await
            .unwrap();

        let stats = tokio::time::timeout(
            Duration::from_secs(1),
            run_tunnel(reader, writer, conn, cancel, &metrics),
        )
        .await
        .expect("bridge did not stop on a protocol violation");
        assert_eq!(stats, TunnelStats::default());
        assert!(remote.rx.recv().await.is_none());
    }
}
