//! Transport-agnostic packet stream halves
//!
//! Both ends of the `Run` RPC receive a `tonic::Streaming<Packet>` and send
//! into an mpsc channel that backs the outbound message stream. The client
//! channel carries bare `Packet`s, the server channel carries
//! `Result<Packet, Status>` so a session can finish the RPC with a status.

use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, PollSender, WaitForCancellationFutureOwned};
use tonic::Status;

use crate::error::StreamError;
use crate::pb::Packet;

/// Item type of an outbound packet channel
pub trait OutboundItem: Send + 'static {
    fn from_packet(packet: Packet) -> Self;
}

impl OutboundItem for Packet {
    fn from_packet(packet: Packet) -> Self {
        packet
    }
}

impl OutboundItem for Result<Packet, Status> {
    fn from_packet(packet: Packet) -> Self {
        Ok(packet)
    }
}

/// Sending half of a packet stream
pub struct PacketSender<T: OutboundItem = Packet> {
    tx: PollSender<T>,
}

impl<T: OutboundItem> std::fmt::Debug for PacketSender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketSender")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<T: OutboundItem> PacketSender<T> {
    pub fn new(tx: mpsc::Sender<T>) -> Self {
        Self {
            tx: PollSender::new(tx),
        }
    }

    /// Wait for room in the outbound channel.
    ///
    /// Fails with `Closed` once the gRPC layer has dropped the stream.
    pub fn poll_reserve(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), StreamError>> {
        self.tx.poll_reserve(cx).map_err(|_| StreamError::Closed)
    }

    /// Send a packet into a slot obtained from `poll_reserve`
    pub fn send_item(&mut self, packet: Packet) -> Result<(), StreamError> {
        self.tx
            .send_item(T::from_packet(packet))
            .map_err(|_| StreamError::Closed)
    }

    /// End the outbound direction of the stream
    pub fn close(&mut self) {
        self.tx.close();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PacketSender<Result<Packet, Status>> {
    /// Finish the RPC with a failure status
    pub async fn fail(&mut self, status: Status) -> Result<(), StreamError> {
        poll_fn(|cx| self.poll_reserve(cx)).await?;
        self.tx
            .send_item(Err(status))
            .map_err(|_| StreamError::Closed)?;
        self.close();
        Ok(())
    }
}

type InboundStream = Pin<Box<dyn Stream<Item = Result<Packet, Status>> + Send>>;

/// Receiving half of a packet stream, bound to a session cancellation token.
///
/// Once the token fires every pending or future receive returns
/// `StreamError::Cancelled`.
pub struct PacketReceiver {
    inner: InboundStream,
    token: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl std::fmt::Debug for PacketReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketReceiver")
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl PacketReceiver {
    pub fn new<S>(stream: S, token: CancellationToken) -> Self
    where
        S: Stream<Item = Result<Packet, Status>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
            cancelled: Box::pin(token.clone().cancelled_owned()),
            token,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Poll for the next packet; errors are classified and reported here
    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Result<Packet, StreamError>> {
        let result = if self.token.is_cancelled() || self.cancelled.as_mut().poll(cx).is_ready() {
            Err(StreamError::Cancelled)
        } else {
            match ready!(self.inner.as_mut().poll_next(cx)) {
                Some(Ok(packet)) => Ok(packet),
                Some(Err(status)) => Err(StreamError::Status(status)),
                None => Err(StreamError::Closed),
            }
        };

        if let Err(err) = &result {
            err.report("recv");
        }
        Poll::Ready(result)
    }
}

/// Send one packet, logging the failure unless it is an expected end
pub async fn send<T: OutboundItem>(
    sender: &mut PacketSender<T>,
    packet: Packet,
) -> Result<(), StreamError> {
    let result = match poll_fn(|cx| sender.poll_reserve(cx)).await {
        Ok(()) => sender.send_item(packet),
        Err(err) => Err(err),
    };

    if let Err(err) = &result {
        err.report("send");
    }
    result
}

/// Receive one packet, logging the failure unless it is an expected end
pub async fn receive(receiver: &mut PacketReceiver) -> Result<Packet, StreamError> {
    poll_fn(|cx| receiver.poll_recv(cx)).await
}
