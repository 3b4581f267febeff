//! Byte-stream view of a packet stream
//!
//! Every non-empty write becomes one `Payload` packet. Reads drain an
//! internal buffer and pull the next `Payload` when it runs dry.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use pog_proto::{extract, OutboundItem, Packet, PacketReceiver, PacketSender, Payload, StreamError};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::warn;

/// Reads tunnel bytes out of incoming `Payload` packets
#[derive(Debug)]
pub struct StreamReader {
    receiver: PacketReceiver,
    buf: Bytes,
}

impl StreamReader {
    pub fn new(receiver: PacketReceiver) -> Self {
        Self {
            receiver,
            buf: Bytes::new(),
        }
    }

    pub fn into_inner(self) -> PacketReceiver {
        self.receiver
    }
}

impl AsyncRead for StreamReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if !this.buf.is_empty() {
                let n = this.buf.len().min(out.remaining());
                out.put_slice(&this.buf.split_to(n));
                return Poll::Ready(Ok(()));
            }

            let packet = match ready!(this.receiver.poll_recv(cx)) {
                Ok(packet) => packet,
                // remote end of input is a regular EOF for readers
                Err(StreamError::Closed) => return Poll::Ready(Ok(())),
                Err(err) => return Poll::Ready(Err(err.into())),
            };

            match extract::<Payload>(packet) {
                Ok(Payload(data)) if data.is_empty() => {
                    warn!("got empty payload packet");
                }
                Ok(Payload(data)) => this.buf = data,
                Err(violation) => return Poll::Ready(Err(StreamError::from(violation).into())),
            }
        }
    }
}

/// Writes tunnel bytes as outgoing `Payload` packets
#[derive(Debug)]
pub struct StreamWriter<T: OutboundItem = Packet> {
    sender: PacketSender<T>,
}

impl<T: OutboundItem> StreamWriter<T> {
    pub fn new(sender: PacketSender<T>) -> Self {
        Self { sender }
    }

    pub fn into_inner(self) -> PacketSender<T> {
        self.sender
    }
}

impl<T: OutboundItem> AsyncWrite for StreamWriter<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        // an empty payload would be indistinguishable from "no data yet"
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let this = self.get_mut();
        let sent = ready!(this.sender.poll_reserve(cx))
            .and_then(|()| this.sender.send_item(Packet::payload(buf)));

        Poll::Ready(match sent {
            Ok(()) => Ok(buf.len()),
            Err(err) => {
                err.report("send");
                Err(err.into())
            }
        })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().sender.close();
        Poll::Ready(Ok(()))
    }
}
