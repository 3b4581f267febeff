//! Server half of one CONNECT session

use std::io;

use pog_proto::{
    extract, receive, send, ConnectRequest, HttpError, Packet, PacketReceiver, PacketSender,
};
use pog_tunnel::{run_tunnel, LogRecord, StreamReader, StreamWriter};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Status, Streaming};
use tracing::{debug, info, warn};

use crate::service::SessionConfig;

type ResponseSender = PacketSender<Result<Packet, Status>>;

pub(crate) async fn run_session(
    inbound: Streaming<Packet>,
    mut sender: ResponseSender,
    user: String,
    remote_addr: String,
    config: SessionConfig,
) {
    let token = CancellationToken::new();
    let mut receiver = PacketReceiver::new(inbound, token.clone());

    let log = |connect_addr: &str, code: Code| {
        config.access_log.record(&LogRecord::new(
            connect_addr,
            user.as_str(),
            remote_addr.as_str(),
            format!("{:?}", code),
        ));
    };

    let request = match receive(&mut receiver).await {
        Ok(packet) => packet,
        Err(e) => {
            log("-", e.code());
            bail_out(&mut sender, e.into()).await;
            return;
        }
    };

    let ConnectRequest { host_port } = match extract::<ConnectRequest>(request) {
        Ok(req) => req,
        Err(violation) => {
            log("-", Code::FailedPrecondition);
            bail_out(&mut sender, violation.into()).await;
            return;
        }
    };
    debug!(connect_addr = %host_port, "dialing target");

    let target = match dial(&host_port, &config).await {
        Ok(target) => target,
        Err(e) => {
            let message = e.to_string();
            warn!(connect_addr = %host_port, "dial failed: {}", message);

            log(&host_port, Code::Unavailable);

            let response = Packet::connect_response(Some(HttpError::new(503, message.as_str())));
            if send(&mut sender, response).await.is_ok() {
                bail_out(&mut sender, Status::unavailable(message)).await;
            }
            return;
        }
    };

    if let Err(e) = send(&mut sender, Packet::connect_response(None)).await {
        log(&host_port, e.code());
        return;
    }
    log(&host_port, Code::Ok);

    let stats = run_tunnel(
        StreamReader::new(receiver),
        StreamWriter::new(sender),
        target,
        token,
        &config.metrics,
    )
    .await;

    info!(
        connect_addr = %host_port,
        bytes_to_target = stats.bytes_to_local,
        bytes_from_target = stats.bytes_to_remote,
        "session finished"
    );
}

async fn dial(host_port: &str, config: &SessionConfig) -> io::Result<TcpStream> {
    match tokio::time::timeout(config.connect_timeout, TcpStream::connect(host_port)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("dial tcp {}: i/o timeout", host_port),
        )),
    }
}

/// End the RPC with `status`; the peer may already be gone
async fn bail_out(sender: &mut ResponseSender, status: Status) {
    if let Err(e) = sender.fail(status).await {
        debug!("could not deliver final status: {}", e);
    }
}
