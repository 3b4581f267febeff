//! Client half of one CONNECT session

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, HOST, PROXY_AUTHENTICATE};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::{Empty, Full};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use pog_auth::{check_proxy_auth, proxy_challenge, CredentialStore, ANONYMOUS, CLIENT_AUTH_PREFIX};
use pog_proto::{
    extract, receive, send, ConnectResponse, Packet, PacketReceiver, PacketSender, STREAM_BUFFER,
};
use pog_tunnel::{run_tunnel, AccessLog, LogRecord, StreamReader, StreamWriter, TunnelMetrics};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::channel::GrpcClient;
use crate::error::SessionError;

pub type ProxyBody = http_body_util::combinators::UnsyncBoxBody<Bytes, Infallible>;

/// Diagnostic header carried by every error response
pub const ERROR_HEADER: HeaderName = HeaderName::from_static("x-proxy-over-grpc-error");

/// Turns CONNECT requests into tunnels over the gRPC channel
pub struct ProxyClient {
    grpc: GrpcClient,
    credentials: Arc<CredentialStore>,
    auth_prefix: String,
    access_log: AccessLog,
    metrics: Arc<TunnelMetrics>,
}

/// Handshake result: both stream halves and the session token
struct OpenTunnel {
    reader: StreamReader,
    writer: StreamWriter,
    token: CancellationToken,
}

impl ProxyClient {
    pub fn new(grpc: GrpcClient, credentials: Arc<CredentialStore>) -> Self {
        Self {
            grpc,
            credentials,
            auth_prefix: CLIENT_AUTH_PREFIX.to_string(),
            access_log: AccessLog::default(),
            metrics: Arc::new(TunnelMetrics::new()),
        }
    }

    /// Env prefix named in the `Proxy-Authenticate` realm
    pub fn with_auth_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.auth_prefix = prefix.into();
        self
    }

    pub fn with_access_log(mut self, access_log: AccessLog) -> Self {
        self.access_log = access_log;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<TunnelMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<TunnelMetrics> {
        &self.metrics
    }

    /// hyper service entry point
    pub async fn handle(
        self: Arc<Self>,
        req: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Result<Response<ProxyBody>, Infallible> {
        if req.method() != Method::CONNECT {
            return Ok(error_response(&SessionError::NotImplemented));
        }

        let connect_addr = target_authority(&req).unwrap_or_default();
        let span = info_span!(
            "session",
            session_id = %Uuid::new_v4(),
            connect_addr = %connect_addr,
            remote_addr = %remote_addr,
        );

        Ok(self
            .connect(req, connect_addr, remote_addr)
            .instrument(span)
            .await)
    }

    async fn connect(
        self: Arc<Self>,
        mut req: Request<Incoming>,
        connect_addr: String,
        remote_addr: SocketAddr,
    ) -> Response<ProxyBody> {
        let log = |user: &str, status: StatusCode| {
            self.access_log.record(&LogRecord::new(
                connect_addr.as_str(),
                user,
                remote_addr.to_string(),
                status.as_u16(),
            ));
        };

        let user = match self.authorize(req.headers()).await {
            Ok(user) => user,
            Err(err) => {
                warn!("proxy authentication failed: {}", err);
                log("-", err.status_code());

                let mut response = error_response(&err);
                if let SessionError::ProxyAuth(_) = err {
                    if let Ok(challenge) =
                        HeaderValue::from_str(&proxy_challenge(&self.auth_prefix))
                    {
                        response.headers_mut().insert(PROXY_AUTHENTICATE, challenge);
                    }
                }
                return response;
            }
        };

        if connect_addr.is_empty() {
            let err = SessionError::MissingTarget;
            log(&user, err.status_code());
            return error_response(&err);
        }

        let tunnel = match self.handshake(&connect_addr).await {
            Ok(tunnel) => tunnel,
            Err(e) => {
                debug!("connect failed: {}", e);
                log(&user, e.status_code());
                return error_response(&e);
            }
        };

        // the 200 goes out first; the raw connection is available after that
        let upgrade = hyper::upgrade::on(&mut req);
        let client = self.clone();
        tokio::spawn(
            async move {
                let upgraded = match upgrade.await {
                    Ok(upgraded) => upgraded,
                    Err(e) => {
                        warn!("connection upgrade failed: {}", e);
                        tunnel.token.cancel();
                        return;
                    }
                };
                client.access_log.record(&LogRecord::new(
                    connect_addr.as_str(),
                    user.as_str(),
                    remote_addr.to_string(),
                    StatusCode::OK.as_u16(),
                ));

                let stats = run_tunnel(
                    tunnel.reader,
                    tunnel.writer,
                    TokioIo::new(upgraded),
                    tunnel.token,
                    &client.metrics,
                )
                .await;
                debug!(
                    bytes_to_server = stats.bytes_to_remote,
                    bytes_to_caller = stats.bytes_to_local,
                    "tunnel closed"
                );
            }
            .in_current_span(),
        );

        Response::new(empty())
    }

    /// Check `Proxy-Authorization` against the CONNECT-level credential list.
    ///
    /// bcrypt verification takes long enough to stall a runtime worker, so
    /// it runs on the blocking pool.
    async fn authorize(&self, headers: &HeaderMap) -> Result<String, SessionError> {
        if self.credentials.is_empty() {
            return Ok(ANONYMOUS.to_string());
        }

        let headers = headers.clone();
        let credentials = self.credentials.clone();
        tokio::task::spawn_blocking(move || check_proxy_auth(&headers, &credentials))
            .await
            .map_err(|e| SessionError::Internal(e.to_string()))?
            .map_err(SessionError::ProxyAuth)
    }

    /// Open a `Run` stream and exchange `ConnectRequest`/`ConnectResponse`
    async fn handshake(&self, connect_addr: &str) -> Result<OpenTunnel, SessionError> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let response = self
            .grpc
            .clone()
            .run(tonic::Request::new(ReceiverStream::new(rx)))
            .await
            .map_err(SessionError::Connect)?;

        let token = CancellationToken::new();
        let mut sender = PacketSender::new(tx);
        let mut receiver = PacketReceiver::new(response.into_inner(), token.clone());

        send(&mut sender, Packet::connect_request(connect_addr)).await?;
        let ConnectResponse { error } = extract(receive(&mut receiver).await?)?;

        if let Some(error) = error {
            return Err(SessionError::Rejected {
                status_code: error.status_code,
                message: error.message,
            });
        }

        Ok(OpenTunnel {
            reader: StreamReader::new(receiver),
            writer: StreamWriter::new(sender),
            token,
        })
    }
}

/// `host:port` a CONNECT request asks for
fn target_authority<B>(req: &Request<B>) -> Option<String> {
    if let Some(authority) = req.uri().authority() {
        return Some(authority.to_string());
    }
    req.headers()
        .get(HOST)
        .and_then(|host| host.to_str().ok())
        .map(str::to_string)
}

fn empty() -> ProxyBody {
    use http_body_util::BodyExt;
    Empty::<Bytes>::new().boxed_unsync()
}

/// Plain-text error response with the message repeated in [`ERROR_HEADER`]
pub fn error_response(err: &SessionError) -> Response<ProxyBody> {
    use http_body_util::BodyExt;

    let message = err.to_string();
    let mut response = Response::new(Full::new(Bytes::from(format!("{}\n", message))).boxed_unsync());
    *response.status_mut() = err.status_code();

    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    if let Ok(value) = HeaderValue::from_str(&header_safe(&message)) {
        headers.insert(ERROR_HEADER, value);
    }

    response
}

/// Header values allow only visible ASCII and spaces
fn header_safe(message: &str) -> String {
    message
        .chars()
        .map(|c| if c == ' ' || c.is_ascii_graphic() { c } else { '?' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    fn client(credentials: CredentialStore) -> ProxyClient {
        let grpc = crate::channel::ChannelConfig {
            server_addr: "127.0.0.1:1".to_string(),
            insecure: true,
            ..Default::default()
        }
        .connect_lazy()
        .unwrap();
        ProxyClient::new(grpc, Arc::new(credentials)).with_access_log(AccessLog::disabled())
    }

    fn proxy_auth(user_pass: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::PROXY_AUTHORIZATION,
            pog_auth::encode_basic(user_pass).parse().unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn test_authorize_open_proxy_is_anonymous() {
        let user = client(CredentialStore::default())
            .authorize(&HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(user, "anonymous");
    }

    #[tokio::test]
    async fn test_authorize_rejects_wrong_password() {
        let item =
            pog_auth::AuthItem::generate_with_cost("eve", "pw", chrono::Duration::days(1), 4)
                .unwrap();
        let client = client(CredentialStore::new(vec![item]));

        let err = client.authorize(&proxy_auth("eve:nope")).await.unwrap_err();
        assert!(matches!(err, SessionError::ProxyAuth(_)));
        assert_eq!(err.status_code(), StatusCode::PROXY_AUTHENTICATION_REQUIRED);
    }

    #[tokio::test]
    async fn test_bcrypt_check_leaves_runtime_responsive() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        let item =
            pog_auth::AuthItem::generate_with_cost("eve", "pw", chrono::Duration::days(1), 10)
                .unwrap();
        let client = client(CredentialStore::new(vec![item]));

        // single-threaded runtime: the ticker only advances if the check
        // does not run on the runtime thread
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = tokio::spawn({
            let ticks = ticks.clone();
            async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        let user = client.authorize(&proxy_auth("eve:pw")).await.unwrap();
        ticker.abort();

        assert_eq!(user, "eve");
        assert!(
            ticks.load(Ordering::SeqCst) >= 3,
            "runtime stalled during bcrypt verification"
        );
    }

    async fn body_text(response: Response<ProxyBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_error_response_shape() {
        let response = error_response(&SessionError::NotImplemented);

        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert_eq!(response.headers()[ERROR_HEADER], "Not implemented");
        assert_eq!(body_text(response).await, "Not implemented\n");
    }

    #[test]
    fn test_error_header_is_sanitized() {
        let err = SessionError::Rejected {
            status_code: 503,
            message: "line one\r\nline two ünïcode".to_string(),
        };
        let response = error_response(&err);

        assert_eq!(
            response.headers()[ERROR_HEADER],
            "line one??line two ?n?code"
        );
    }

    #[test]
    fn test_target_authority() {
        let req = Request::builder()
            .method(Method::CONNECT)
            .uri("example.com:443")
            .body(())
            .unwrap();
        assert_eq!(target_authority(&req).as_deref(), Some("example.com:443"));

        let req = Request::builder()
            .method(Method::CONNECT)
            .uri("/")
            .header(HOST, "fallback.example:8443")
            .body(())
            .unwrap();
        assert_eq!(
            target_authority(&req).as_deref(),
            Some("fallback.example:8443")
        );
    }
}
