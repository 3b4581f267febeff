//! pog - HTTP CONNECT proxy over a gRPC stream
//!
//! `pog server` terminates `HTTPProxy.Run` streams and dials targets,
//! `pog client` is the local HTTP proxy that browsers point at.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pog_auth::{AuthItem, CredentialStore, CLIENT_AUTH_PREFIX, SERVER_AUTH_PREFIX};
use pog_client::{ChannelConfig, ConnectServer, ProxyClient};
use pog_server::{GrpcServer, ProxyService, SessionConfig, CONNECT_TIMEOUT};
use pog_tunnel::{AccessLog, TunnelMetrics};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const VERSION: &str = concat!(env!("GIT_TAG"), " (", env!("GIT_HASH"), ", built ", env!("BUILD_TIME"), ")");

/// Proxy over gRPC - tunnel HTTP CONNECT through a gRPC bidi stream
#[derive(Parser, Debug)]
#[command(name = "pog")]
#[command(version = VERSION)]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Do not write access log records
    #[arg(long, global = true, env = "DISABLE_ACCESS_LOGGING")]
    disable_access_logging: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve HTTPProxy.Run streams and dial CONNECT targets
    #[command(long_about = r#"
Serve the HTTPProxy gRPC service. Every Run stream is one CONNECT tunnel.

ENVIRONMENT VARIABLES:
  PORT             Listen port (binds 0.0.0.0)
  POG_AUTH_*       One JSON auth item each, e.g.
                   {"name":"alice","hash":"$2b$12$...","exp_date":"2025-01-01T00:00:00Z"}
                   No items means the gRPC channel is unauthenticated.
    "#)]
    Server {
        #[arg(long, env = "PORT", default_value = "8080")]
        port: u16,

        /// Env prefix of the gRPC channel credential list
        #[arg(long, default_value = SERVER_AUTH_PREFIX)]
        auth_prefix: String,
    },

    /// Run the local HTTP CONNECT proxy
    #[command(long_about = r#"
Accept HTTP CONNECT requests and tunnel them through the gRPC server.

ENVIRONMENT VARIABLES:
  LISTEN_ADDR      HTTP proxy listen address
  SERVER_ADDR      gRPC server host:port
  SERVER_HOST      TLS server name / :authority override
  INSECURE         Use plain-text HTTP/2
  GRPC_AUTH        user:password for the gRPC channel
  CLIENT_AUTH_*    Auth items required from proxy users
    "#)]
    Client {
        #[arg(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:8118")]
        listen_addr: SocketAddr,

        #[arg(long, env = "SERVER_ADDR")]
        server_addr: String,

        #[arg(long, env = "SERVER_HOST")]
        server_host: Option<String>,

        #[arg(long, env = "INSECURE")]
        insecure: bool,

        #[arg(long, env = "GRPC_AUTH", hide_env_values = true)]
        grpc_auth: Option<String>,

        /// Env prefix of the proxy-level credential list
        #[arg(long, default_value = CLIENT_AUTH_PREFIX)]
        auth_prefix: String,
    },

    /// Print a JSON auth item for a POG_AUTH_* / CLIENT_AUTH_* variable
    GenAuthItem {
        #[arg(long)]
        name: String,

        #[arg(long)]
        password: String,

        /// Days until the account expires
        #[arg(long, default_value = "180")]
        ttl_days: i64,
    },
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .context("Invalid log filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();

    Ok(())
}

fn load_credentials(prefix: &str) -> Result<Arc<CredentialStore>> {
    let store = CredentialStore::from_env(prefix)
        .with_context(|| format!("Failed to load {}* auth items", prefix))?;

    if store.is_empty() {
        warn!("No {}* auth items configured, access is open", prefix);
    } else {
        info!("Loaded {} {}* auth items", store.len(), prefix);
    }
    Ok(Arc::new(store))
}

fn log_metrics(metrics: &TunnelMetrics) {
    let snapshot = metrics.snapshot();
    info!(
        active = snapshot.active,
        total = snapshot.total,
        bytes_to_remote = snapshot.bytes_to_remote,
        bytes_to_local = snapshot.bytes_to_local,
        "tunnel totals"
    );
}

fn gen_auth_item(name: &str, password: &str, ttl_days: i64) -> Result<AuthItem> {
    let ttl = chrono::Duration::try_days(ttl_days)
        .with_context(|| format!("--ttl-days {} is out of range", ttl_days))?;
    AuthItem::generate(name, password, ttl)
        .with_context(|| format!("Failed to generate auth item for {}", name))
}

async fn run_server(port: u16, auth_prefix: &str, access_log: AccessLog) -> Result<bool> {
    let credentials = load_credentials(auth_prefix)?;

    info!("proxy-over-grpc server: starting on port {}", port);
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind to port {}", port))?;

    let metrics = Arc::new(TunnelMetrics::new());
    let service = ProxyService::new(SessionConfig {
        connect_timeout: CONNECT_TIMEOUT,
        access_log,
        metrics: metrics.clone(),
    });

    let handle = pog_lifecycle::start(GrpcServer::new(service, credentials), listener);
    Ok(pog_lifecycle::run_until_signal(handle, || log_metrics(&metrics)).await)
}

async fn run_client(
    listen_addr: SocketAddr,
    channel: ChannelConfig,
    auth_prefix: &str,
    access_log: AccessLog,
) -> Result<bool> {
    let credentials = load_credentials(auth_prefix)?;
    let grpc = channel
        .connect_lazy()
        .context("Failed to configure gRPC channel")?;

    let metrics = Arc::new(TunnelMetrics::new());
    let client = ProxyClient::new(grpc, credentials)
        .with_auth_prefix(auth_prefix)
        .with_access_log(access_log)
        .with_metrics(metrics.clone());

    info!("proxy-over-grpc client: listening on {}", listen_addr);
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", listen_addr))?;

    let handle = pog_lifecycle::start(ConnectServer::new(Arc::new(client)), listener);
    Ok(pog_lifecycle::run_until_signal(handle, || log_metrics(&metrics)).await)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let access_log = AccessLog::new(!cli.disable_access_logging);

    let ok = match cli.command {
        Commands::Server { port, auth_prefix } => {
            run_server(port, &auth_prefix, access_log).await?
        }
        Commands::Client {
            listen_addr,
            server_addr,
            server_host,
            insecure,
            grpc_auth,
            auth_prefix,
        } => {
            if insecure {
                warn!("TLS disabled for the gRPC channel (insecure mode)");
            }
            let channel = ChannelConfig {
                server_addr,
                server_host,
                insecure,
                grpc_auth,
            };
            run_client(listen_addr, channel, &auth_prefix, access_log).await?
        }
        Commands::GenAuthItem {
            name,
            password,
            ttl_days,
        } => {
            let item = gen_auth_item(&name, &password, ttl_days)?;
            println!("{}", serde_json::to_string(&item)?);
            true
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
