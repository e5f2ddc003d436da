use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{error, info, warn, Instrument};

use edge_sentry::config::Config;
use edge_sentry::context::Context;
use edge_sentry::headers::{decision_headers, security_headers};
use edge_sentry::pipeline::Pipeline;

#[derive(Parser)]
#[command(name = "edge-sentry")]
#[command(about = "Multi-stage HTTP security pipeline for edge servers")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the configured content root.
    #[arg(long)]
    root_dir: Option<String>,

    /// Enable verbose (debug) logging.
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(root_dir) = cli.root_dir {
        config.root_dir = root_dir;
    }

    let ctx = Arc::new(Context::build(config)?);
    if ctx.audit.is_degraded() {
        warn!("running with degraded (in-memory only) audit logging — set the configured secret env var to enable the persisted MAC chain");
    }

    let addr = format!("{}:{}", ctx.config.bind_addr, ctx.config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "edge-sentry listening");

    {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                let now_ms = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0);
                let evicted = ctx.registry.sweep(now_ms);
                if evicted > 0 {
                    info!(evicted, "registry sweep evicted idle clients");
                }
            }
        });
    }

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "accept failed");
                continue;
            }
        };
        let ctx = Arc::clone(&ctx);
        let connection_id = uuid::Uuid::new_v4();
        let span = tracing::debug_span!("connection", %connection_id, peer = %peer);
        tokio::spawn(
            async move {
                if let Err(e) = handle_connection(socket, peer.ip().to_string(), &ctx).await {
                    warn!(peer = %peer, error = %e, "connection handling failed");
                }
            }
            .instrument(span),
        );
    }
}

async fn handle_connection(mut socket: tokio::net::TcpStream, identity: String, ctx: &Context) -> Result<()> {
    let mut buf = vec![0u8; 64 * 1024];
    let n = socket.read(&mut buf).await?;
    buf.truncate(n);

    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let pipeline = Pipeline::new(ctx);
    let (verdict, _request) = pipeline.process(&identity, &buf, now_ms);

    let status_line = if verdict.allow { "HTTP/1.1 200 OK\r\n" } else { "HTTP/1.1 403 Forbidden\r\n" };
    let mut response = String::from(status_line);
    for (name, value) in security_headers() {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    for (name, value) in decision_headers(&verdict) {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    response.push_str("Content-Length: 0\r\n\r\n");

    socket.write_all(response.as_bytes()).await?;
    Ok(())
}
