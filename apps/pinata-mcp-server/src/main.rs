use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use pinata_api::{
    DEFAULT_API_BASE_URL, DEFAULT_UPLOADS_BASE_URL, PinataClient, PinataClientOptions,
};
use pinata_mcp::{McpHandler, McpServerConfig};
use pinata_mcp_server::{
    ApiKeyGate, HttpOptions, HttpState, PinataTools, SessionRouter, SessionStore,
};
use pinata_otel::TracingInitOptions;
use tokio::sync::watch;
use tracing::{info, warn};

const SERVER_NAME: &str = "pinata-mcp-server";

#[derive(Debug, Parser)]
#[command(
    name = "pinata-mcp-server",
    version,
    about = "MCP server for the Pinata pinning API"
)]
struct Args {
    /// Upstream API credential. Tool calls fail without it; routing still works.
    #[arg(long, env = "PINATA_JWT", hide_env_values = true)]
    pinata_jwt: Option<String>,

    /// Dedicated gateway domain, e.g. `example.mypinata.cloud`.
    #[arg(long, env = "PINATA_GATEWAY_URL")]
    gateway_domain: Option<String>,

    #[arg(long, env = "PINATA_API_BASE_URL", default_value = DEFAULT_API_BASE_URL)]
    api_base_url: url::Url,

    #[arg(long, env = "PINATA_UPLOADS_BASE_URL", default_value = DEFAULT_UPLOADS_BASE_URL)]
    uploads_base_url: url::Url,

    #[arg(long, env = "PINATA_UPSTREAM_TIMEOUT_SECS", default_value_t = 30)]
    upstream_timeout_secs: u64,

    /// Comma-separated API keys accepted on the HTTP transport. Empty disables auth.
    #[arg(long, env = "PINATA_MCP_API_KEYS", default_value = "", hide_env_values = true)]
    api_keys: String,

    /// Listen on HTTP using the MCP streamable HTTP transport.
    #[arg(long, env = "PINATA_MCP_HTTP_ADDR")]
    http_addr: Option<SocketAddr>,

    /// HTTP path for the MCP endpoint.
    #[arg(long, env = "PINATA_MCP_HTTP_PATH", default_value = "/")]
    http_path: String,

    /// Disable stdio transport (use HTTP only).
    #[arg(long, env = "PINATA_MCP_NO_STDIO", default_value_t = false)]
    no_stdio: bool,

    /// Close HTTP sessions with no activity for this many seconds.
    #[arg(long, env = "PINATA_MCP_SESSION_IDLE_TIMEOUT_SECS")]
    session_idle_timeout_secs: Option<u64>,

    /// Text returned to clients as `instructions` in the initialize result.
    #[arg(long, env = "PINATA_MCP_INSTRUCTIONS")]
    instructions: Option<String>,

    /// Extra browser origins allowed besides loopback (comma-separated).
    #[arg(long, env = "PINATA_MCP_ALLOW_ORIGIN", value_delimiter = ',')]
    allow_origin: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    pinata_otel::init_tracing(TracingInitOptions {
        service_name: SERVER_NAME,
        service_version: env!("CARGO_PKG_VERSION"),
        default_env_filter: "info",
        // stdout carries protocol frames when stdio is on.
        log_to_stderr: !args.no_stdio,
    })?;

    if args.no_stdio && args.http_addr.is_none() {
        anyhow::bail!("nothing to serve: stdio is disabled and no --http-addr was given");
    }

    let mut opts = PinataClientOptions::new(args.pinata_jwt.clone())?;
    opts.api_base_url = args.api_base_url.clone();
    opts.uploads_base_url = args.uploads_base_url.clone();
    opts.timeout = Duration::from_secs(args.upstream_timeout_secs);
    if let Some(gw) = args.gateway_domain.as_deref() {
        opts = opts.with_gateway(gw).context("parse gateway domain")?;
    }
    let client = PinataClient::new(opts).context("build upstream client")?;
    if !client.has_credential() {
        warn!("PINATA_JWT is not set; tool calls will fail until it is configured");
    }

    let handler: Arc<dyn McpHandler> = Arc::new(PinataTools::new(client)?);
    let mut cfg = McpServerConfig::default_for_binary(SERVER_NAME, env!("CARGO_PKG_VERSION"));
    if let Some(text) = args.instructions.clone() {
        cfg = cfg.with_instructions(text);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = if let Some(addr) = args.http_addr {
        let router = SessionRouter::new(SessionStore::new(), cfg.clone(), handler.clone());
        let gate = ApiKeyGate::from_csv(&args.api_keys);
        if !gate.is_enabled() {
            warn!("no API keys configured; HTTP transport is unauthenticated");
        }
        let state = HttpState {
            router: router.clone(),
            gate,
            opts: Arc::new(HttpOptions {
                path: args.http_path.clone(),
                allowed_origins: args.allow_origin.clone(),
            }),
        };

        let sweeper = args
            .session_idle_timeout_secs
            .map(|secs| spawn_idle_sweeper(router.clone(), Duration::from_secs(secs)));

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {addr}"))?;
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            let res = pinata_mcp_server::serve(listener, state, wait_for(rx)).await;
            if let Some(s) = sweeper {
                s.abort();
            }
            let closed = router.close_all().await;
            info!(closed, "closed remaining sessions");
            res
        }))
    } else {
        None
    };

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    if !args.no_stdio {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        tokio::select! {
            res = pinata_mcp_server::stdio::run_stdio(cfg, handler, stdin, tokio::io::stdout()) => res?,
            _ = wait_for(shutdown_rx.clone()) => {}
        }
    }

    if let Some(t) = http_task {
        t.await.context("http task join")??;
    }

    Ok(())
}

async fn wait_for(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

fn spawn_idle_sweeper(router: SessionRouter, max_idle: Duration) -> tokio::task::JoinHandle<()> {
    let period = (max_idle / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        loop {
            tick.tick().await;
            let closed = router.close_idle(max_idle).await;
            if closed > 0 {
                info!(closed, "closed idle sessions");
            }
        }
    })
}
