//! path-proxy
//!
//! A path-routing, identity-authorizing HTTP reverse proxy that also
//! tunnels CONNECT to permitted upstream hosts.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌───────────────────────────────────────────────────┐
//!                    │                    PATH PROXY                      │
//!   Client request   │  ┌─────────┐   ┌─────────┐   ┌─────────────────┐   │
//!   ─────────────────┼─▶│   net   │──▶│  http   │──▶│ routing +       │   │
//!                    │  │listener │   │ server  │   │ security        │   │
//!                    │  └─────────┘   └────┬────┘   └────────┬────────┘   │
//!                    │                     │ CONNECT         │ allowed    │
//!                    │                     ▼                 ▼            │
//!                    │               ┌──────────┐     ┌───────────┐       │
//!   Client ◀═════════┼══════════════▶│  tunnel  │     │  forward  │───────┼──▶ Upstream
//!                    │               └──────────┘     └───────────┘       │
//!                    │                                                    │
//!                    │  config · observability (logs, metrics, audit)     │
//!                    │  lifecycle (signals, drain)                        │
//!                    └───────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use path_proxy::config::load_config;
use path_proxy::lifecycle::{signals, Shutdown};
use path_proxy::observability::audit::{FanoutSink, JsonLinesSink, TracingSink};
use path_proxy::observability::{logging, metrics, AuditSink};
use path_proxy::ProxyServer;

#[derive(Debug, Parser)]
#[command(name = "path-proxy", version, about = "Path-based authorizing reverse proxy")]
struct Args {
    /// Configuration file (TOML, or JSON when the extension is .json).
    #[arg(short, long, env = "CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Override the listener port.
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Variables already set in the environment win over .env.
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let mut config = load_config(&args.config)?;
    if let Some(port) = args.port {
        config.listener.set_port(port);
    }

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "path-proxy starting");
    tracing::info!(
        config = %args.config.display(),
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        users = config.all_users.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut audit = FanoutSink::new().with(Arc::new(TracingSink));
    if config.audit.enabled {
        audit = audit.with(Arc::new(JsonLinesSink::spawn(&config.audit.log_dir)?));
        tracing::info!(log_dir = %config.audit.log_dir, "Audit logging enabled");
    }
    let audit: Arc<dyn AuditSink> = Arc::new(audit);

    let server = ProxyServer::new(&config, audit)?;
    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    signals::spawn_handler(shutdown);

    server.run(listener, receiver).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
