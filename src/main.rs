//! Nursery gateway.
//!
//! Fronts the nursery management API with the request pipeline:
//!
//! ```text
//!     Client Request
//!     ──────────────▶ security headers ─▶ rate limiter ─▶ error translator ─▶ upstream API
//!                                          (SMS auth                               │
//!                                           endpoints)                             │
//!     Client Response                                                              │
//!     ◀────────────── headers added ◀──── 429 / pass ◀─── JSON envelope ◀──────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use nursery_gateway::config::{load_config, GatewayConfig};
use nursery_gateway::observability::{logging, metrics};
use nursery_gateway::{HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "nursery-gateway")]
#[command(about = "Request pipeline in front of the nursery management API", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file; defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!("nursery-gateway v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        rate_limit_enabled = config.rate_limit.enabled,
        max_requests = config.rate_limit.max_requests,
        window_secs = config.rate_limit.window_secs,
        upstream = config.upstream.enabled.then_some(config.upstream.address.as_str()),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();

    let server = HttpServer::new(config)?;
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
