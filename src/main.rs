//! mux-server
//!
//! A multi-client TCP server that multiplexes its listener and every accepted
//! connection over one readiness loop running on a background thread.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌───────────────────────────────────────────────────┐
//!                    │                     MUX SERVER                     │
//!                    │                                                   │
//!   TCP clients      │  ┌──────────┐   ┌──────────────┐   ┌───────────┐  │
//!  ──────────────────┼─▶│ listener │──▶│ ConnectionSet│──▶│ readiness │  │
//!                    │  └──────────┘   └──────┬───────┘   │   wait    │  │
//!                    │                        │           └─────┬─────┘  │
//!                    │                        ▼                 │        │
//!                    │                 ┌──────────────┐         │        │
//!                    │                 │  event loop  │◀────────┘        │
//!                    │                 │accept / read │                  │
//!                    │                 └──────┬───────┘                  │
//!                    │                        ▼                          │
//!                    │                 ┌──────────────┐                  │
//!                    │                 │ProcessingHook│                  │
//!                    │                 └──────────────┘                  │
//!   UDP datagrams    │  ┌──────────┐                                     │
//!  ──────────────────┼─▶│ udp loop │──▶ ProcessingHook                   │
//!                    │  └──────────┘                                     │
//!                    └───────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use mux_server::config::{load_config, validate_config, ConfigError, ServerConfig};
use mux_server::lifecycle::signals::shutdown_signal;
use mux_server::observability::{logging, metrics};
use mux_server::server::{display_name, LoggingHook, ProcessingHook, TcpServer, UdpServer};

#[derive(Parser)]
#[command(name = "mux-server")]
#[command(about = "Multi-client TCP server over a single readiness loop", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP port (overrides listener.port).
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind host (overrides listener.host).
    #[arg(long)]
    host: Option<String>,

    /// Start the UDP server on this port.
    #[arg(long)]
    udp_port: Option<u16>,

    /// Log level (overrides observability.log_level).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(host) = &self.host {
            config.listener.host = Some(host.clone());
        }
        if let Some(port) = self.udp_port {
            config.udp.enabled = true;
            config.udp.port = port;
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    cli.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    if let Err(e) = logging::init(&config.observability) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    tracing::info!("mux-server v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        port = config.listener.port,
        host = config.listener.host.as_deref().unwrap_or("*"),
        udp_enabled = config.udp.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let hook: Arc<dyn ProcessingHook> = Arc::new(LoggingHook);
    let name = display_name(&config.identity);

    let tcp = TcpServer::new(config.listener.clone(), Arc::clone(&hook)).with_display_name(name);
    tcp.start()?;

    let udp = if config.udp.enabled {
        let udp = UdpServer::new(config.udp.clone(), Arc::clone(&hook));
        if let Err(e) = udp.start() {
            tcp.stop();
            return Err(e.into());
        }
        Some(udp)
    } else {
        None
    };

    shutdown_signal().await;

    // stop() joins the loop threads; keep that off the async workers.
    tokio::task::spawn_blocking(move || {
        if let Some(udp) = udp {
            udp.stop();
        }
        tcp.stop();
    })
    .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
