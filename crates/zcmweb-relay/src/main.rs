//! ZCM Web relay server
//!
//! Serves browser clients over WebSocket on top of a single ZCM transport.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use zcmweb_core::types::SchemaSet;
use zcmweb_core::{RelayConfig, TypeRegistry, config};

use zcmweb_relay::server::{self, AppState};
use zcmweb_relay::{bridge, relay};

#[derive(Parser, Debug)]
#[command(name = "zcmweb-relay")]
#[command(version, about = "ZCM Web relay - ZCM transport to WebSocket clients")]
struct Args {
    /// Config file, merged over the global settings file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Transport URL.
    #[arg(long)]
    url: Option<String>,

    /// JSON schema descriptor set.
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Transport receive queue size applied at startup.
    #[arg(long)]
    queue_size: Option<u32>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,

    /// OTLP collector endpoint for traces and metrics.
    #[cfg(feature = "metrics")]
    #[arg(long, env = "ZCMWEB_METRICS_ENDPOINT")]
    metrics_endpoint: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut RelayConfig) {
        if let Some(addr) = self.addr {
            config.server.listen_addr = addr;
        }
        if let Some(url) = &self.url {
            config.transport.url.clone_from(url);
        }
        if let Some(schema) = &self.schema {
            config.schema.path = Some(schema.clone());
        }
        if self.queue_size.is_some() {
            config.transport.queue_size = self.queue_size;
        }
    }
}

fn load_registry(config: &RelayConfig) -> anyhow::Result<TypeRegistry> {
    let Some(path) = &config.schema.path else {
        warn!("No schema configured; wildcard subscribers will see nothing");
        return Ok(TypeRegistry::empty());
    };
    let schema = SchemaSet::load(path)?;
    let registry = TypeRegistry::from_schema(&schema)
        .with_context(|| format!("Invalid schema {}", path.display()))?;
    info!(path = %path.display(), types = registry.len(), "Loaded schema");
    Ok(registry)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = config::load_config(args.config.as_deref())?;
    args.apply(&mut config);

    let default_filter = format!(
        "zcmweb_relay={level},zcmweb_core={level}",
        level = config.log_level
    );
    #[cfg(feature = "metrics")]
    let metrics_guard = zcmweb_core::tracing_init::init_tracing_with_metrics(
        &default_filter,
        args.log_json,
        args.metrics_endpoint.as_deref(),
    );
    #[cfg(not(feature = "metrics"))]
    zcmweb_core::tracing_init::init_tracing(&default_filter, args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.listen_addr,
        url = %config.transport.url,
        "Starting zcmweb-relay"
    );

    let registry = Arc::new(load_registry(&config)?);
    let transport = bridge::connect(&config.transport.url)
        .with_context(|| format!("Unsupported transport URL '{}'", config.transport.url))?;
    let relay = relay::spawn(transport, registry);

    if let Some(size) = config.transport.queue_size {
        relay.set_queue_size(size).await?;
        info!(size, "Applied transport queue size");
    }

    let state = AppState::new(relay.clone(), config.server.outbound_capacity);
    let listener = tokio::net::TcpListener::bind(config.server.listen_addr).await?;
    server::serve(listener, state, &config.server.ws_path, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
    })
    .await?;

    relay.stop().await?;

    #[cfg(feature = "metrics")]
    if let Some(guard) = metrics_guard
        && let Err(e) = guard.shutdown()
    {
        warn!(error = %e, "Failed to flush metrics");
    }

    info!("Relay stopped");
    Ok(())
}
