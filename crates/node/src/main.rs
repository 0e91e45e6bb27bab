//! weathervane-node: entry point for the aggregation server.
//!
//! Parses the CLI, loads configuration, recovers persisted records, then
//! runs the acceptor and the expiry sweep until killed.

use clap::Parser;
use std::path::PathBuf;
use weathervane_config::AggregatorConfig;
use weathervane_server::Aggregator;

#[derive(Parser, Debug)]
#[command(name = "weathervane")]
#[command(about = "Run the weathervane aggregation server")]
struct Args {
    /// Port to listen on (1-65535). Required unless --config provides one.
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Directory for persisted station files.
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Optional YAML config file; CLI flags override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Resolve the effective configuration from config file and CLI flags.
fn resolve_config(args: &Args) -> Result<AggregatorConfig, String> {
    let mut config = match &args.config {
        Some(path) => weathervane_config::load_from_file(path)
            .map_err(|e| format!("failed to load {}: {e}", path.display()))?,
        None => {
            let port = args.port.ok_or("missing required option: -p <port>")?;
            AggregatorConfig::for_port(port)
        }
    };

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(data_dir) = &args.data_dir {
        config.data_dir = data_dir.clone();
    }

    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    weathervane_metrics::init_tracing();

    let args = Args::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        std::process::exit(1);
    });

    let config = resolve_config(&args).unwrap_or_else(|e| {
        eprintln!("weathervane: {e}");
        eprintln!("Usage: weathervane -p <port> [--data-dir <dir>] [--config <file>]");
        std::process::exit(1);
    });

    tracing::info!(
        port = config.port,
        data_dir = %config.data_dir.display(),
        "starting aggregation server"
    );

    let aggregator = match Aggregator::bootstrap(config.clone()).await {
        Ok(aggregator) => aggregator,
        Err(e) => {
            eprintln!("weathervane: bootstrap failed: {e}");
            std::process::exit(1);
        }
    };

    // Spawn metrics HTTP server if configured
    if let Some(metrics_port) = config.metrics_port {
        let metrics_addr: std::net::SocketAddr = format!("0.0.0.0:{}", metrics_port)
            .parse()
            .expect("valid metrics address");
        tokio::spawn(async move {
            if let Err(e) = weathervane_metrics::serve_metrics(metrics_addr).await {
                tracing::warn!("metrics server failed: {}", e);
            }
        });
    }

    aggregator.spawn_expiry_sweep();

    let listener = match aggregator.listen().await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("weathervane: failed to bind port {}: {e}", config.port);
            std::process::exit(1);
        }
    };

    aggregator.serve(listener).await;
}
