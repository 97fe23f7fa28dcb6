//! edgecap node entry point.
//!
//! ```text
//! edgecap-node                     Run with ./edgecap.toml
//! edgecap-node --config <path>     Load a custom config TOML
//! edgecap-node --gen-config        Write default config to stdout
//! edgecap-node --check             Validate the config and exit
//! edgecap-node --node-id D2 --route http://host:5000/api/v1.0/capture
//! ```

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use edgecap_node::config::NodeConfig;
use edgecap_node::service::NodeService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "edgecap-node",
    about = "Sensor-triggered capture with tiered HTTP delivery"
)]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "edgecap.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Load and validate the configuration, then exit.
    #[arg(long)]
    check: bool,

    /// Override `node.id`.
    #[arg(long)]
    node_id: Option<String>,

    /// Override `server.route`.
    #[arg(long)]
    route: Option<String>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&NodeConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config. A missing or malformed file is fatal.
    let mut config = NodeConfig::load(&cli.config)?;
    config.apply_overrides(cli.node_id, cli.route);
    config.validate()?;

    if cli.check {
        println!("{}: ok", cli.config.display());
        return Ok(());
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.logging.file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }

    info!("edgecap-node v{}", env!("CARGO_PKG_VERSION"));
    info!("node id: {}", config.node.id);
    info!("route: {}", config.server.route);
    info!("sensor: {:?}", config.sensor.kind);
    info!("camera: {:?} {}", config.camera.kind, config.shape());

    let service = NodeService::new(config, cli.config);
    let stop = service.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    service.run().await?;

    Ok(())
}
