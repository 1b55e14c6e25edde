//! KOI-net node daemon.
//!
//! Usage:
//!
//!   koinet-node [OPTIONS]
//!
//! Options:
//!
//!   --config <PATH>   Load node configuration from a JSON file
//!                     (default: koinet.json; missing file uses defaults)
//!   --name <NAME>     Override the configured node name
//!
//! Environment:
//!
//!   RUST_LOG          Log filter (default: info)
//!
//! The daemon runs until interrupted with Ctrl+C.

use std::path::PathBuf;

use koinet_crypto::Keypair;
use koinet_node::{KoiNode, KoiNodeBuilder, NodeConfig};
use koinet_types::{KoiNetError, Result};
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

struct CliArgs {
    config_path: PathBuf,
    name: Option<String>,
}

fn parse_args() -> std::result::Result<CliArgs, String> {
    let mut config_path = PathBuf::from("koinet.json");
    let mut name = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config_path = args
                    .next()
                    .map(PathBuf::from)
                    .ok_or("--config requires a path")?;
            }
            "--name" => {
                name = Some(args.next().ok_or("--name requires a value")?);
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(CliArgs { config_path, name })
}

fn print_usage() {
    eprintln!("Usage: koinet-node [--config PATH] [--name NAME]");
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = match parse_args() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}");
            print_usage();
            std::process::exit(2);
        }
    };

    if let Err(e) = run(cli).await {
        tracing::error!("node error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: CliArgs) -> Result<()> {
    let mut config = load_config(&cli.config_path)?;
    if let Some(name) = cli.name {
        config.settings.node_name = name;
    }
    config.validate()?;

    let keypair = load_or_generate_key(&config.key_file)?;
    let node = KoiNodeBuilder::new(config).keypair(keypair).build()?;
    tracing::info!(rid = %node.identity.rid(), "node identity ready");

    node.start().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = node.spawn_poller(shutdown_rx);

    if let Some(listen_addr) = node.config.listen_addr.clone() {
        serve(&node, &listen_addr).await?;
    } else {
        tracing::info!("no listen address configured, running poll-only");
        wait_for_ctrl_c().await;
    }

    let _ = shutdown_tx.send(true);
    let _ = poller.await;
    tracing::info!("node stopped");
    Ok(())
}

async fn serve(node: &KoiNode, listen_addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .map_err(|e| KoiNetError::NetworkError {
            reason: format!("failed to bind {listen_addr}: {e}"),
        })?;
    tracing::info!(%listen_addr, "serving protocol endpoints");
    axum::serve(listener, node.router())
        .with_graceful_shutdown(wait_for_ctrl_c())
        .await
        .map_err(|e| KoiNetError::NetworkError {
            reason: format!("server error: {e}"),
        })
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}

// ---------------------------------------------------------------------------
// Config / key loading
// ---------------------------------------------------------------------------

fn load_config(path: &PathBuf) -> Result<NodeConfig> {
    match std::fs::read_to_string(path) {
        Ok(data) => serde_json::from_str(&data).map_err(|e| KoiNetError::ConfigError {
            reason: format!("invalid config {}: {e}", path.display()),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            Ok(NodeConfig::default())
        }
        Err(e) => Err(KoiNetError::ConfigError {
            reason: format!("failed to read {}: {e}", path.display()),
        }),
    }
}

/// Loads the node key, generating and persisting one on first start.
fn load_or_generate_key(path: &str) -> Result<Keypair> {
    match std::fs::read_to_string(path) {
        Ok(pem) => Keypair::from_pkcs8_pem(&pem),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(%path, "generating new node key");
            let keypair = Keypair::generate();
            let pem = keypair.to_pkcs8_pem()?;
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| KoiNetError::ConfigError {
                        reason: format!("failed to create key directory: {e}"),
                    })?;
                }
            }
            std::fs::write(path, pem).map_err(|e| KoiNetError::ConfigError {
                reason: format!("failed to write {path}: {e}"),
            })?;
            Ok(keypair)
        }
        Err(e) => Err(KoiNetError::ConfigError {
            reason: format!("failed to read {path}: {e}"),
        }),
    }
}
