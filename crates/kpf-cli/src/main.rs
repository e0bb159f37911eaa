//! kpf
//!
//! Browse the Services of a Kubernetes cluster and toggle local port
//! forwards to them from a terminal UI.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kpf::app::ClusterInfo;
use kpf::output::{format_closed_forwards, print_error, print_info, print_success};
use kpf::runner;
use kpf_core::config::{self, KpfConfig};
use kpf_core::ConfigError;
use kpf_forward::ForwardManager;
use kpf_kube::{KubeDiscovery, KubeTunnelProvider};

#[derive(Parser)]
#[command(name = "kpf")]
#[command(author, version, about = "Kubernetes port forwarding TUI")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the kubeconfig file (default: KUBECONFIG, then ~/.kube/config)
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Only list services in this namespace
    #[arg(short, long, env = "KPF_NAMESPACE")]
    namespace: Option<String>,

    /// Increase log verbosity (written to the log file)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config.log_path(), cli.verbose)?;

    tracing::info!(
        "kpf {} starting (namespace: {})",
        env!("CARGO_PKG_VERSION"),
        config.namespace_label()
    );

    print_info("Connecting to cluster...");
    let connection =
        match kpf_kube::connect(config.kubeconfig.as_deref(), config.connect_timeout).await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!("Startup failed: {}", e);
                print_error(&e.to_string());
                return Err(e).context("Cannot reach the Kubernetes cluster");
            }
        };

    let discovery = Arc::new(KubeDiscovery::new(connection.client.clone()));
    let provider = Arc::new(KubeTunnelProvider::new(connection.client.clone()));
    let manager = Arc::new(
        ForwardManager::new(discovery, provider).with_establish_timeout(config.establish_timeout),
    );

    let cluster = ClusterInfo {
        host: connection.host,
        config_source: connection.config_source,
        version: connection.server_version,
    };
    let sessions = runner::run(manager, &config, cluster).await?;

    if let Some(summary) = format_closed_forwards(&sessions) {
        print_success(&summary);
    }
    tracing::info!("kpf exiting");
    Ok(())
}

/// Read the config file and apply command-line overrides.
///
/// A missing default config file is not an error; a missing explicit one is.
fn load_config(cli: &Cli) -> Result<KpfConfig> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);

    let mut config = match config::load_config::<KpfConfig>(&path) {
        Ok(config) => config,
        Err(ConfigError::NotFound(_)) if cli.config.is_none() => KpfConfig::default(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to load config {}", path.display()))
        }
    };

    if let Some(kubeconfig) = &cli.kubeconfig {
        config.kubeconfig = Some(kubeconfig.clone());
    }
    if let Some(namespace) = &cli.namespace {
        config.namespace = Some(namespace.clone());
    }
    Ok(config)
}

/// Log to a file; the terminal belongs to the TUI
fn init_logging(path: &Path, verbose: u8) -> Result<()> {
    let log_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();
    Ok(())
}
