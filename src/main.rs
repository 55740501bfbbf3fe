use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cptx_bootstrap::config::Config;
use cptx_bootstrap::models::NodeSpec;
use cptx_bootstrap::readiness::KubectlPodWatcher;
use cptx_bootstrap::transport::KubectlExecTransport;
use cptx_bootstrap::vendor::{require, Node, NodeDeps, VendorRegistry};

#[derive(Parser)]
#[command(name = "cptx-bootstrap", version, about = "Bootstrap and configure cPTX nodes")]
struct Cli {
    /// Namespace the node's pod runs in
    #[arg(short, long, env = "KNE_NAMESPACE")]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for the pod, generate the self-signed cert and enable gRPC
    Bootstrap {
        #[arg(long)]
        spec: PathBuf,
    },
    /// Merge a configuration file into the node's active configuration
    Push {
        #[arg(long)]
        spec: PathBuf,
        #[arg(long)]
        config: PathBuf,
    },
    /// Restore the factory configuration and re-enable gRPC
    Reset {
        #[arg(long)]
        spec: PathBuf,
    },
    /// Print the node spec with cPTX defaults applied
    Defaults {
        #[arg(long)]
        spec: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cptx_bootstrap=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut cfg = Config::load();
    if let Some(ns) = cli.namespace {
        cfg.namespace = ns;
    }

    let registry = VendorRegistry::with_builtin();
    let deps = NodeDeps {
        transport: Arc::new(KubectlExecTransport::new(
            cfg.kubectl_path.clone(),
            cfg.cli_command.clone(),
            cfg.timeouts.operation,
        )),
        watcher: Arc::new(KubectlPodWatcher::new(
            cfg.kubectl_path.clone(),
            cfg.timeouts.readiness_poll_interval,
        )),
        timeouts: cfg.timeouts,
        candidate_name: cfg.candidate_name.clone(),
    };

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown(cancel.clone()));

    match cli.command {
        Commands::Bootstrap { spec } => {
            let node = registry.build(load_spec(&spec).await?, &cfg.namespace, deps)?;
            let issuer = require(node.as_ref(), node.cert_issuer(), "cert generation")?;
            issuer
                .generate_self_signed(&cancel)
                .await
                .with_context(|| format!("{} - cert bootstrap failed", node.identity()))?;
        }
        Commands::Push { spec, config } => {
            let node = registry.build(load_spec(&spec).await?, &cfg.namespace, deps)?;
            let text = tokio::fs::read_to_string(&config)
                .await
                .with_context(|| format!("reading {}", config.display()))?;
            let pusher = require(node.as_ref(), node.config_pusher(), "config push")?;
            run_cancellable(&cancel, pusher.config_push(&text))
                .await
                .with_context(|| format!("{} - config push failed", node.identity()))?;
        }
        Commands::Reset { spec } => {
            let node = registry.build(load_spec(&spec).await?, &cfg.namespace, deps)?;
            let resetter = require(node.as_ref(), node.resetter(), "config reset")?;
            run_cancellable(&cancel, resetter.reset_config())
                .await
                .with_context(|| format!("{} - config reset failed", node.identity()))?;
        }
        Commands::Defaults { spec } => {
            let node = registry.build(load_spec(&spec).await?, &cfg.namespace, deps)?;
            println!("{}", serde_json::to_string_pretty(node.spec())?);
        }
    }

    Ok(())
}

async fn load_spec(path: &Path) -> anyhow::Result<NodeSpec> {
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading node spec {}", path.display()))?;
    let spec: NodeSpec = serde_json::from_str(&data).map_err(cptx_bootstrap::Error::from)?;
    Ok(spec)
}

/// Push and reset have no poll loop to check the token, so race them against it.
/// Dropping the operation kills the CLI process (kill-on-drop).
async fn run_cancellable<F>(cancel: &CancellationToken, op: F) -> cptx_bootstrap::Result<()>
where
    F: std::future::Future<Output = cptx_bootstrap::Result<()>>,
{
    tokio::select! {
        res = op => res,
        _ = cancel.cancelled() => Err(cptx_bootstrap::Error::Cancelled),
    }
}

async fn cancel_on_shutdown(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => { sig.recv().await; }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown requested, cancelling");
    cancel.cancel();
}
