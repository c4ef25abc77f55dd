//! CLI commands

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use devswap_common::ReplaceRequest;
use devswap_replace::{KubeReplaceClient, ReplaceController};

use crate::{Error, Result};

pub mod plan;
pub mod replace;
pub mod revert;
pub mod status;

/// Environment variable naming a kubeconfig file
pub const DEVSWAP_KUBECONFIG_ENV: &str = "DEVSWAP_KUBECONFIG";

/// Flags shared by every command that talks to a cluster
#[derive(Args, Debug, Clone)]
pub struct ClusterArgs {
    /// Replace request file (YAML or JSON)
    #[arg(short = 'f', long = "file")]
    pub file: PathBuf,

    /// Path to kubeconfig file
    #[arg(long)]
    pub kubeconfig: Option<String>,

    /// Namespace to use when the request names none
    #[arg(short, long)]
    pub namespace: Option<String>,
}

/// Resolve which kubeconfig file to use.
///
/// Priority:
/// 1. `explicit`: the `--kubeconfig` CLI flag
/// 2. `DEVSWAP_KUBECONFIG` env var
/// 3. `None`: fall back to `kube::Client::try_default()`
pub fn resolve_kubeconfig(explicit: Option<&str>) -> Option<String> {
    resolve_kubeconfig_from(explicit, std::env::var(DEVSWAP_KUBECONFIG_ENV).ok())
}

fn resolve_kubeconfig_from(explicit: Option<&str>, env: Option<String>) -> Option<String> {
    if let Some(path) = explicit.filter(|p| !p.is_empty()) {
        return Some(path.to_string());
    }
    env.filter(|p| !p.is_empty())
}

/// Build a kube [`Client`] using the kubeconfig resolution chain
pub async fn kube_client(explicit_kubeconfig: Option<&str>) -> Result<Client> {
    let Some(path) = resolve_kubeconfig(explicit_kubeconfig) else {
        return Client::try_default()
            .await
            .map_err(|e| Error::kubeconfig(e.to_string()));
    };

    debug!(kubeconfig = %path, "loading kubeconfig");
    let kubeconfig = Kubeconfig::read_from(&path)
        .map_err(|e| Error::kubeconfig(format!("failed to read {}: {}", path, e)))?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::kubeconfig(e.to_string()))?;
    Client::try_from(config).map_err(|e| Error::kubeconfig(e.to_string()))
}

/// Load the request and build a controller bound to the resolved cluster
pub async fn controller(args: &ClusterArgs) -> Result<ReplaceController> {
    let request = ReplaceRequest::load(&args.file)?;
    let client = kube_client(args.kubeconfig.as_deref()).await?;
    let kube = KubeReplaceClient::new(client);
    let namespace = args
        .namespace
        .clone()
        .unwrap_or_else(|| kube.default_namespace().to_string());
    Ok(ReplaceController::new(Arc::new(kube), request, &namespace))
}

/// Token cancelled on the first Ctrl-C
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling in-flight cluster call");
            trigger.cancel();
        }
    });
    token
}
