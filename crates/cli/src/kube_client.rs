//! Builds the `kube::Client` the engine runs every job against. Client
//! construction is an external collaborator (§1); the engine only ever
//! borrows an already-connected client.

use std::path::Path;

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;

/// Resolves a client from an explicit kubeconfig path when given, otherwise
/// the standard chain: `KUBECONFIG` env, in-cluster service account,
/// `~/.kube/config`.
pub async fn build_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            let raw = Kubeconfig::read_from(path)
                .with_context(|| format!("reading kubeconfig {}", path.display()))?;
            kube::Config::from_custom_kubeconfig(raw, &KubeConfigOptions::default())
                .await
                .context("building client config from kubeconfig file")?
        }
        None => kube::Config::infer().await.context("inferring cluster config")?,
    };

    Client::try_from(config).context("constructing kube client")
}
