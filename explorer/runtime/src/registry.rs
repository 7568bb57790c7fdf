use anyhow::{Context, Result};
use explorer_collector::{Cluster, ClusterSet};
use kube::config::{KubeConfigOptions, Kubeconfig};
use std::path::PathBuf;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Discovers clusters from the local cluster's configuration plus every context of an optional
/// kubeconfig, which is re-read periodically.
#[derive(Clone, Debug)]
pub struct KubeconfigRegistry {
    local: Cluster,
    kubeconfig: Option<PathBuf>,
    clusters: ClusterSet,
}

impl KubeconfigRegistry {
    pub async fn load(local: Cluster, kubeconfig: Option<PathBuf>) -> Result<Self> {
        let registry = Self {
            local,
            kubeconfig,
            clusters: ClusterSet::default(),
        };
        registry.refresh().await?;
        Ok(registry)
    }

    /// The set collectors subscribe to.
    pub fn clusters(&self) -> ClusterSet {
        self.clusters.clone()
    }

    pub async fn refresh(&self) -> Result<()> {
        let mut clusters = vec![self.local.clone()];
        if let Some(path) = self.kubeconfig.as_ref() {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            for cluster in clusters_from(kubeconfig).await? {
                if cluster.name == self.local.name {
                    warn!(cluster = %cluster.name, "Ignoring context named after the local cluster");
                    continue;
                }
                clusters.push(cluster);
            }
        }
        debug!(clusters = clusters.len(), "Refreshed clusters");
        self.clusters.replace(clusters);
        Ok(())
    }

    /// Re-reads the kubeconfig on an interval until `shutdown` is triggered. A kubeconfig that
    /// cannot be read leaves the current clusters in place.
    pub async fn run(self, interval: time::Duration, shutdown: CancellationToken) {
        if self.kubeconfig.is_none() {
            return;
        }
        let mut timer = time::interval(interval);
        timer.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        timer.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = timer.tick() => {}
            }
            if let Err(error) = self.refresh().await {
                warn!(error = %format!("{error:#}"), "Failed to refresh clusters");
            }
        }
    }
}

/// Builds one cluster per kubeconfig context, named after the context.
pub async fn clusters_from(kubeconfig: Kubeconfig) -> Result<Vec<Cluster>> {
    let mut clusters = Vec::with_capacity(kubeconfig.contexts.len());
    for context in &kubeconfig.contexts {
        let options = KubeConfigOptions {
            context: Some(context.name.clone()),
            ..Default::default()
        };
        let config = kube::Config::from_custom_kubeconfig(kubeconfig.clone(), &options)
            .await
            .with_context(|| format!("invalid kubeconfig context {}", context.name))?;
        info!(cluster = %context.name, server = %config.cluster_url, "Discovered cluster");
        clusters.push(Cluster::new(context.name.clone(), config));
    }
    Ok(clusters)
}
