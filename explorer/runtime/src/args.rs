use crate::{
    catalogue::Catalogue,
    collector::{
        Cluster, ClusterRegistry, Collector, Impersonation, NewKubeWatcher, NewWatcher,
        ObjectsProcessor, RolesProcessor, TenantsProcessor, WatchKind,
    },
    core::{KindConfig, KindRetention},
    k8s::AdapterRegistry,
    registry::KubeconfigRegistry,
    store::RetentionManager,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::future;
use std::{path::PathBuf, sync::Arc};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "explorer", about = "Catalogues resources across clusters")]
pub struct Args {
    #[clap(long, default_value = "explorer=info,warn", env = "EXPLORER_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Directory holding the catalogue database and its search index.
    #[clap(long, env = "EXPLORER_DATA_DIR", default_value = "/var/lib/explorer")]
    data_dir: PathBuf,

    /// The name given to the cluster the explorer runs in.
    #[clap(long, default_value = "management")]
    cluster_name: String,

    /// A kubeconfig whose contexts are collected from in addition to the local cluster.
    #[clap(long, env = "EXPLORER_REMOTE_KUBECONFIG")]
    remote_kubeconfig: Option<PathBuf>,

    #[clap(long, default_value = "30")]
    registry_refresh_secs: u64,

    #[clap(long, default_value = "3600")]
    retention_interval_secs: u64,

    /// Overrides how long deleted objects of a kind are kept, e.g. `Event=1h`.
    #[clap(long = "kind-retention")]
    kind_retentions: Vec<KindRetention>,

    #[clap(long = "impersonate-user", id = "collector_impersonate_user")]
    impersonate_user: Option<String>,

    #[clap(long = "impersonate-group")]
    impersonate_groups: Vec<String>,

    /// Serves the stored catalogue without collecting from any cluster.
    #[clap(long)]
    skip_collection: bool,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            data_dir,
            cluster_name,
            remote_kubeconfig,
            registry_refresh_secs,
            retention_interval_secs,
            kind_retentions,
            impersonate_user,
            impersonate_groups,
            skip_collection,
        } = self;

        let kinds = Arc::new(kind_config(&kind_retentions)?);
        let impersonation = match impersonate_user {
            Some(user) => Some(Impersonation {
                user,
                groups: impersonate_groups,
            }),
            None if !impersonate_groups.is_empty() => {
                bail!("--impersonate-group requires --impersonate-user")
            }
            None => None,
        };

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin.into_builder())
            .with_client(client)
            .build()
            .await?;

        let Catalogue { store, index } =
            tokio::task::spawn_blocking(move || Catalogue::open(&data_dir)).await??;

        let shutdown = CancellationToken::new();

        tokio::spawn(
            RetentionManager::new(
                store.clone(),
                index.clone(),
                kinds.clone(),
                Duration::from_secs(retention_interval_secs),
            )
            .run(shutdown.child_token())
            .instrument(info_span!("retention")),
        );

        let mut collectors = Vec::new();
        if skip_collection {
            info!("Collection is disabled");
        } else {
            let local = Cluster::new(
                cluster_name,
                kube::Config::infer()
                    .await
                    .context("failed to load the local cluster's configuration")?,
            );
            let registry = KubeconfigRegistry::load(local, remote_kubeconfig).await?;
            let clusters: Arc<dyn ClusterRegistry> = Arc::new(registry.clusters());
            tokio::spawn(
                registry
                    .run(
                        Duration::from_secs(registry_refresh_secs),
                        shutdown.child_token(),
                    )
                    .instrument(info_span!("registry")),
            );

            let new_watcher: Arc<dyn NewWatcher> = Arc::new(NewKubeWatcher::new(impersonation));
            let adapters = AdapterRegistry::default();
            collectors.push(Collector::new(
                "objects",
                WatchKind::objects(&kinds),
                new_watcher.clone(),
                clusters.clone(),
                ObjectsProcessor::new(kinds.clone(), adapters.clone()),
                store.clone(),
                index.clone(),
            ));
            collectors.push(Collector::new(
                "roles",
                WatchKind::rbac(),
                new_watcher.clone(),
                clusters.clone(),
                RolesProcessor::new(adapters),
                store.clone(),
                index.clone(),
            ));
            collectors.push(Collector::new(
                "tenants",
                WatchKind::namespaces(),
                new_watcher,
                clusters,
                TenantsProcessor::new(),
                store.clone(),
                index.clone(),
            ));
            for collector in &collectors {
                collector.start(shutdown.child_token()).await?;
            }
        }

        // Once shutdown is signaled, stop collecting and let in-flight records be written before
        // the runtime exits.
        let drain = runtime.shutdown_handle();
        tokio::spawn(
            async move {
                let release = drain.signaled().await;
                shutdown.cancel();
                release
                    .release_after(future::join_all(collectors.iter().map(Collector::stop)))
                    .await;
            }
            .instrument(info_span!("shutdown")),
        );

        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

fn kind_config(retentions: &[KindRetention]) -> Result<KindConfig> {
    let mut kinds = KindConfig::default();
    for retention in retentions {
        kinds.set_retention(retention)?;
    }
    Ok(kinds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[test]
    fn parses_defaults() {
        let args = Args::try_parse_from(["explorer"]).unwrap();
        assert_eq!(args.data_dir, PathBuf::from("/var/lib/explorer"));
        assert_eq!(args.cluster_name, "management");
        assert_eq!(args.registry_refresh_secs, 30);
        assert_eq!(args.retention_interval_secs, 3600);
        assert!(args.kind_retentions.is_empty());
        assert!(!args.skip_collection);
    }

    #[test]
    fn kind_retentions_override_defaults() {
        let args = Args::try_parse_from([
            "explorer",
            "--kind-retention",
            "Event=2h",
            "--kind-retention",
            "HelmRelease=7d",
        ])
        .unwrap();
        let kinds = kind_config(&args.kind_retentions).unwrap();
        let retention = |kind: &str| {
            kinds
                .iter()
                .find(|k| k.gvk.kind == kind)
                .and_then(|k| k.retention)
                .map(|r| r.as_duration())
        };
        assert_eq!(retention("Event"), Some(StdDuration::from_secs(2 * 60 * 60)));
        assert_eq!(
            retention("HelmRelease"),
            Some(StdDuration::from_secs(7 * 24 * 60 * 60))
        );
        assert_eq!(retention("Kustomization"), None);
    }

    #[test]
    fn rejects_malformed_retentions() {
        assert!(Args::try_parse_from(["explorer", "--kind-retention", "Event"]).is_err());
        assert!(Args::try_parse_from(["explorer", "--kind-retention", "Event=soon"]).is_err());
        assert!(Args::try_parse_from([
            "explorer",
            "--kind-retention",
            "Event=99999999999999999999d"
        ])
        .is_err());

        let args = Args::try_parse_from(["explorer", "--kind-retention", "Widget=1h"]).unwrap();
        assert!(kind_config(&args.kind_retentions).is_err());
    }
}
