use crate::{Cluster, Record};
use explorer_core::{
    rbac::{CLUSTER_ROLE_BINDING_KIND, CLUSTER_ROLE_KIND, ROLE_BINDING_KIND, ROLE_KIND},
    GroupVersionKind, KindConfig, ObjectKind,
};
use explorer_k8s_api::ApiResource;
use std::fmt;
use tokio::sync::mpsc;

/// Batches of records flow from watchers to a collector's processing loop over this channel.
pub type RecordsTx = mpsc::Sender<Vec<Record>>;
pub type RecordsRx = mpsc::Receiver<Vec<Record>>;

/// The lifecycle of a cluster watcher.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum WatcherState {
    NotWatching,
    Starting,
    Started,
    Stopping,
    Stopped,

    /// Started, but at least one watch is failing and being retried.
    Failed,
}

/// A kind of resource watched in every cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchKind {
    pub gvk: GroupVersionKind,
    pub plural: String,
    pub namespaced: bool,
}

/// Watches one cluster, publishing records for the kinds it was built for.
#[async_trait::async_trait]
pub trait Watcher: Send + Sync + 'static {
    /// Starts the watches. Returns once they are running, or fails if the cluster cannot be
    /// watched.
    async fn start(&mut self) -> anyhow::Result<()>;

    /// Stops the watches, returning once no further records will be published.
    async fn stop(&mut self);

    fn state(&self) -> WatcherState;
}

/// Builds watchers for clusters as they are discovered.
pub trait NewWatcher: Send + Sync + 'static {
    fn new_watcher(
        &self,
        cluster: &Cluster,
        kinds: &[WatchKind],
        records: RecordsTx,
    ) -> anyhow::Result<Box<dyn Watcher>>;
}

// === impl WatcherState ===

impl WatcherState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotWatching => "notWatching",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl WatchKind ===

impl WatchKind {
    pub fn namespaced(group: &str, version: &str, kind: &str, plural: &str) -> Self {
        Self {
            gvk: GroupVersionKind::gvk(group, version, kind),
            plural: plural.to_string(),
            namespaced: true,
        }
    }

    pub fn cluster_scoped(group: &str, version: &str, kind: &str, plural: &str) -> Self {
        Self {
            namespaced: false,
            ..Self::namespaced(group, version, kind, plural)
        }
    }

    /// The kinds of a catalogue.
    pub fn objects(kinds: &KindConfig) -> Vec<Self> {
        kinds.iter().map(Self::from).collect()
    }

    /// The RBAC kinds queries are authorized against.
    pub fn rbac() -> Vec<Self> {
        const GROUP: &str = "rbac.authorization.k8s.io";
        vec![
            Self::namespaced(GROUP, "v1", ROLE_KIND, "roles"),
            Self::cluster_scoped(GROUP, "v1", CLUSTER_ROLE_KIND, "clusterroles"),
            Self::namespaced(GROUP, "v1", ROLE_BINDING_KIND, "rolebindings"),
            Self::cluster_scoped(GROUP, "v1", CLUSTER_ROLE_BINDING_KIND, "clusterrolebindings"),
        ]
    }

    pub fn namespaces() -> Vec<Self> {
        vec![Self::cluster_scoped("", "v1", "Namespace", "namespaces")]
    }

    pub fn api_resource(&self) -> ApiResource {
        explorer_k8s_api::api_resource(&self.gvk, &self.plural)
    }
}

impl From<&ObjectKind> for WatchKind {
    fn from(kind: &ObjectKind) -> Self {
        Self {
            gvk: kind.gvk.clone(),
            plural: kind.plural.clone(),
            namespaced: kind.namespaced,
        }
    }
}

impl fmt::Display for WatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.gvk.group.is_empty() {
            f.write_str(&self.plural)
        } else {
            write!(f, "{}.{}", self.plural, self.gvk.group)
        }
    }
}
