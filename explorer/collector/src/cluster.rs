use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// A cluster the explorer can collect from.
#[derive(Clone)]
pub struct Cluster {
    pub name: String,
    pub config: kube::Config,
}

#[derive(Clone, Debug)]
pub enum ClusterUpdate {
    Added(Cluster),
    Removed(String),
}

/// Supplies the set of reachable clusters and notifies subscribers as it changes.
pub trait ClusterRegistry: Send + Sync + 'static {
    fn clusters(&self) -> Vec<Cluster>;

    /// Subscribes to updates published after this call.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ClusterUpdate>;
}

/// An in-memory [`ClusterRegistry`] whose clusters are set by its owner.
#[derive(Clone, Default)]
pub struct ClusterSet {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    clusters: HashMap<String, Cluster>,
    subscribers: Vec<mpsc::UnboundedSender<ClusterUpdate>>,
}

// === impl Cluster ===

impl Cluster {
    pub fn new(name: impl Into<String>, config: kube::Config) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("name", &self.name)
            .field("server", &self.config.cluster_url)
            .finish()
    }
}

// === impl ClusterSet ===

impl ClusterSet {
    pub fn new(clusters: impl IntoIterator<Item = Cluster>) -> Self {
        let set = Self::default();
        set.replace(clusters);
        set
    }

    /// Adds or replaces a cluster.
    pub fn add(&self, cluster: Cluster) {
        let mut inner = self.inner.lock();
        inner.clusters.insert(cluster.name.clone(), cluster.clone());
        inner.publish(ClusterUpdate::Added(cluster));
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.clusters.remove(name).is_none() {
            return false;
        }
        inner.publish(ClusterUpdate::Removed(name.to_string()));
        true
    }

    /// Replaces the whole set, publishing an update for every cluster that was added or removed.
    ///
    /// Clusters whose server changed are published as removed, then added.
    pub fn replace(&self, clusters: impl IntoIterator<Item = Cluster>) {
        let mut next = clusters
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect::<HashMap<_, _>>();

        let mut inner = self.inner.lock();
        let mut removed = Vec::new();
        for (name, current) in inner.clusters.iter() {
            match next.get(name) {
                Some(c) if c.config.cluster_url == current.config.cluster_url => {
                    next.remove(name);
                }
                _ => removed.push(name.clone()),
            }
        }

        for name in removed {
            inner.clusters.remove(&name);
            inner.publish(ClusterUpdate::Removed(name));
        }
        for (name, cluster) in next {
            inner.clusters.insert(name, cluster.clone());
            inner.publish(ClusterUpdate::Added(cluster));
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ClusterRegistry for ClusterSet {
    fn clusters(&self) -> Vec<Cluster> {
        let mut clusters = self
            .inner
            .lock()
            .clusters
            .values()
            .cloned()
            .collect::<Vec<_>>();
        clusters.sort_by(|a, b| a.name.cmp(&b.name));
        clusters
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ClusterUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().subscribers.push(tx);
        rx
    }
}

impl std::fmt::Debug for ClusterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ClusterSet")
            .field("clusters", &inner.clusters.keys().collect::<Vec<_>>())
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

// === impl Inner ===

impl Inner {
    fn publish(&mut self, update: ClusterUpdate) {
        debug!(?update, "Publishing cluster update");
        self.subscribers.retain(|tx| tx.send(update.clone()).is_ok());
    }
}
