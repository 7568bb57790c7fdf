use crate::{
    watcher::{RecordsRx, RecordsTx, WatchKind, Watcher, WatcherState},
    Cluster, ClusterRegistry, ClusterUpdate, CollectorError, NewWatcher, Record,
};
use ahash::AHashMap as HashMap;
use explorer_store::{Indexer, Store};
use futures::future;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Writes a batch of records to the store and index.
///
/// Each collector is given a processor for the kinds it watches. Processors run on a blocking
/// thread, one batch at a time.
pub trait ProcessRecords: Send + Sync + 'static {
    fn process(&self, records: Vec<Record>, store: &Store, index: &Indexer) -> anyhow::Result<()>;
}

/// Keeps one watcher running per cluster in the registry, feeding every watcher's records through
/// a single processing loop.
#[derive(Clone)]
pub struct Collector {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    kinds: Vec<WatchKind>,
    new_watcher: Arc<dyn NewWatcher>,
    registry: Arc<dyn ClusterRegistry>,
    processor: Arc<dyn ProcessRecords>,
    store: Store,
    index: Indexer,
    records_tx: Mutex<Option<RecordsTx>>,
    records_rx: Mutex<Option<RecordsRx>>,
    processed: watch::Sender<bool>,
    watchers: Mutex<HashMap<String, Entry>>,
}

/// A watcher is absent from its entry while it is being started or stopped.
struct Entry {
    state: WatcherState,
    watcher: Option<Box<dyn Watcher>>,
}

const RECORDS_BUFFER: usize = 1024;

// === impl Collector ===

impl Collector {
    pub fn new(
        name: impl Into<String>,
        kinds: Vec<WatchKind>,
        new_watcher: Arc<dyn NewWatcher>,
        registry: Arc<dyn ClusterRegistry>,
        processor: impl ProcessRecords,
        store: Store,
        index: Indexer,
    ) -> Self {
        let (tx, rx) = mpsc::channel(RECORDS_BUFFER);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                kinds,
                new_watcher,
                registry,
                processor: Arc::new(processor),
                store,
                index,
                records_tx: Mutex::new(Some(tx)),
                records_rx: Mutex::new(Some(rx)),
                processed: watch::Sender::new(false),
                watchers: Mutex::new(HashMap::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Starts processing records, watches every known cluster and then follows the registry until
    /// `shutdown` is triggered, at which point the collector is stopped.
    ///
    /// Clusters that cannot be watched are logged and skipped.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<(), CollectorError> {
        let rx = self
            .inner
            .records_rx
            .lock()
            .take()
            .ok_or_else(|| CollectorError::AlreadyStarted(self.inner.name.clone()))?;

        let span = info_span!("collector", name = %self.inner.name);
        tokio::spawn(process_records(self.inner.clone(), rx).instrument(span.clone()));

        let updates = self.inner.registry.subscribe();
        let clusters = self.inner.registry.clusters();
        info!(parent: &span, clusters = clusters.len(), "Starting");
        future::join_all(clusters.iter().map(|cluster| self.watch_logged(cluster))).await;

        tokio::spawn(self.clone().follow(updates, shutdown).instrument(span));
        Ok(())
    }

    /// Starts watching a cluster. Watching a cluster that is already watched does nothing.
    pub async fn watch(&self, cluster: &Cluster) -> Result<(), CollectorError> {
        if cluster.name.is_empty() {
            return Err(CollectorError::EmptyClusterName);
        }
        let records = self
            .inner
            .records_tx
            .lock()
            .clone()
            .ok_or_else(|| CollectorError::Stopped(self.inner.name.clone()))?;

        {
            let mut watchers = self.inner.watchers.lock();
            if watchers.contains_key(&cluster.name) {
                debug!(cluster = %cluster.name, "Already watching");
                return Ok(());
            }
            watchers.insert(
                cluster.name.clone(),
                Entry {
                    state: WatcherState::Starting,
                    watcher: None,
                },
            );
        }

        let started = async {
            let mut watcher = self
                .inner
                .new_watcher
                .new_watcher(cluster, &self.inner.kinds, records)?;
            watcher.start().await?;
            Ok::<_, anyhow::Error>(watcher)
        }
        .await;

        let mut watcher = match started {
            Ok(watcher) => watcher,
            Err(source) => {
                self.inner.watchers.lock().remove(&cluster.name);
                return Err(CollectorError::Start {
                    cluster: cluster.name.clone(),
                    source,
                });
            }
        };

        {
            let mut watchers = self.inner.watchers.lock();
            if let Some(entry) = watchers.get_mut(&cluster.name) {
                if entry.state == WatcherState::Starting {
                    entry.state = WatcherState::Started;
                    entry.watcher = Some(watcher);
                    info!(collector = %self.inner.name, cluster = %cluster.name, "Watching");
                    return Ok(());
                }
            }
        }

        // The cluster was unwatched while the watcher was starting.
        watcher.stop().await;
        debug!(cluster = %cluster.name, "Discarded watcher for unwatched cluster");
        Ok(())
    }

    /// Stops watching a cluster and removes everything collected from it.
    pub async fn unwatch(&self, cluster: &str) -> Result<(), CollectorError> {
        if cluster.is_empty() {
            return Err(CollectorError::EmptyClusterName);
        }

        let watcher = {
            let mut watchers = self.inner.watchers.lock();
            let entry = watchers
                .get_mut(cluster)
                .ok_or_else(|| CollectorError::UnknownCluster(cluster.to_string()))?;
            if entry.state == WatcherState::Stopping {
                return Ok(());
            }
            entry.state = WatcherState::Stopping;
            entry.watcher.take()
        };

        if let Some(mut watcher) = watcher {
            watcher.stop().await;
        }
        self.inner.watchers.lock().remove(cluster);
        info!(collector = %self.inner.name, %cluster, "Stopped watching");

        let records = self.inner.records_tx.lock().clone();
        if let Some(records) = records {
            if records.send(vec![Record::delete_all(cluster)]).await.is_err() {
                debug!(%cluster, "Records channel closed");
            }
        }
        Ok(())
    }

    pub fn status(&self, cluster: &str) -> Result<WatcherState, CollectorError> {
        if cluster.is_empty() {
            return Err(CollectorError::EmptyClusterName);
        }
        self.inner
            .watchers
            .lock()
            .get(cluster)
            .map(Entry::state)
            .ok_or_else(|| CollectorError::UnknownCluster(cluster.to_string()))
    }

    /// The state of every watched cluster, ordered by cluster name.
    pub fn statuses(&self) -> Vec<(String, WatcherState)> {
        let mut statuses = self
            .inner
            .watchers
            .lock()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.state()))
            .collect::<Vec<_>>();
        statuses.sort_by(|(a, _), (b, _)| a.cmp(b));
        statuses
    }

    /// Stops every watcher, then closes the records channel and waits for the records already
    /// received to be processed.
    ///
    /// Collected data is kept.
    pub async fn stop(&self) {
        let mut stopping = {
            let mut watchers = self.inner.watchers.lock();
            watchers
                .values_mut()
                .filter_map(|entry| {
                    entry.state = WatcherState::Stopping;
                    entry.watcher.take()
                })
                .collect::<Vec<_>>()
        };
        future::join_all(stopping.iter_mut().map(|w| w.stop())).await;
        drop(stopping);
        self.inner.watchers.lock().clear();

        drop(self.inner.records_tx.lock().take());
        let started = self.inner.records_rx.lock().is_none();
        if started {
            let mut processed = self.inner.processed.subscribe();
            let _ = processed.wait_for(|done| *done).await;
        }
        info!(collector = %self.inner.name, "Stopped");
    }

    async fn watch_logged(&self, cluster: &Cluster) {
        if let Err(error) = self.watch(cluster).await {
            warn!(cluster = %cluster.name, %error, "Failed to watch cluster");
        }
    }

    async fn follow(
        self,
        mut updates: mpsc::UnboundedReceiver<ClusterUpdate>,
        shutdown: CancellationToken,
    ) {
        loop {
            let update = tokio::select! {
                _ = shutdown.cancelled() => break,
                update = updates.recv() => match update {
                    Some(update) => update,
                    None => {
                        debug!("Cluster registry closed");
                        shutdown.cancelled().await;
                        break;
                    }
                },
            };

            match update {
                ClusterUpdate::Added(cluster) => self.watch_logged(&cluster).await,
                ClusterUpdate::Removed(cluster) => {
                    if let Err(error) = self.unwatch(&cluster).await {
                        debug!(%cluster, %error, "Failed to unwatch cluster");
                    }
                }
            }
        }
        self.stop().await;
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("name", &self.inner.name)
            .field("kinds", &self.inner.kinds.len())
            .field("watchers", &self.inner.watchers.lock().len())
            .finish()
    }
}

// === impl Entry ===

impl Entry {
    fn state(&self) -> WatcherState {
        self.watcher.as_ref().map_or(self.state, |w| w.state())
    }
}

async fn process_records(inner: Arc<Inner>, mut rx: RecordsRx) {
    while let Some(records) = rx.recv().await {
        let n = records.len();
        let task = {
            let inner = inner.clone();
            let span = tracing::Span::current();
            tokio::task::spawn_blocking(move || {
                let _enter = span.enter();
                inner.processor.process(records, &inner.store, &inner.index)
            })
        };
        match task.await {
            Ok(Ok(())) => debug!(records = n, "Processed"),
            Ok(Err(error)) => error!(records = n, error = %format!("{error:#}"), "Failed to process records"),
            Err(error) => error!(records = n, %error, "Record processing panicked"),
        }
    }
    debug!("Records channel closed");
    inner.processed.send_replace(true);
}
