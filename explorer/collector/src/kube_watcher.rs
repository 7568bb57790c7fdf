use crate::{
    watcher::{RecordsTx, WatchKind, Watcher, WatcherState},
    Cluster, NewWatcher, Record,
};
use ahash::AHashSet as HashSet;
use anyhow::Context;
use explorer_k8s_api::{
    convert::is_terminating, watcher, Api, ApiResource, Client, DynamicObject, Event, ResourceExt,
    TypeMeta, Watch,
};
use tokio::{sync::watch, task::JoinSet, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

/// Builds [`KubeWatcher`]s, optionally impersonating an identity in every cluster.
#[derive(Clone, Debug, Default)]
pub struct NewKubeWatcher {
    impersonate: Option<Impersonation>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Impersonation {
    pub user: String,
    pub groups: Vec<String>,
}

/// Watches a cluster through its API server.
///
/// Each kind is watched by its own task. The initial listing of a kind is published as a single
/// batch; later changes are published one batch per event. Objects that disappear across a
/// relist are published as deletions.
pub struct KubeWatcher {
    cluster: String,
    client: Client,
    kinds: Vec<WatchKind>,
    records: RecordsTx,
    state: WatcherState,
    shutdown: CancellationToken,
    tasks: JoinSet<()>,
    health: Vec<watch::Receiver<bool>>,
}

type ObjectKey = (Option<String>, String);

const START_TIMEOUT: time::Duration = time::Duration::from_secs(10);

// === impl NewKubeWatcher ===

impl NewKubeWatcher {
    pub fn new(impersonate: Option<Impersonation>) -> Self {
        Self { impersonate }
    }
}

impl NewWatcher for NewKubeWatcher {
    fn new_watcher(
        &self,
        cluster: &Cluster,
        kinds: &[WatchKind],
        records: RecordsTx,
    ) -> anyhow::Result<Box<dyn Watcher>> {
        let mut config = cluster.config.clone();
        if let Some(Impersonation { user, groups }) = self.impersonate.clone() {
            config.auth_info.impersonate = Some(user);
            if !groups.is_empty() {
                config.auth_info.impersonate_groups = Some(groups);
            }
        }
        let client = Client::try_from(config)
            .with_context(|| format!("failed to build a client for cluster {}", cluster.name))?;
        Ok(Box::new(KubeWatcher::new(
            cluster.name.clone(),
            client,
            kinds.to_vec(),
            records,
        )))
    }
}

// === impl KubeWatcher ===

impl KubeWatcher {
    pub fn new(cluster: String, client: Client, kinds: Vec<WatchKind>, records: RecordsTx) -> Self {
        Self {
            cluster,
            client,
            kinds,
            records,
            state: WatcherState::NotWatching,
            shutdown: CancellationToken::new(),
            tasks: JoinSet::new(),
            health: Vec::new(),
        }
    }
}

#[async_trait::async_trait]
impl Watcher for KubeWatcher {
    async fn start(&mut self) -> anyhow::Result<()> {
        self.state = WatcherState::Starting;

        let version = match time::timeout(START_TIMEOUT, self.client.apiserver_version()).await {
            Ok(Ok(version)) => version,
            Ok(Err(error)) => {
                self.state = WatcherState::Stopped;
                return Err(error).context("cluster is unreachable");
            }
            Err(_) => {
                self.state = WatcherState::Stopped;
                anyhow::bail!("timed out connecting to the cluster");
            }
        };
        info!(cluster = %self.cluster, version = %version.git_version, "Connected");

        for kind in &self.kinds {
            let (healthy_tx, healthy_rx) = watch::channel(true);
            self.health.push(healthy_rx);
            let span = info_span!("watch", cluster = %self.cluster, %kind);
            self.tasks.spawn(
                watch_kind(
                    self.cluster.clone(),
                    kind.api_resource(),
                    self.client.clone(),
                    self.records.clone(),
                    healthy_tx,
                    self.shutdown.clone(),
                )
                .instrument(span),
            );
        }

        self.state = WatcherState::Started;
        Ok(())
    }

    async fn stop(&mut self) {
        self.state = WatcherState::Stopping;
        self.shutdown.cancel();
        while let Some(res) = self.tasks.join_next().await {
            if let Err(error) = res {
                debug!(cluster = %self.cluster, %error, "Watch task failed");
            }
        }
        self.health.clear();
        self.state = WatcherState::Stopped;
    }

    fn state(&self) -> WatcherState {
        if self.state == WatcherState::Started && self.health.iter().any(|rx| !*rx.borrow()) {
            return WatcherState::Failed;
        }
        self.state
    }
}

async fn watch_kind(
    cluster: String,
    ar: ApiResource,
    client: Client,
    records: RecordsTx,
    healthy: watch::Sender<bool>,
    shutdown: CancellationToken,
) {
    let api = Api::<DynamicObject>::all_with(client, &ar);
    let mut events =
        Watch::from(watcher::watcher(api, watcher::Config::default())).with_health(healthy);

    let mut known = HashSet::<ObjectKey>::default();
    let mut listing: Option<Vec<DynamicObject>> = None;

    loop {
        let ev = tokio::select! {
            _ = shutdown.cancelled() => return,
            ev = events.recv() => match ev {
                Some(ev) => ev,
                None => return,
            },
        };

        let batch = match ev {
            Event::Init => {
                listing = Some(Vec::new());
                continue;
            }
            Event::InitApply(obj) => {
                listing.get_or_insert_with(Vec::new).push(with_types(obj, &ar));
                continue;
            }
            Event::InitDone => {
                let objects = listing.take().unwrap_or_default();
                let seen = objects.iter().map(key).collect::<HashSet<_>>();
                let mut batch = known
                    .difference(&seen)
                    .map(|(ns, name)| {
                        Record::delete(
                            &cluster,
                            explorer_k8s_api::dynamic(&ar, ns.as_deref(), name),
                        )
                    })
                    .collect::<Vec<_>>();
                batch.extend(objects.into_iter().map(|obj| record(&cluster, obj)));
                debug!(objects = seen.len(), deleted = known.difference(&seen).count(), "Listed");
                known = seen;
                batch
            }
            Event::Apply(obj) => {
                let obj = with_types(obj, &ar);
                known.insert(key(&obj));
                vec![record(&cluster, obj)]
            }
            Event::Delete(obj) => {
                let obj = with_types(obj, &ar);
                known.remove(&key(&obj));
                vec![Record::delete(&cluster, obj)]
            }
        };
        if batch.is_empty() {
            continue;
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            res = records.send(batch) => if res.is_err() {
                debug!("Records channel closed");
                return;
            },
        }
    }
}

/// Objects that are being deleted are reported as deletions.
fn record(cluster: &str, obj: DynamicObject) -> Record {
    if is_terminating(&obj) {
        Record::delete(cluster, obj)
    } else {
        Record::upsert(cluster, obj)
    }
}

/// List responses may omit the type of each item.
fn with_types(mut obj: DynamicObject, ar: &ApiResource) -> DynamicObject {
    if obj.types.as_ref().map_or(true, |t| t.kind.is_empty()) {
        obj.types = Some(TypeMeta {
            api_version: ar.api_version.clone(),
            kind: ar.kind.clone(),
        });
    }
    obj
}

fn key(obj: &DynamicObject) -> ObjectKey {
    (obj.namespace(), obj.name_any())
}
