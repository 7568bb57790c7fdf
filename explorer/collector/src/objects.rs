use crate::{record::compact, ProcessRecords, Record, Transaction};
use ahash::AHashMap as HashMap;
use anyhow::Context;
use chrono::Utc;
use explorer_core::{KindConfig, Object};
use explorer_k8s_api::{
    convert::{is_terminating, to_object},
    AdapterRegistry, ResourceExt,
};
use explorer_store::{Indexer, Store};
use std::sync::Arc;
use tracing::{debug, warn};

/// Writes the catalogue's objects.
///
/// Deleted objects whose kind has a retention window are kept, marked with the time the deletion
/// was observed, until the retention manager purges them. Other deleted objects are removed
/// immediately.
#[derive(Clone)]
pub struct ObjectsProcessor {
    kinds: Arc<KindConfig>,
    adapters: AdapterRegistry,
}

#[derive(Debug, Default)]
struct Changes {
    delete_all: Vec<String>,
    upserts: Vec<Object>,
    deletes: Vec<Object>,
}

// === impl ObjectsProcessor ===

impl ObjectsProcessor {
    pub fn new(kinds: Arc<KindConfig>, adapters: AdapterRegistry) -> Self {
        Self { kinds, adapters }
    }

    fn changes(&self, records: Vec<Record>, store: &Store) -> anyhow::Result<Changes> {
        let tenants = store
            .get_tenants()
            .context("failed to read tenants")?
            .into_iter()
            .map(|t| ((t.cluster_name, t.namespace), t.name))
            .collect::<HashMap<_, _>>();
        let now = Utc::now();

        let mut changes = Changes::default();
        for Record {
            cluster,
            transaction,
        } in compact(records)
        {
            let (obj, deleted) = match transaction {
                Transaction::DeleteAll => {
                    changes.delete_all.push(cluster);
                    continue;
                }
                Transaction::Upsert(obj) => {
                    let deleted = is_terminating(&obj);
                    (obj, deleted)
                }
                Transaction::Delete(obj) => (obj, true),
            };

            let mut object = match to_object(&cluster, &obj, &self.kinds, &self.adapters) {
                Ok(object) => object,
                Err(error) => {
                    warn!(%cluster, name = %obj.name_any(), %error, "Skipping object");
                    continue;
                }
            };
            if let Err(error) = object.validate() {
                warn!(%cluster, %error, "Skipping invalid object");
                continue;
            }
            if let Some(tenant) = tenants.get(&(object.cluster.clone(), object.namespace.clone())) {
                object.tenant = tenant.clone();
            }

            if !deleted {
                changes.upserts.push(object);
            } else if self.kinds.retention_for(&object).is_some() {
                // Keep the time the deletion was first observed.
                let deleted_at = store
                    .get_object_by_id(&object.id())?
                    .and_then(|o| o.kubernetes_deleted_at);
                object.kubernetes_deleted_at = Some(deleted_at.unwrap_or(now));
                changes.upserts.push(object);
            } else {
                changes.deletes.push(object);
            }
        }
        Ok(changes)
    }
}

impl ProcessRecords for ObjectsProcessor {
    fn process(&self, records: Vec<Record>, store: &Store, index: &Indexer) -> anyhow::Result<()> {
        let Changes {
            delete_all,
            upserts,
            deletes,
        } = self.changes(records, store)?;

        if !delete_all.is_empty() {
            store
                .delete_all_objects(&delete_all)
                .context("failed to delete clusters' objects")?;
            for cluster in &delete_all {
                match index.remove_by_query(&format!("cluster:{cluster}")) {
                    Ok(n) => debug!(%cluster, documents = n, "Removed cluster from index"),
                    Err(error) => warn!(%cluster, %error, "Failed to remove cluster from index"),
                }
            }
        }

        if !upserts.is_empty() {
            store
                .store_objects(&upserts)
                .context("failed to store objects")?;
            if let Err(error) = index.add(&upserts) {
                warn!(%error, "Failed to index objects");
            }
        }

        if !deletes.is_empty() {
            store
                .delete_objects(&deletes)
                .context("failed to delete objects")?;
            if let Err(error) = index.remove(&deletes) {
                warn!(%error, "Failed to remove objects from index");
            }
        }

        debug!(
            clusters = delete_all.len(),
            upserts = upserts.len(),
            deletes = deletes.len(),
            "Wrote objects"
        );
        Ok(())
    }
}

impl std::fmt::Debug for ObjectsProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectsProcessor")
            .field("kinds", &self.kinds.len())
            .finish()
    }
}
