use crate::{record::compact, ProcessRecords, Record, Transaction};
use ahash::AHashMap as HashMap;
use anyhow::Context;
use explorer_k8s_api::{
    convert::{gvk_of, is_terminating, to_tenant},
    ResourceExt,
};
use explorer_store::{Indexer, Store};
use tracing::debug;

/// Derives tenants from the namespaces that carry the tenancy label.
#[derive(Clone, Debug, Default)]
pub struct TenantsProcessor(());

const NAMESPACE_KIND: &str = "Namespace";

impl TenantsProcessor {
    pub fn new() -> Self {
        Self(())
    }
}

impl ProcessRecords for TenantsProcessor {
    fn process(&self, records: Vec<Record>, store: &Store, _: &Indexer) -> anyhow::Result<()> {
        let mut delete_all = Vec::new();
        let mut changed = HashMap::<String, Vec<String>>::default();
        let mut tenants = Vec::new();

        for Record {
            cluster,
            transaction,
        } in compact(records)
        {
            let (obj, deleted) = match transaction {
                Transaction::DeleteAll => {
                    delete_all.push(cluster);
                    continue;
                }
                Transaction::Upsert(obj) => {
                    let deleted = is_terminating(&obj);
                    (obj, deleted)
                }
                Transaction::Delete(obj) => (obj, true),
            };
            if !gvk_of(&obj).is_ok_and(|gvk| gvk.group.is_empty() && gvk.kind == NAMESPACE_KIND) {
                debug!(%cluster, name = %obj.name_any(), "Ignoring non-namespace object");
                continue;
            }

            // Rows derived from an earlier version of the namespace are replaced.
            changed
                .entry(cluster.clone())
                .or_default()
                .push(obj.name_any());
            if !deleted {
                tenants.extend(to_tenant(&cluster, &obj));
            }
        }

        if !delete_all.is_empty() {
            store
                .delete_all_tenants(&delete_all)
                .context("failed to delete clusters' tenants")?;
        }
        for (cluster, namespaces) in &changed {
            store
                .delete_tenants_for_namespaces(cluster, namespaces)
                .context("failed to delete tenants")?;
        }
        if !tenants.is_empty() {
            store
                .store_tenants(&tenants)
                .context("failed to store tenants")?;
        }

        debug!(
            clusters = delete_all.len(),
            namespaces = changed.values().map(Vec::len).sum::<usize>(),
            tenants = tenants.len(),
            "Wrote tenants"
        );
        Ok(())
    }
}
