use crate::{record::compact, ProcessRecords, Record, Transaction};
use anyhow::Context;
use explorer_core::{
    rbac::{rbac_id, CLUSTER_ROLE_BINDING_KIND, CLUSTER_ROLE_KIND, ROLE_BINDING_KIND, ROLE_KIND},
    Role, RoleBinding,
};
use explorer_k8s_api::{
    convert::{gvk_of, is_terminating, to_role, to_role_binding},
    AdapterRegistry, DynamicObject, ResourceExt,
};
use explorer_store::{Indexer, Store};
use tracing::{debug, warn};

/// Writes the roles and bindings queries are authorized against.
#[derive(Clone)]
pub struct RolesProcessor {
    adapters: AdapterRegistry,
}

#[derive(Debug, Default)]
struct Changes {
    delete_all: Vec<String>,
    roles: Vec<Role>,
    bindings: Vec<RoleBinding>,
    deleted_roles: Vec<String>,
    deleted_bindings: Vec<String>,
}

// === impl RolesProcessor ===

impl RolesProcessor {
    pub fn new(adapters: AdapterRegistry) -> Self {
        Self { adapters }
    }

    fn changes(&self, records: Vec<Record>) -> Changes {
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

            let kind = match gvk_of(&obj) {
                Ok(gvk) => gvk.kind,
                Err(error) => {
                    warn!(%cluster, name = %obj.name_any(), %error, "Skipping object");
                    continue;
                }
            };

            match kind.as_str() {
                ROLE_KIND | CLUSTER_ROLE_KIND if deleted => {
                    changes.deleted_roles.push(id_of(&cluster, &kind, &obj));
                }
                ROLE_KIND | CLUSTER_ROLE_KIND => {
                    let role = to_role(&cluster, &obj, &self.adapters)
                        .map_err(anyhow::Error::from)
                        .and_then(|role| role.validate().map(|()| role).map_err(Into::into));
                    match role {
                        Ok(role) => changes.roles.push(role),
                        Err(error) => {
                            warn!(%cluster, name = %obj.name_any(), %error, "Skipping role")
                        }
                    }
                }
                ROLE_BINDING_KIND | CLUSTER_ROLE_BINDING_KIND if deleted => {
                    changes.deleted_bindings.push(id_of(&cluster, &kind, &obj));
                }
                ROLE_BINDING_KIND | CLUSTER_ROLE_BINDING_KIND => {
                    let binding = to_role_binding(&cluster, &obj, &self.adapters)
                        .map_err(anyhow::Error::from)
                        .and_then(|binding| {
                            binding.validate().map(|()| binding).map_err(Into::into)
                        });
                    match binding {
                        Ok(binding) => changes.bindings.push(binding),
                        Err(error) => {
                            warn!(%cluster, name = %obj.name_any(), %error, "Skipping binding")
                        }
                    }
                }
                _ => debug!(%cluster, %kind, "Ignoring unexpected kind"),
            }
        }
        changes
    }
}

impl ProcessRecords for RolesProcessor {
    fn process(&self, records: Vec<Record>, store: &Store, _: &Indexer) -> anyhow::Result<()> {
        let Changes {
            delete_all,
            roles,
            bindings,
            deleted_roles,
            deleted_bindings,
        } = self.changes(records);

        if !delete_all.is_empty() {
            store
                .delete_all_roles(&delete_all)
                .context("failed to delete clusters' roles")?;
            store
                .delete_all_role_bindings(&delete_all)
                .context("failed to delete clusters' role bindings")?;
        }
        if !roles.is_empty() {
            store.store_roles(&roles).context("failed to store roles")?;
        }
        if !bindings.is_empty() {
            store
                .store_role_bindings(&bindings)
                .context("failed to store role bindings")?;
        }
        if !deleted_roles.is_empty() {
            store
                .delete_roles_by_id(&deleted_roles)
                .context("failed to delete roles")?;
        }
        if !deleted_bindings.is_empty() {
            store
                .delete_role_bindings_by_id(&deleted_bindings)
                .context("failed to delete role bindings")?;
        }

        debug!(
            clusters = delete_all.len(),
            roles = roles.len(),
            bindings = bindings.len(),
            deleted = deleted_roles.len() + deleted_bindings.len(),
            "Wrote RBAC"
        );
        Ok(())
    }
}

impl std::fmt::Debug for RolesProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RolesProcessor").finish()
    }
}

/// Cluster-scoped kinds are stored without a namespace.
fn id_of(cluster: &str, kind: &str, obj: &DynamicObject) -> String {
    let namespace = match kind {
        CLUSTER_ROLE_KIND | CLUSTER_ROLE_BINDING_KIND => String::new(),
        _ => obj.namespace().unwrap_or_default(),
    };
    rbac_id(cluster, &namespace, kind, &obj.name_any())
}
