use crate::adapter::{AdapterError, AdapterRegistry};
use explorer_core::{
    self as core, rbac::CLUSTER_ROLE_BINDING_KIND, rbac::CLUSTER_ROLE_KIND, GroupVersionKind,
    KindConfig, TENANT_LABEL,
};
use kube::core::DynamicObject;
use kube::ResourceExt;

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("object has no apiVersion/kind")]
    MissingTypeMeta,

    #[error("{kind} does not reference a role")]
    MissingRoleRef { kind: String },

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("failed to encode object: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Reads the type of a collected resource.
pub fn gvk_of(obj: &DynamicObject) -> Result<GroupVersionKind, ConvertError> {
    let types = obj.types.as_ref().ok_or(ConvertError::MissingTypeMeta)?;
    if types.kind.is_empty() {
        return Err(ConvertError::MissingTypeMeta);
    }
    Ok(GroupVersionKind::from_api_version(
        &types.api_version,
        types.kind.clone(),
    ))
}

/// Whether the resource is being deleted, e.g. while finalizers are pending.
pub fn is_terminating(obj: &DynamicObject) -> bool {
    obj.metadata.deletion_timestamp.is_some()
}

/// Builds a catalogue row for a resource collected from `cluster`.
///
/// The tenant and deletion timestamp are left for the caller to fill in.
pub fn to_object(
    cluster: &str,
    obj: &DynamicObject,
    kinds: &KindConfig,
    adapters: &AdapterRegistry,
) -> Result<core::Object, ConvertError> {
    let gvk = gvk_of(obj)?;
    let adapter = adapters.adapt(obj)?;
    let category = kinds.find(&gvk.group, &gvk.kind).map(|k| k.category);
    Ok(core::Object {
        cluster: cluster.to_string(),
        namespace: obj.namespace().unwrap_or_default(),
        api_group: gvk.group,
        api_version: gvk.version,
        kind: gvk.kind,
        name: obj.name_any(),
        status: adapter.status(),
        message: adapter.message(),
        category,
        tenant: String::new(),
        unstructured: serde_json::to_value(obj)?,
        kubernetes_deleted_at: None,
    })
}

pub fn to_role(
    cluster: &str,
    obj: &DynamicObject,
    adapters: &AdapterRegistry,
) -> Result<core::Role, ConvertError> {
    let gvk = gvk_of(obj)?;
    let adapter = adapters.adapt(obj)?;
    let namespace = if gvk.kind == CLUSTER_ROLE_KIND {
        String::new()
    } else {
        obj.namespace().unwrap_or_default()
    };
    Ok(core::Role {
        cluster: cluster.to_string(),
        namespace,
        kind: gvk.kind,
        name: obj.name_any(),
        policy_rules: adapter.rules(),
    })
}

pub fn to_role_binding(
    cluster: &str,
    obj: &DynamicObject,
    adapters: &AdapterRegistry,
) -> Result<core::RoleBinding, ConvertError> {
    let gvk = gvk_of(obj)?;
    let adapter = adapters.adapt(obj)?;
    let role_ref = adapter
        .role_ref()
        .ok_or_else(|| ConvertError::MissingRoleRef {
            kind: gvk.kind.clone(),
        })?;
    let namespace = if gvk.kind == CLUSTER_ROLE_BINDING_KIND {
        String::new()
    } else {
        obj.namespace().unwrap_or_default()
    };
    Ok(core::RoleBinding {
        cluster: cluster.to_string(),
        namespace,
        kind: gvk.kind,
        name: obj.name_any(),
        role_ref,
        subjects: adapter.subjects(),
    })
}

/// Derives a tenant row from a namespace, if the namespace carries the tenancy label.
pub fn to_tenant(cluster: &str, namespace: &DynamicObject) -> Option<core::Tenant> {
    let name = namespace.labels().get(TENANT_LABEL)?;
    if name.is_empty() {
        return None;
    }
    Some(core::Tenant {
        cluster_name: cluster.to_string(),
        name: name.clone(),
        namespace: namespace.name_any(),
    })
}
