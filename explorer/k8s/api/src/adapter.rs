//! Uniform accessors over the kinds the explorer collects.
//!
//! Adapters are constructed through an [`AdapterRegistry`] keyed by kind name, so supporting a new
//! kind means registering a constructor rather than changing dispatch code.

use crate::rbac;
use ahash::AHashMap as HashMap;
use explorer_core::{self as core, ObjectStatus, SubjectKind};
use k8s_openapi::api::core::v1 as corev1;
use kube::core::DynamicObject;
use serde::Deserialize;

/// Reads domain attributes out of a collected resource.
pub trait ObjectAdapter: Send + Sync {
    fn status(&self) -> String {
        ObjectStatus::NoStatus.to_string()
    }

    fn message(&self) -> String {
        String::new()
    }

    fn conditions(&self) -> &[Condition] {
        &[]
    }

    fn rules(&self) -> Vec<core::PolicyRule> {
        Vec::new()
    }

    fn subjects(&self) -> Vec<core::Subject> {
        Vec::new()
    }

    fn role_ref(&self) -> Option<core::RoleRef> {
        None
    }
}

pub type NewAdapter = fn(&DynamicObject) -> Result<Box<dyn ObjectAdapter>, AdapterError>;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("failed to decode {kind}: {source}")]
    Decode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Maps kind names to adapter constructors. Unregistered kinds are read through their status
/// conditions.
#[derive(Clone)]
pub struct AdapterRegistry {
    by_kind: HashMap<String, NewAdapter>,
    fallback: NewAdapter,
}

/// A `status.conditions` entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

/// Flux resources report readiness through a `Ready` condition and may be suspended.
#[derive(Debug, Default)]
pub struct ConditionsAdapter {
    conditions: Vec<Condition>,
    suspended: bool,
}

#[derive(Debug)]
pub struct EventAdapter {
    event: corev1::Event,
}

#[derive(Debug)]
pub struct RoleAdapter {
    rules: Vec<rbac::PolicyRule>,
}

#[derive(Debug)]
pub struct BindingAdapter {
    role_ref: rbac::RoleRef,
    subjects: Vec<rbac::Subject>,
}

// === impl AdapterRegistry ===

impl Default for AdapterRegistry {
    fn default() -> Self {
        let mut registry = Self::new(ConditionsAdapter::adapt);
        registry.register("Event", EventAdapter::adapt);
        registry.register("Role", RoleAdapter::adapt_role);
        registry.register("ClusterRole", RoleAdapter::adapt_cluster_role);
        registry.register("RoleBinding", BindingAdapter::adapt_role_binding);
        registry.register("ClusterRoleBinding", BindingAdapter::adapt_cluster_role_binding);
        registry
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("kinds", &self.by_kind.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AdapterRegistry {
    pub fn new(fallback: NewAdapter) -> Self {
        Self {
            by_kind: HashMap::default(),
            fallback,
        }
    }

    pub fn register(&mut self, kind: impl Into<String>, new: NewAdapter) {
        self.by_kind.insert(kind.into(), new);
    }

    pub fn adapt(&self, obj: &DynamicObject) -> Result<Box<dyn ObjectAdapter>, AdapterError> {
        let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("");
        let new = self.by_kind.get(kind).copied().unwrap_or(self.fallback);
        new(obj)
    }
}

fn decode<T: serde::de::DeserializeOwned>(obj: &DynamicObject) -> Result<T, AdapterError> {
    let kind = || {
        obj.types
            .as_ref()
            .map(|t| t.kind.clone())
            .unwrap_or_default()
    };
    let value = serde_json::to_value(obj).map_err(|source| AdapterError::Decode {
        kind: kind(),
        source,
    })?;
    serde_json::from_value(value).map_err(|source| AdapterError::Decode {
        kind: kind(),
        source,
    })
}

// === impl ConditionsAdapter ===

impl ConditionsAdapter {
    pub fn adapt(obj: &DynamicObject) -> Result<Box<dyn ObjectAdapter>, AdapterError> {
        // Malformed conditions are ignored rather than failing the whole object.
        let conditions = obj
            .data
            .pointer("/status/conditions")
            .cloned()
            .and_then(|c| serde_json::from_value::<Vec<Condition>>(c).ok())
            .unwrap_or_default();
        let suspended = obj
            .data
            .pointer("/spec/suspend")
            .and_then(|s| s.as_bool())
            .unwrap_or(false);
        Ok(Box::new(Self {
            conditions,
            suspended,
        }))
    }

    fn ready(&self) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == "Ready")
    }
}

impl ObjectAdapter for ConditionsAdapter {
    fn status(&self) -> String {
        let status = if self.suspended {
            ObjectStatus::Suspended
        } else {
            match self.ready().map(|c| c.status.as_str()) {
                Some("True") => ObjectStatus::Success,
                Some("False") => ObjectStatus::Failed,
                Some(_) => ObjectStatus::Reconciling,
                None => ObjectStatus::NoStatus,
            }
        };
        status.to_string()
    }

    fn message(&self) -> String {
        self.ready().map(|c| c.message.clone()).unwrap_or_default()
    }

    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
}

// === impl EventAdapter ===

impl EventAdapter {
    pub fn adapt(obj: &DynamicObject) -> Result<Box<dyn ObjectAdapter>, AdapterError> {
        let event = decode::<corev1::Event>(obj)?;
        Ok(Box::new(Self { event }))
    }
}

impl ObjectAdapter for EventAdapter {
    fn status(&self) -> String {
        self.event.type_.clone().unwrap_or_default()
    }

    fn message(&self) -> String {
        self.event.message.clone().unwrap_or_default()
    }
}

// === impl RoleAdapter ===

impl RoleAdapter {
    pub fn adapt_role(obj: &DynamicObject) -> Result<Box<dyn ObjectAdapter>, AdapterError> {
        let role = decode::<rbac::Role>(obj)?;
        Ok(Box::new(Self {
            rules: role.rules.unwrap_or_default(),
        }))
    }

    pub fn adapt_cluster_role(obj: &DynamicObject) -> Result<Box<dyn ObjectAdapter>, AdapterError> {
        let role = decode::<rbac::ClusterRole>(obj)?;
        Ok(Box::new(Self {
            rules: role.rules.unwrap_or_default(),
        }))
    }
}

impl ObjectAdapter for RoleAdapter {
    fn rules(&self) -> Vec<core::PolicyRule> {
        self.rules
            .iter()
            .map(|rule| core::PolicyRule {
                api_groups: rule.api_groups.clone().unwrap_or_default(),
                resources: rule.resources.clone().unwrap_or_default(),
                verbs: rule.verbs.clone(),
                resource_names: rule.resource_names.clone().unwrap_or_default(),
            })
            .collect()
    }
}

// === impl BindingAdapter ===

impl BindingAdapter {
    pub fn adapt_role_binding(obj: &DynamicObject) -> Result<Box<dyn ObjectAdapter>, AdapterError> {
        let binding = decode::<rbac::RoleBinding>(obj)?;
        Ok(Box::new(Self {
            role_ref: binding.role_ref,
            subjects: binding.subjects.unwrap_or_default(),
        }))
    }

    pub fn adapt_cluster_role_binding(
        obj: &DynamicObject,
    ) -> Result<Box<dyn ObjectAdapter>, AdapterError> {
        let binding = decode::<rbac::ClusterRoleBinding>(obj)?;
        Ok(Box::new(Self {
            role_ref: binding.role_ref,
            subjects: binding.subjects.unwrap_or_default(),
        }))
    }
}

impl ObjectAdapter for BindingAdapter {
    fn subjects(&self) -> Vec<core::Subject> {
        self.subjects
            .iter()
            .filter_map(|s| {
                let kind = match s.kind.parse::<SubjectKind>() {
                    Ok(kind) => kind,
                    Err(error) => {
                        tracing::debug!(%error, name = %s.name, "Ignoring subject");
                        return None;
                    }
                };
                Some(core::Subject {
                    kind,
                    name: s.name.clone(),
                    namespace: s.namespace.clone().unwrap_or_default(),
                    api_group: s.api_group.clone().unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Decoding fills a missing `roleRef` with empty fields, which reference nothing.
    fn role_ref(&self) -> Option<core::RoleRef> {
        if self.role_ref.kind.is_empty() || self.role_ref.name.is_empty() {
            return None;
        }
        Some(core::RoleRef {
            kind: self.role_ref.kind.clone(),
            name: self.role_ref.name.clone(),
        })
    }
}
