use crate::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Coarse classification of a collected object, used to group objects in listings.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Automation,
    Source,
    Event,
    Template,
}

/// Summarizes an object's readiness.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ObjectStatus {
    Success,
    Failed,
    Reconciling,
    Suspended,
    NoStatus,
}

/// A resource collected from a cluster.
///
/// Objects are keyed by [`Object::id`]; writing an object with the same identity replaces the
/// previous row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Object {
    pub cluster: String,
    pub namespace: String,
    pub api_group: String,
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub status: String,
    pub message: String,
    pub category: Option<Category>,
    pub tenant: String,

    /// The resource as it was read from the cluster.
    pub unstructured: serde_json::Value,

    /// Set once the resource has been deleted from its cluster. Unset while it is live.
    pub kubernetes_deleted_at: Option<DateTime<Utc>>,
}

// === impl Category ===

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automation => "automation",
            Self::Source => "source",
            Self::Event => "event",
            Self::Template => "template",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "automation" => Ok(Self::Automation),
            "source" => Ok(Self::Source),
            "event" => Ok(Self::Event),
            "template" => Ok(Self::Template),
            _ => Err(format!("unknown category: {s}")),
        }
    }
}

// === impl ObjectStatus ===

impl ObjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Failed => "Failed",
            Self::Reconciling => "Reconciling",
            Self::Suspended => "Suspended",
            Self::NoStatus => "-",
        }
    }
}

impl fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Object ===

impl Object {
    /// Derives the object's identity.
    pub fn id(&self) -> String {
        object_id(
            &self.cluster,
            &self.namespace,
            &self.api_group,
            &self.api_version,
            &self.kind,
            &self.name,
        )
    }

    /// Every collected kind is namespaced, so the namespace is part of an object's identity.
    pub fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::check("object", "cluster", &self.cluster)?;
        ValidationError::check("object", "namespace", &self.namespace)?;
        ValidationError::check("object", "name", &self.name)?;
        ValidationError::check("object", "kind", &self.kind)?;
        Ok(())
    }

    pub fn is_deleted(&self) -> bool {
        self.kubernetes_deleted_at.is_some()
    }

    /// The `group/version` string the resource was served under.
    pub fn api_version_string(&self) -> String {
        if self.api_group.is_empty() {
            self.api_version.clone()
        } else {
            format!("{}/{}", self.api_group, self.api_version)
        }
    }
}

pub fn object_id(
    cluster: &str,
    namespace: &str,
    group: &str,
    version: &str,
    kind: &str,
    name: &str,
) -> String {
    format!("{cluster}/{namespace}/{group}/{version}/{kind}/{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_object() -> Object {
        Object {
            cluster: "cluster-a".to_string(),
            namespace: "flux-system".to_string(),
            api_group: "helm.toolkit.fluxcd.io".to_string(),
            api_version: "v2".to_string(),
            kind: "HelmRelease".to_string(),
            name: "podinfo".to_string(),
            status: ObjectStatus::Success.to_string(),
            message: String::new(),
            category: Some(Category::Automation),
            tenant: String::new(),
            unstructured: serde_json::Value::Null,
            kubernetes_deleted_at: None,
        }
    }

    #[test]
    fn id_covers_every_identity_field() {
        let obj = mk_object();
        assert_eq!(
            obj.id(),
            "cluster-a/flux-system/helm.toolkit.fluxcd.io/v2/HelmRelease/podinfo"
        );

        let mut other = obj.clone();
        other.api_version = "v2beta2".to_string();
        assert_ne!(obj.id(), other.id());
    }

    #[test]
    fn validate_requires_identity() {
        assert!(mk_object().validate().is_ok());

        let mut obj = mk_object();
        obj.cluster.clear();
        assert_eq!(
            obj.validate(),
            Err(ValidationError {
                kind: "object",
                field: "cluster"
            })
        );

        let mut obj = mk_object();
        obj.name.clear();
        assert!(obj.validate().is_err());

        let mut obj = mk_object();
        obj.kind.clear();
        assert!(obj.validate().is_err());

        let mut obj = mk_object();
        obj.namespace.clear();
        assert_eq!(
            obj.validate(),
            Err(ValidationError {
                kind: "object",
                field: "namespace"
            })
        );
    }

    #[test]
    fn api_version_string() {
        let mut obj = mk_object();
        assert_eq!(obj.api_version_string(), "helm.toolkit.fluxcd.io/v2");
        obj.api_group.clear();
        obj.api_version = "v1".to_string();
        assert_eq!(obj.api_version_string(), "v1");
    }

    #[test]
    fn category_strings() {
        for cat in [
            Category::Automation,
            Category::Source,
            Category::Event,
            Category::Template,
        ] {
            assert_eq!(cat.as_str().parse::<Category>(), Ok(cat));
        }
        assert!("other".parse::<Category>().is_err());
    }
}
