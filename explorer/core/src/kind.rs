use crate::{object::Object, Category, RetentionDuration};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

/// The type identity of a resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

/// A kind the explorer collects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectKind {
    pub gvk: GroupVersionKind,

    /// The resource name the kind is served under, e.g. `helmreleases`. RBAC rules match on it.
    pub plural: String,
    pub namespaced: bool,
    pub category: Category,

    /// Deleted objects of this kind are kept for this long. Without a retention window, deleted
    /// objects are removed right away and never expire through a retention sweep.
    pub retention: Option<RetentionDuration>,
}

/// The set of kinds the explorer collects.
///
/// Built once at startup and passed explicitly to the collectors, the authorizer and the
/// retention manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KindConfig {
    kinds: Vec<ObjectKind>,
}

/// A `Kind=duration` retention override.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KindRetention {
    pub kind: String,
    pub retention: RetentionDuration,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KindConfigError {
    #[error("unknown kind: {0}")]
    UnknownKind(String),

    #[error("expected KIND=DURATION, got {0:?}")]
    MalformedRetention(String),

    #[error("invalid retention for {kind}: {source}")]
    InvalidRetention {
        kind: String,
        #[source]
        source: crate::RetentionParseError,
    },
}

// === impl GroupVersionKind ===

impl GroupVersionKind {
    pub fn gvk(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Splits an `apiVersion` string such as `helm.toolkit.fluxcd.io/v2` or `v1`.
    pub fn from_api_version(api_version: &str, kind: impl Into<String>) -> Self {
        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        };
        Self::gvk(group, version, kind)
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

// === impl ObjectKind ===

impl ObjectKind {
    pub fn new(
        group: &str,
        version: &str,
        kind: &str,
        plural: &str,
        category: Category,
    ) -> Self {
        Self {
            gvk: GroupVersionKind::gvk(group, version, kind),
            plural: plural.to_string(),
            namespaced: true,
            category,
            retention: None,
        }
    }

    pub fn with_retention(mut self, retention: impl Into<RetentionDuration>) -> Self {
        self.retention = Some(retention.into());
        self
    }
}

// === impl KindConfig ===

impl Default for KindConfig {
    /// The Flux kinds plus core events.
    fn default() -> Self {
        Self::new(vec![
            ObjectKind::new(
                "helm.toolkit.fluxcd.io",
                "v2",
                "HelmRelease",
                "helmreleases",
                Category::Automation,
            ),
            ObjectKind::new(
                "kustomize.toolkit.fluxcd.io",
                "v1",
                "Kustomization",
                "kustomizations",
                Category::Automation,
            ),
            ObjectKind::new(
                "source.toolkit.fluxcd.io",
                "v1",
                "GitRepository",
                "gitrepositories",
                Category::Source,
            ),
            ObjectKind::new(
                "source.toolkit.fluxcd.io",
                "v1beta2",
                "OCIRepository",
                "ocirepositories",
                Category::Source,
            ),
            ObjectKind::new(
                "source.toolkit.fluxcd.io",
                "v1",
                "HelmRepository",
                "helmrepositories",
                Category::Source,
            ),
            ObjectKind::new(
                "source.toolkit.fluxcd.io",
                "v1",
                "HelmChart",
                "helmcharts",
                Category::Source,
            ),
            ObjectKind::new(
                "source.toolkit.fluxcd.io",
                "v1beta2",
                "Bucket",
                "buckets",
                Category::Source,
            ),
            ObjectKind::new("", "v1", "Event", "events", Category::Event)
                .with_retention(Duration::from_secs(60 * 60)),
        ])
    }
}

impl KindConfig {
    pub fn new(kinds: Vec<ObjectKind>) -> Self {
        Self { kinds }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectKind> {
        self.kinds.iter()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Finds a kind by group and kind name. Versions are not compared so that objects served
    /// under another version of a kind share its settings.
    pub fn find(&self, group: &str, kind: &str) -> Option<&ObjectKind> {
        self.kinds
            .iter()
            .find(|k| k.gvk.group == group && k.gvk.kind == kind)
    }

    pub fn find_object(&self, obj: &Object) -> Option<&ObjectKind> {
        self.find(&obj.api_group, &obj.kind)
    }

    pub fn retention_for(&self, obj: &Object) -> Option<Duration> {
        self.find_object(obj)
            .and_then(|k| k.retention)
            .map(|r| r.as_duration())
    }

    /// Applies a retention override to every registered kind with the given name.
    pub fn set_retention(&mut self, over: &KindRetention) -> Result<(), KindConfigError> {
        let mut found = false;
        for kind in self.kinds.iter_mut().filter(|k| k.gvk.kind == over.kind) {
            kind.retention = Some(over.retention);
            found = true;
        }
        if !found {
            return Err(KindConfigError::UnknownKind(over.kind.clone()));
        }
        Ok(())
    }
}

// === impl KindRetention ===

impl FromStr for KindRetention {
    type Err = KindConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, retention) = s
            .split_once('=')
            .ok_or_else(|| KindConfigError::MalformedRetention(s.to_string()))?;
        let kind = kind.trim();
        if kind.is_empty() {
            return Err(KindConfigError::MalformedRetention(s.to_string()));
        }
        let retention = retention
            .parse()
            .map_err(|source| KindConfigError::InvalidRetention {
                kind: kind.to_string(),
                source,
            })?;
        Ok(Self {
            kind: kind.to_string(),
            retention,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_api_versions() {
        assert_eq!(
            GroupVersionKind::from_api_version("helm.toolkit.fluxcd.io/v2", "HelmRelease"),
            GroupVersionKind::gvk("helm.toolkit.fluxcd.io", "v2", "HelmRelease")
        );
        assert_eq!(
            GroupVersionKind::from_api_version("v1", "Event"),
            GroupVersionKind::gvk("", "v1", "Event")
        );
        assert_eq!(GroupVersionKind::gvk("", "v1", "Event").api_version(), "v1");
    }

    #[test]
    fn finds_kinds_regardless_of_version() {
        let config = KindConfig::default();
        let hr = config.find("helm.toolkit.fluxcd.io", "HelmRelease").unwrap();
        assert_eq!(hr.plural, "helmreleases");
        assert_eq!(hr.category, Category::Automation);
        assert!(config.find("", "HelmRelease").is_none());
    }

    #[test]
    fn retention_overrides() {
        let mut config = KindConfig::default();
        assert_eq!(
            config
                .find("", "Event")
                .and_then(|k| k.retention)
                .map(|r| r.as_duration()),
            Some(Duration::from_secs(3600))
        );

        let over = "HelmRelease=2h".parse::<KindRetention>().unwrap();
        config.set_retention(&over).unwrap();
        assert_eq!(
            config
                .find("helm.toolkit.fluxcd.io", "HelmRelease")
                .and_then(|k| k.retention)
                .map(|r| r.as_duration()),
            Some(Duration::from_secs(2 * 3600))
        );

        let unknown = "Widget=1h".parse::<KindRetention>().unwrap();
        assert_eq!(
            config.set_retention(&unknown),
            Err(KindConfigError::UnknownKind("Widget".to_string()))
        );
    }

    #[test]
    fn parses_retention_overrides() {
        assert!("HelmRelease".parse::<KindRetention>().is_err());
        assert!("=1h".parse::<KindRetention>().is_err());
        assert!(matches!(
            "Event=soon".parse::<KindRetention>(),
            Err(KindConfigError::InvalidRetention { .. })
        ));
    }
}
