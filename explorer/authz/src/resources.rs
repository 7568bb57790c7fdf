use ahash::AHashMap as HashMap;
use explorer_core::KindConfig;

/// Maps collected kinds to the resource names RBAC rules refer to.
#[derive(Clone, Debug, Default)]
pub struct ResourceMap {
    by_kind: HashMap<(String, String), String>,
}

impl ResourceMap {
    pub fn new(kinds: &KindConfig) -> Self {
        let by_kind = kinds
            .iter()
            .map(|k| ((k.gvk.group.clone(), k.gvk.kind.clone()), k.plural.clone()))
            .collect();
        Self { by_kind }
    }

    /// Returns the resource name of a kind, if the kind is collected.
    pub fn resource_for(&self, group: &str, kind: &str) -> Option<&str> {
        self.by_kind
            .get(&(group.to_string(), kind.to_string()))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_kind.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}

impl From<&KindConfig> for ResourceMap {
    fn from(kinds: &KindConfig) -> Self {
        Self::new(kinds)
    }
}
