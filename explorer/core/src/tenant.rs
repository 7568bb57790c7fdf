use crate::ValidationError;
use serde::{Deserialize, Serialize};

/// A namespace that carries the tenancy label.
///
/// A tenant spanning several namespaces is represented by one row per namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub cluster_name: String,
    pub name: String,
    pub namespace: String,
}

impl Tenant {
    pub fn id(&self) -> String {
        format!("{}/{}/{}", self.cluster_name, self.name, self.namespace)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::check("tenant", "clusterName", &self.cluster_name)?;
        ValidationError::check("tenant", "name", &self.name)?;
        ValidationError::check("tenant", "namespace", &self.namespace)?;
        Ok(())
    }
}
