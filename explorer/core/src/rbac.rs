use crate::{ValidationError, LIST_VERB, WILDCARD};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt, str::FromStr};

pub const ROLE_KIND: &str = "Role";
pub const CLUSTER_ROLE_KIND: &str = "ClusterRole";
pub const ROLE_BINDING_KIND: &str = "RoleBinding";
pub const CLUSTER_ROLE_BINDING_KIND: &str = "ClusterRoleBinding";

/// An authenticated caller.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub groups: Vec<String>,
}

/// A Role or ClusterRole collected from a cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub cluster: String,
    pub namespace: String,
    pub kind: String,
    pub name: String,
    pub policy_rules: Vec<PolicyRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    pub api_groups: Vec<String>,
    pub resources: Vec<String>,
    pub verbs: Vec<String>,

    /// Empty when the rule applies to every name.
    pub resource_names: Vec<String>,
}

/// A RoleBinding or ClusterRoleBinding collected from a cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleBinding {
    pub cluster: String,
    pub namespace: String,
    pub kind: String,
    pub name: String,
    pub role_ref: RoleRef,
    pub subjects: Vec<Subject>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleRef {
    pub kind: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub kind: SubjectKind,
    pub name: String,
    pub namespace: String,
    pub api_group: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectKind {
    User,
    Group,
    ServiceAccount,
}

/// A flattened view of what a subject can list in a namespace.
///
/// Computed from roles and bindings on demand; never written on its own.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRule {
    pub cluster: String,
    /// Empty for rules granted cluster-wide.
    pub namespace: String,
    pub principal: String,
    pub accessible_kinds: Vec<String>,
}

// === impl Principal ===

impl Principal {
    pub fn new(id: impl Into<String>, groups: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            id: id.into(),
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (groups: {})", self.id, self.groups.join(","))
    }
}

// === impl Role ===

impl Role {
    pub fn id(&self) -> String {
        rbac_id(&self.cluster, &self.namespace, &self.kind, &self.name)
    }

    pub fn is_cluster_role(&self) -> bool {
        self.kind == CLUSTER_ROLE_KIND
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::check("role", "cluster", &self.cluster)?;
        ValidationError::check("role", "name", &self.name)?;
        ValidationError::check("role", "kind", &self.kind)?;
        if !self.is_cluster_role() {
            ValidationError::check("role", "namespace", &self.namespace)?;
        }
        Ok(())
    }
}

// === impl PolicyRule ===

impl PolicyRule {
    pub fn allows_verb(&self, verb: &str) -> bool {
        self.verbs.iter().any(|v| v == verb || v == WILDCARD)
    }

    pub fn matches_api_group(&self, group: &str) -> bool {
        self.api_groups.iter().any(|g| g == group || g == WILDCARD)
    }

    pub fn matches_resource(&self, resource: &str) -> bool {
        self.resources.iter().any(|r| r == resource || r == WILDCARD)
    }

    pub fn matches_resource_name(&self, name: &str) -> bool {
        self.resource_names.is_empty()
            || self.resource_names.iter().any(|n| n == name || n == WILDCARD)
    }
}

// === impl RoleBinding ===

impl RoleBinding {
    pub fn id(&self) -> String {
        rbac_id(&self.cluster, &self.namespace, &self.kind, &self.name)
    }

    pub fn is_cluster_binding(&self) -> bool {
        self.kind == CLUSTER_ROLE_BINDING_KIND
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::check("role binding", "cluster", &self.cluster)?;
        ValidationError::check("role binding", "name", &self.name)?;
        ValidationError::check("role binding", "kind", &self.kind)?;
        if !self.is_cluster_binding() {
            ValidationError::check("role binding", "namespace", &self.namespace)?;
        }
        ValidationError::check("role binding", "roleRef.kind", &self.role_ref.kind)?;
        ValidationError::check("role binding", "roleRef.name", &self.role_ref.name)?;
        Ok(())
    }
}

// === impl Subject ===

impl Subject {
    /// The name under which the subject appears in projections, e.g. `group:ops`.
    pub fn principal_name(&self) -> String {
        match self.kind {
            SubjectKind::User => format!("user:{}", self.name),
            SubjectKind::Group => format!("group:{}", self.name),
            SubjectKind::ServiceAccount => {
                format!("system:serviceaccount:{}:{}", self.namespace, self.name)
            }
        }
    }
}

// === impl SubjectKind ===

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Group => "Group",
            Self::ServiceAccount => "ServiceAccount",
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "User" => Ok(Self::User),
            "Group" => Ok(Self::Group),
            "ServiceAccount" => Ok(Self::ServiceAccount),
            _ => Err(format!("unknown subject kind: {s}")),
        }
    }
}

// === impl AccessRule ===

impl AccessRule {
    /// Joins bindings with the roles they reference.
    ///
    /// A binding references a role by kind and name in its own cluster; a `Role` reference is
    /// additionally scoped to the binding's namespace. Bindings whose role cannot be found are
    /// skipped, as are rules that do not grant `list`.
    pub fn project(roles: &[Role], bindings: &[RoleBinding]) -> Vec<AccessRule> {
        let mut rules = Vec::new();
        for binding in bindings {
            let role = roles.iter().find(|r| {
                r.cluster == binding.cluster
                    && r.kind == binding.role_ref.kind
                    && r.name == binding.role_ref.name
                    && (r.is_cluster_role() || r.namespace == binding.namespace)
            });
            let Some(role) = role else {
                continue;
            };

            let kinds = role
                .policy_rules
                .iter()
                .filter(|rule| rule.allows_verb(LIST_VERB))
                .flat_map(|rule| {
                    rule.api_groups.iter().flat_map(move |group| {
                        rule.resources
                            .iter()
                            .map(move |resource| format!("{group}/{resource}"))
                    })
                })
                .collect::<BTreeSet<_>>();
            if kinds.is_empty() {
                continue;
            }

            let namespace = if binding.is_cluster_binding() {
                String::new()
            } else {
                binding.namespace.clone()
            };
            for subject in &binding.subjects {
                rules.push(AccessRule {
                    cluster: binding.cluster.clone(),
                    namespace: namespace.clone(),
                    principal: subject.principal_name(),
                    accessible_kinds: kinds.iter().cloned().collect(),
                });
            }
        }
        rules
    }
}

pub fn rbac_id(cluster: &str, namespace: &str, kind: &str, name: &str) -> String {
    format!("{cluster}/{namespace}/{kind}/{name}")
}
