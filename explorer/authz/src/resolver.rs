use crate::AuthzError;
use ahash::AHashMap as HashMap;
use explorer_core::{
    rbac::{CLUSTER_ROLE_KIND, ROLE_KIND},
    PolicyRule, Principal, Role, RoleBinding, Subject, SubjectKind,
};

/// Resolves the policy rules that apply to a principal within one cluster.
///
/// Bindings reference roles by kind and name: a `ClusterRoleBinding` may only reference a
/// `ClusterRole`, and a `RoleBinding` may reference either a `ClusterRole` or a `Role` in its own
/// namespace. Cluster-wide bindings apply in every namespace; namespaced bindings only apply
/// to objects in their namespace.
#[derive(Debug)]
pub struct RuleResolver {
    cluster: String,
    roles: HashMap<(String, String), Role>,
    cluster_roles: HashMap<String, Role>,
    bindings: HashMap<String, Vec<RoleBinding>>,
    cluster_bindings: Vec<RoleBinding>,
}

/// The rules a principal holds in a namespace, plus any role references that could not be
/// resolved along the way.
#[derive(Debug, Default)]
pub struct ResolvedRules {
    pub rules: Vec<PolicyRule>,
    pub errors: Vec<AuthzError>,
}

const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

// === impl RuleResolver ===

impl RuleResolver {
    /// Builds a resolver from the roles and bindings of `cluster`. Rows from other clusters are
    /// ignored.
    pub fn new(
        cluster: impl Into<String>,
        roles: impl IntoIterator<Item = Role>,
        bindings: impl IntoIterator<Item = RoleBinding>,
    ) -> Self {
        let cluster = cluster.into();
        let mut resolver = Self {
            cluster,
            roles: HashMap::default(),
            cluster_roles: HashMap::default(),
            bindings: HashMap::default(),
            cluster_bindings: Vec::new(),
        };

        for role in roles.into_iter().filter(|r| r.cluster == resolver.cluster) {
            if role.is_cluster_role() {
                resolver.cluster_roles.insert(role.name.clone(), role);
            } else {
                resolver
                    .roles
                    .insert((role.namespace.clone(), role.name.clone()), role);
            }
        }

        for binding in bindings
            .into_iter()
            .filter(|b| b.cluster == resolver.cluster)
        {
            if binding.is_cluster_binding() {
                resolver.cluster_bindings.push(binding);
            } else {
                resolver
                    .bindings
                    .entry(binding.namespace.clone())
                    .or_default()
                    .push(binding);
            }
        }

        resolver
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn get_role(&self, namespace: &str, name: &str) -> Option<&Role> {
        self.roles.get(&(namespace.to_string(), name.to_string()))
    }

    pub fn get_cluster_role(&self, name: &str) -> Option<&Role> {
        self.cluster_roles.get(name)
    }

    pub fn list_role_bindings(&self, namespace: &str) -> &[RoleBinding] {
        self.bindings
            .get(namespace)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn list_cluster_role_bindings(&self) -> &[RoleBinding] {
        &self.cluster_bindings
    }

    /// Collects the rules granted to the principal in `namespace`.
    ///
    /// Cluster-wide grants come first, followed by grants in the namespace. An empty namespace
    /// only yields cluster-wide grants.
    pub fn rules_for(&self, principal: &Principal, namespace: &str) -> ResolvedRules {
        let mut rules = Vec::new();
        let mut errors = Vec::new();
        self.visit_rules_for(
            principal,
            namespace,
            |rule| {
                rules.push(rule.clone());
                true
            },
            |error| errors.push(error),
        );
        ResolvedRules { rules, errors }
    }

    /// Visits each rule granted to the principal in `namespace` until `visit` returns false.
    ///
    /// Bindings whose role cannot be found are reported to `on_error` and skipped.
    pub fn visit_rules_for(
        &self,
        principal: &Principal,
        namespace: &str,
        mut visit: impl FnMut(&PolicyRule) -> bool,
        mut on_error: impl FnMut(AuthzError),
    ) -> bool {
        let namespaced: &[RoleBinding] = if namespace.is_empty() {
            &[]
        } else {
            self.list_role_bindings(namespace)
        };

        for binding in self.cluster_bindings.iter().chain(namespaced) {
            if !binding.subjects.iter().any(|s| applies_to(s, principal)) {
                continue;
            }
            let role = match self.role_for(binding) {
                Ok(role) => role,
                Err(error) => {
                    on_error(error);
                    continue;
                }
            };
            for rule in &role.policy_rules {
                if !visit(rule) {
                    return false;
                }
            }
        }
        true
    }

    fn role_for(&self, binding: &RoleBinding) -> Result<&Role, AuthzError> {
        let role = match binding.role_ref.kind.as_str() {
            CLUSTER_ROLE_KIND => self.get_cluster_role(&binding.role_ref.name),
            ROLE_KIND if !binding.is_cluster_binding() => {
                self.get_role(&binding.namespace, &binding.role_ref.name)
            }
            _ => {
                return Err(AuthzError::UnsupportedRoleRef {
                    binding: binding.id(),
                    kind: binding.role_ref.kind.clone(),
                })
            }
        };
        role.ok_or_else(|| AuthzError::RoleNotFound {
            binding: binding.id(),
            kind: binding.role_ref.kind.clone(),
            name: binding.role_ref.name.clone(),
        })
    }
}

fn applies_to(subject: &Subject, principal: &Principal) -> bool {
    match subject.kind {
        SubjectKind::User => subject.name == principal.id,
        SubjectKind::Group => principal.groups.iter().any(|g| *g == subject.name),
        SubjectKind::ServiceAccount => principal
            .id
            .strip_prefix(SERVICE_ACCOUNT_PREFIX)
            .and_then(|rest| rest.split_once(':'))
            .is_some_and(|(ns, name)| ns == subject.namespace && name == subject.name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use explorer_core::RoleRef;

    fn subject(kind: SubjectKind, name: &str, ns: &str) -> Subject {
        Subject {
            kind,
            name: name.to_string(),
            namespace: ns.to_string(),
            api_group: String::new(),
        }
    }

    #[test]
    fn subjects_match_principals() {
        let principal = Principal::new("jane", ["ops", "dev"]);
        assert!(applies_to(&subject(SubjectKind::User, "jane", ""), &principal));
        assert!(!applies_to(&subject(SubjectKind::User, "ops", ""), &principal));
        assert!(applies_to(&subject(SubjectKind::Group, "dev", ""), &principal));
        assert!(!applies_to(&subject(SubjectKind::Group, "jane", ""), &principal));

        let sa = Principal::new("system:serviceaccount:flux-system:kustomize", Vec::<String>::new());
        assert!(applies_to(
            &subject(SubjectKind::ServiceAccount, "kustomize", "flux-system"),
            &sa
        ));
        assert!(!applies_to(
            &subject(SubjectKind::ServiceAccount, "kustomize", "default"),
            &sa
        ));
        assert!(!applies_to(
            &subject(SubjectKind::ServiceAccount, "kustomize", "flux-system"),
            &principal
        ));
    }

    #[test]
    fn unresolvable_references_are_reported() {
        let binding = RoleBinding {
            cluster: "c".to_string(),
            namespace: String::new(),
            kind: "ClusterRoleBinding".to_string(),
            name: "b".to_string(),
            role_ref: RoleRef {
                kind: "Role".to_string(),
                name: "r".to_string(),
            },
            subjects: vec![subject(SubjectKind::User, "jane", "")],
        };
        let missing = RoleBinding {
            kind: "RoleBinding".to_string(),
            namespace: "ns".to_string(),
            name: "m".to_string(),
            ..binding.clone()
        };
        let resolver = RuleResolver::new("c", vec![], vec![binding, missing]);
        let resolved = resolver.rules_for(&Principal::new("jane", Vec::<String>::new()), "ns");
        assert!(resolved.rules.is_empty());
        assert!(matches!(
            resolved.errors.as_slice(),
            [
                AuthzError::UnsupportedRoleRef { .. },
                AuthzError::RoleNotFound { .. }
            ]
        ));
    }
}
