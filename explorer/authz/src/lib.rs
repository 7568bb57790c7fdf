//! Per-principal access control for the explorer's catalogue.
//!
//! Visibility follows the collected RBAC resources of each object's cluster, resolved the same way
//! the cluster's own API server resolves them. Queries are listings, so every object is checked
//! against the `list` verb on the object's resource. Kinds without a known resource name are never
//! visible.
//!
//! A [`RequestAuthorizer`] is built for one query request. It builds one [`RuleResolver`] per
//! cluster it is asked about and caches the rules it resolves per namespace; it is dropped once the
//! request completes so that RBAC changes apply to the next request.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod resolver;
mod resources;

#[cfg(test)]
mod tests;

pub use self::{
    resolver::{ResolvedRules, RuleResolver},
    resources::ResourceMap,
};
use ahash::AHashMap as HashMap;
use explorer_core::{Object, PolicyRule, Principal, Role, RoleBinding, LIST_VERB};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthzError {
    #[error("{binding} references {kind} {name}, which does not exist")]
    RoleNotFound {
        binding: String,
        kind: String,
        name: String,
    },

    #[error("{binding} references unsupported role kind {kind:?}")]
    UnsupportedRoleRef { binding: String, kind: String },

    #[error("object from cluster {object_cluster} checked against rules of cluster {cluster}")]
    ClusterMismatch {
        cluster: String,
        object_cluster: String,
    },
}

/// Builds per-request authorizers.
#[derive(Clone, Debug)]
pub struct Authorizer {
    resources: Arc<ResourceMap>,
}

/// Decides object visibility for one principal over the course of a request.
#[derive(Debug)]
pub struct RequestAuthorizer {
    principal: Principal,
    resources: Arc<ResourceMap>,
    roles: HashMap<String, Vec<Role>>,
    bindings: HashMap<String, Vec<RoleBinding>>,
    clusters: HashMap<String, ClusterAuthorizer>,
}

/// Decides object visibility for one principal within one cluster.
#[derive(Debug)]
pub struct ClusterAuthorizer {
    principal: Principal,
    resources: Arc<ResourceMap>,
    resolver: RuleResolver,
    rules_by_namespace: HashMap<String, Vec<PolicyRule>>,
}

// === impl Authorizer ===

impl Authorizer {
    pub fn new(resources: impl Into<Arc<ResourceMap>>) -> Self {
        Self {
            resources: resources.into(),
        }
    }

    /// Prepares to authorize a request from `principal` against the given RBAC rows, which may
    /// span any number of clusters.
    pub fn for_request(
        &self,
        principal: Principal,
        roles: Vec<Role>,
        bindings: Vec<RoleBinding>,
    ) -> RequestAuthorizer {
        let mut roles_by_cluster = HashMap::<String, Vec<Role>>::default();
        for role in roles {
            roles_by_cluster
                .entry(role.cluster.clone())
                .or_default()
                .push(role);
        }
        let mut bindings_by_cluster = HashMap::<String, Vec<RoleBinding>>::default();
        for binding in bindings {
            bindings_by_cluster
                .entry(binding.cluster.clone())
                .or_default()
                .push(binding);
        }
        RequestAuthorizer {
            principal,
            resources: self.resources.clone(),
            roles: roles_by_cluster,
            bindings: bindings_by_cluster,
            clusters: HashMap::default(),
        }
    }

    /// Builds the predicate for a single cluster.
    pub fn for_cluster(
        &self,
        principal: Principal,
        cluster: &str,
        roles: Vec<Role>,
        bindings: Vec<RoleBinding>,
    ) -> ClusterAuthorizer {
        ClusterAuthorizer::new(
            principal,
            self.resources.clone(),
            RuleResolver::new(cluster, roles, bindings),
        )
    }
}

// === impl RequestAuthorizer ===

impl RequestAuthorizer {
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Returns the authorizer for `cluster`, building it on first use.
    pub fn cluster(&mut self, cluster: &str) -> &mut ClusterAuthorizer {
        let Self {
            principal,
            resources,
            roles,
            bindings,
            clusters,
        } = self;
        clusters.entry(cluster.to_string()).or_insert_with(|| {
            let roles = roles.remove(cluster).unwrap_or_default();
            let bindings = bindings.remove(cluster).unwrap_or_default();
            debug!(
                %cluster,
                roles = roles.len(),
                bindings = bindings.len(),
                "Building rule resolver"
            );
            ClusterAuthorizer::new(
                principal.clone(),
                resources.clone(),
                RuleResolver::new(cluster, roles, bindings),
            )
        })
    }

    pub fn allows(&mut self, obj: &Object) -> Result<bool, AuthzError> {
        self.cluster(&obj.cluster).allows(obj)
    }

    /// The number of clusters a resolver has been built for.
    pub fn resolved_clusters(&self) -> usize {
        self.clusters.len()
    }
}

// === impl ClusterAuthorizer ===

impl ClusterAuthorizer {
    fn new(principal: Principal, resources: Arc<ResourceMap>, resolver: RuleResolver) -> Self {
        Self {
            principal,
            resources,
            resolver,
            rules_by_namespace: HashMap::default(),
        }
    }

    pub fn cluster(&self) -> &str {
        self.resolver.cluster()
    }

    /// Whether the principal may list the object.
    ///
    /// The first rule that grants `list` on the object's group, resource and name allows it;
    /// otherwise it is denied.
    pub fn allows(&mut self, obj: &Object) -> Result<bool, AuthzError> {
        if obj.cluster != self.resolver.cluster() {
            return Err(AuthzError::ClusterMismatch {
                cluster: self.resolver.cluster().to_string(),
                object_cluster: obj.cluster.clone(),
            });
        }

        let resources = self.resources.clone();
        let Some(resource) = resources.resource_for(&obj.api_group, &obj.kind) else {
            trace!(group = %obj.api_group, kind = %obj.kind, "Denying unmapped kind");
            return Ok(false);
        };

        let rules = self.rules_in(&obj.namespace);
        let allowed = rules.iter().any(|rule| {
            rule.allows_verb(LIST_VERB)
                && rule.matches_api_group(&obj.api_group)
                && rule.matches_resource(resource)
                && rule.matches_resource_name(&obj.name)
        });
        Ok(allowed)
    }

    fn rules_in(&mut self, namespace: &str) -> &[PolicyRule] {
        let Self {
            principal,
            resolver,
            rules_by_namespace,
            ..
        } = self;
        rules_by_namespace
            .entry(namespace.to_string())
            .or_insert_with(|| {
                let ResolvedRules { rules, errors } = resolver.rules_for(principal, namespace);
                for error in errors {
                    debug!(cluster = %resolver.cluster(), %namespace, %error, "Skipping binding");
                }
                rules
            })
    }
}
