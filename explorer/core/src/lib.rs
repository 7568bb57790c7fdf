//! Explorer data model.
//!
//! The explorer aggregates resources from many clusters into a single catalogue. This crate holds
//! the rows exchanged between the collectors, the store, the index and the authorizer:
//!
//! - An [`Object`] is a collected resource, keyed by cluster, namespace, group, version, kind and
//!   name. Its payload is kept verbatim so that secondary facets can be derived from it.
//! - A [`Role`] owns an ordered list of [`PolicyRule`]s; a [`RoleBinding`] references a role by
//!   kind and name and owns its [`Subject`]s. Bindings are resolved against roles at query time,
//!   never through foreign keys.
//! - A [`Tenant`] is derived from namespaces that carry the tenancy label.
//!
//! The supported kinds, their categories and their retention windows are described by a
//! [`KindConfig`] that is built at startup and handed to every component explicitly.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod kind;
pub mod object;
pub mod query;
pub mod rbac;
mod retention;
pub mod tenant;

pub use self::{
    kind::{GroupVersionKind, KindConfig, KindConfigError, KindRetention, ObjectKind},
    object::{Category, Object, ObjectStatus},
    query::{Filter, FilterKey, Query},
    rbac::{AccessRule, PolicyRule, Principal, Role, RoleBinding, RoleRef, Subject, SubjectKind},
    retention::{ParseError as RetentionParseError, RetentionDuration},
    tenant::Tenant,
};

/// The label that marks a namespace as belonging to a tenant.
pub const TENANT_LABEL: &str = "toolkit.fluxcd.io/tenant";

/// The only verb queries are authorized for. Queries are read-only listings.
pub const LIST_VERB: &str = "list";

/// Matches any API group, resource, verb or resource name in a policy rule.
pub const WILDCARD: &str = "*";

/// A domain row is missing a field that is part of its identity.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind} is missing required field '{field}'")]
pub struct ValidationError {
    pub kind: &'static str,
    pub field: &'static str,
}

impl ValidationError {
    pub(crate) fn check(kind: &'static str, field: &'static str, value: &str) -> Result<(), Self> {
        if value.is_empty() {
            return Err(Self { kind, field });
        }
        Ok(())
    }
}
