#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod adapter;
pub mod convert;
mod watch;

pub use self::{
    adapter::{AdapterRegistry, Condition, ObjectAdapter},
    watch::{Event, Watch},
};
pub use k8s_openapi::api::{
    self,
    core::v1::{Namespace, ObjectReference},
    rbac::v1 as rbac,
};
pub use kube::{
    api::{Api, ObjectMeta, ResourceExt},
    core::{ApiResource, DynamicObject, TypeMeta},
    runtime::watcher,
    Client, Config, Error,
};

use explorer_core::GroupVersionKind;

/// Describes how a kind is served by the API server.
pub fn api_resource(gvk: &GroupVersionKind, plural: &str) -> ApiResource {
    let gvk = kube::core::GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind);
    ApiResource::from_gvk_with_plural(&gvk, plural)
}

/// Builds an empty resource of the given kind, e.g. for tests and deletion markers.
pub fn dynamic(ar: &ApiResource, namespace: Option<&str>, name: &str) -> DynamicObject {
    let obj = DynamicObject::new(name, ar);
    match namespace {
        Some(ns) => obj.within(ns),
        None => obj,
    }
}
