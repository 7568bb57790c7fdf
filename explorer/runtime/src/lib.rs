//! Runs the explorer's collectors against the local cluster and the clusters of a remote
//! kubeconfig, and keeps the catalogue's retention in check.
//!
//! The runtime serves no query transport. Readers open a [`Catalogue`] over the same data
//! directory and answer queries through [`Catalogue::query_service`].

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use explorer_authz as authz;
pub use explorer_collector as collector;
pub use explorer_core as core;
pub use explorer_k8s_api as k8s;
pub use explorer_query as query;
pub use explorer_store as store;

mod args;
mod catalogue;
pub mod registry;

pub use self::{args::Args, catalogue::Catalogue, registry::KubeconfigRegistry};
