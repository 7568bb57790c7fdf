//! Collects resources from every cluster in a registry into the store.
//!
//! A [`Collector`] runs one [`Watcher`] per cluster. Watchers publish batches of [`Record`]s over a
//! shared channel that a single task drains, handing each batch to the collector's
//! [`ProcessRecords`] implementation. The explorer runs three collectors, one each for objects,
//! RBAC and tenants.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cluster;
mod collector;
mod kube_watcher;
mod objects;
mod record;
mod roles;
mod tenants;
pub mod watcher;


pub use self::{
    cluster::{Cluster, ClusterRegistry, ClusterSet, ClusterUpdate},
    collector::{Collector, ProcessRecords},
    kube_watcher::{Impersonation, KubeWatcher, NewKubeWatcher},
    objects::ObjectsProcessor,
    record::{compact, Record, Transaction, TransactionType},
    roles::RolesProcessor,
    tenants::TenantsProcessor,
    watcher::{NewWatcher, WatchKind, Watcher, WatcherState},
};

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("cluster name must not be empty")]
    EmptyClusterName,

    #[error("cluster {0} is not watched")]
    UnknownCluster(String),

    #[error("failed to watch cluster {cluster}: {source}")]
    Start {
        cluster: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("collector {0} has already been started")]
    AlreadyStarted(String),

    #[error("collector {0} has been stopped")]
    Stopped(String),
}
