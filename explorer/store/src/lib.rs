//! Explorer persistence.
//!
//! The [`Store`] is the system of record: an embedded SQLite database holding objects, roles (with
//! their policy rules), role bindings (with their subjects) and tenants. Everything is keyed by the
//! string IDs derived in `explorer_core`.
//!
//! The [`Indexer`] is a full-text and faceted index derived from the store. It lives in its own
//! database so that it can be dropped and rebuilt at any time. Writes to the store and the index
//! are not transactional across the two; a crash between them leaves the index stale until the
//! next cluster-wide delete or a rebuild.
//!
//! The [`RetentionManager`] periodically purges objects whose kind's retention window has elapsed
//! since they were deleted from their cluster.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod index;
mod iter;
mod retention;
mod schema;
mod store;

#[cfg(test)]
mod tests;

pub use self::{
    index::{Facets, Indexer},
    iter::ObjectIter,
    retention::RetentionManager,
    store::Store,
};
use explorer_core::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}
