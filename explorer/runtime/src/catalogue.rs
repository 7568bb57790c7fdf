use crate::{
    authz::{Authorizer, ResourceMap},
    core::KindConfig,
    query::QueryService,
    store::{Indexer, Store},
};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

const DATABASE_FILE: &str = "explorer.db";
const INDEX_DIR: &str = "index";

/// The catalogue's store and search index, as opened from a data directory.
#[derive(Clone, Debug)]
pub struct Catalogue {
    pub store: Store,
    pub index: Indexer,
}

// === impl Catalogue ===

impl Catalogue {
    /// Opens the catalogue, rebuilding the search index if it was lost.
    ///
    /// This blocks on disk I/O.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        let store = Store::open(data_dir.join(DATABASE_FILE))?;
        let index = Indexer::open(data_dir.join(INDEX_DIR), store.clone())?;

        let objects = store.count_objects()?;
        if objects > 0 && index.is_empty()? {
            let indexed = index.rebuild()?;
            info!(indexed, "Rebuilt search index");
        }
        info!(path = %data_dir.display(), objects, "Opened catalogue");
        Ok(Self { store, index })
    }

    /// Builds a query service that authorizes reads of the configured kinds.
    pub fn query_service(&self, kinds: &KindConfig) -> QueryService {
        QueryService::new(
            self.store.clone(),
            self.index.clone(),
            Authorizer::new(ResourceMap::new(kinds)),
        )
    }
}
