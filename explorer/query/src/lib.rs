//! Answers catalogue queries on behalf of a principal.
//!
//! Candidates are read from the search index when the query has free-text terms and from the store
//! otherwise. Each candidate is then checked against the RBAC rules of its own cluster; objects the
//! principal may not list are dropped before the query's offset and limit are applied, so pages
//! only ever count visible objects.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

#[cfg(test)]
mod tests;

use explorer_authz::Authorizer;
use explorer_core::{Object, Principal, Query};
use explorer_store::{Facets, Indexer, ObjectIter, Store, StoreError};
use tracing::{debug, trace};

#[derive(Clone, Debug)]
pub struct QueryService {
    store: Store,
    index: Indexer,
    authorizer: Authorizer,
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("failed to read the catalogue: {0}")]
    Store(#[from] StoreError),
}

// === impl QueryService ===

impl QueryService {
    pub fn new(store: Store, index: Indexer, authorizer: Authorizer) -> Self {
        Self {
            store,
            index,
            authorizer,
        }
    }

    /// Returns the objects matching `query` that `principal` may list, in the query's order.
    ///
    /// Objects whose visibility cannot be decided are omitted.
    pub fn run_query(&self, principal: &Principal, query: &Query) -> Result<Vec<Object>, QueryError> {
        if query.limit == Some(0) {
            return Ok(Vec::new());
        }

        let mut candidates = self.candidates(query)?;
        let mut authz = self.authorizer.for_request(
            principal.clone(),
            self.store.get_roles()?,
            self.store.get_role_bindings()?,
        );

        let mut skipped = 0;
        let mut denied = 0;
        let mut objects = Vec::new();
        for obj in candidates.by_ref() {
            let obj = obj?;
            match authz.allows(&obj) {
                Ok(true) => {}
                Ok(false) => {
                    denied += 1;
                    continue;
                }
                Err(error) => {
                    debug!(%error, id = %obj.id(), "Omitting object");
                    denied += 1;
                    continue;
                }
            }

            if skipped < query.offset {
                skipped += 1;
                continue;
            }
            objects.push(obj);
            if query.limit.is_some_and(|limit| objects.len() >= limit) {
                break;
            }
        }
        candidates.close();

        trace!(
            principal = %principal.id,
            clusters = authz.resolved_clusters(),
            returned = objects.len(),
            denied,
            "Ran query"
        );
        Ok(objects)
    }

    /// Lists the distinct values of every faceted field across the catalogue.
    pub fn list_facets(&self, principal: &Principal) -> Result<Facets, QueryError> {
        trace!(principal = %principal.id, "Listing facets");
        Ok(self.index.list_facets()?)
    }

    /// Pagination is applied after authorization, so candidates are read unpaged.
    fn candidates(&self, query: &Query) -> Result<ObjectIter, QueryError> {
        let unpaged = Query {
            offset: 0,
            limit: None,
            ..query.clone()
        };
        if unpaged.has_terms() {
            Ok(self.index.search(&unpaged)?)
        } else {
            Ok(self.store.get_objects(None, &unpaged))
        }
    }
}
