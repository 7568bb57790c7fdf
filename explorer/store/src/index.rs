use crate::{
    iter::ObjectIter,
    schema,
    store::{placeholders, Store},
    StoreError,
};
use explorer_core::{Filter, FilterKey, Object, Query};
use parking_lot::Mutex;
use rusqlite::{
    params, params_from_iter, types::Value, Connection, OptionalExtension, Transaction,
};
use std::{collections::BTreeMap, path::Path, sync::Arc};

/// A full-text and faceted index over the store's objects.
///
/// The index only holds the fields needed for matching; results are always read back through the
/// [`Store`], which remains authoritative.
#[derive(Clone)]
pub struct Indexer {
    conn: Arc<Mutex<Connection>>,
    store: Store,
}

/// Distinct values per indexed field, keyed by field name. Label values are keyed as
/// `labels.<key>`.
pub type Facets = BTreeMap<String, Vec<String>>;

const INDEX_FILE: &str = "index.db";

const FACET_KEYS: [FilterKey; 5] = [
    FilterKey::Cluster,
    FilterKey::Kind,
    FilterKey::Namespace,
    FilterKey::Category,
    FilterKey::Status,
];

const REBUILD_BATCH: usize = 500;

// === impl Indexer ===

impl Indexer {
    /// Opens (or creates) the index in the given directory.
    pub fn open(dir: impl AsRef<Path>, store: Store) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        Self::init(Connection::open(dir.join(INDEX_FILE))?, store)
    }

    pub fn in_memory(store: Store) -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, store)
    }

    fn init(conn: Connection, store: Store) -> Result<Self, StoreError> {
        conn.execute_batch(schema::INDEX)?;
        conn.execute_batch(schema::BACKFILL_DOC_IDS)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            store,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Indexes the objects, replacing any documents with the same IDs.
    pub fn add(&self, objects: &[Object]) -> Result<(), StoreError> {
        self.write(|tx| {
            let mut delete_labels = tx.prepare_cached("DELETE FROM labels WHERE id = ?1")?;
            let mut upsert_id = tx.prepare_cached(
                "INSERT INTO doc_ids (id) VALUES (?1)
                 ON CONFLICT (id) DO UPDATE SET id = excluded.id
                 RETURNING doc",
            )?;
            let mut insert_doc = tx.prepare_cached(
                "INSERT INTO documents (rowid, id, cluster, namespace, api_group, api_version, kind,
                    name, status, category, tenant, message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            let mut insert_label =
                tx.prepare_cached("INSERT INTO labels (id, key, value) VALUES (?1, ?2, ?3)")?;

            for obj in objects {
                let id = obj.id();
                delete_document(tx, &id)?;
                delete_labels.execute([&id])?;
                let doc: i64 = upsert_id.query_row([&id], |row| row.get(0))?;
                insert_doc.execute(params![
                    doc,
                    id,
                    obj.cluster,
                    obj.namespace,
                    obj.api_group,
                    obj.api_version,
                    obj.kind,
                    obj.name,
                    obj.status,
                    obj.category.map(|c| c.as_str()).unwrap_or_default(),
                    obj.tenant,
                    obj.message,
                ])?;
                for (key, value) in labels(obj) {
                    insert_label.execute(params![id, key, value])?;
                }
            }
            Ok(())
        })
    }

    pub fn remove(&self, objects: &[Object]) -> Result<(), StoreError> {
        let ids = objects.iter().map(Object::id).collect::<Vec<_>>();
        self.remove_by_id(&ids)
    }

    pub fn remove_by_id(&self, ids: &[String]) -> Result<(), StoreError> {
        self.write(|tx| {
            let mut delete_id = tx.prepare_cached("DELETE FROM doc_ids WHERE id = ?1")?;
            let mut delete_labels = tx.prepare_cached("DELETE FROM labels WHERE id = ?1")?;
            for id in ids {
                delete_document(tx, id)?;
                delete_id.execute([id])?;
                delete_labels.execute([id])?;
            }
            Ok(())
        })
    }

    /// Removes every document matching a structured query such as `cluster:cluster-x`.
    ///
    /// Clauses are whitespace-separated `key:value` pairs with the same semantics as query
    /// filters. Returns the number of documents removed.
    pub fn remove_by_query(&self, query: &str) -> Result<usize, StoreError> {
        let query = Query {
            filters: query.split_whitespace().map(str::to_string).collect(),
            ..Default::default()
        };
        if query.filters.is_empty() {
            return Err(StoreError::InvalidQuery("empty removal query".to_string()));
        }

        let mut conds = Vec::new();
        let mut params = Vec::<Value>::new();
        for filter in query.parse_filters() {
            match filter {
                Filter::AnyOf { key, values } => {
                    conds.push(format!("{} IN ({})", key.column(), placeholders(values.len())));
                    params.extend(values.into_iter().map(Value::from));
                }
                Filter::Unsupported(key) => {
                    return Err(StoreError::InvalidQuery(format!("unsupported key: {key}")));
                }
            }
        }

        let where_clause = conds.join(" AND ");
        self.write(|tx| {
            for table in ["labels", "doc_ids"] {
                tx.execute(
                    &format!(
                        "DELETE FROM {table} WHERE id IN \
                            (SELECT id FROM documents WHERE {where_clause})"
                    ),
                    params_from_iter(params.iter()),
                )?;
            }
            let n = tx.execute(
                &format!("DELETE FROM documents WHERE {where_clause}"),
                params_from_iter(params.iter()),
            )?;
            Ok(n)
        })
    }

    /// Finds the objects whose indexed fields match the query's terms.
    ///
    /// Each term matches by prefix and all terms must match. The matching objects are read from
    /// the store with the query's filters, ordering and pagination applied.
    pub fn search(&self, query: &Query) -> Result<ObjectIter, StoreError> {
        let expr = match_expression(&query.terms)
            .ok_or_else(|| StoreError::InvalidQuery("query has no search terms".to_string()))?;

        let ids = self.matching_ids(&expr)?;
        tracing::trace!(terms = %query.terms, matches = ids.len(), "Searched index");

        self.store.get_matching_objects(&ids, query)
    }

    fn matching_ids(&self, expr: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT id FROM documents WHERE documents MATCH ?1")?;
        let ids = stmt
            .query_map([expr], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Lists the distinct values of each faceted field, including object labels.
    pub fn list_facets(&self) -> Result<Facets, StoreError> {
        let conn = self.conn.lock();
        let mut facets = Facets::new();

        for key in FACET_KEYS {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT DISTINCT {col} FROM documents WHERE {col} != '' ORDER BY {col}",
                col = key.column()
            ))?;
            let values = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            facets.insert(key.as_str().to_string(), values);
        }

        let mut stmt =
            conn.prepare_cached("SELECT DISTINCT key, value FROM labels ORDER BY key, value")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            facets
                .entry(format!("labels.{key}"))
                .or_default()
                .push(row.get(1)?);
        }

        Ok(facets)
    }

    /// Drops every document and re-indexes the store's objects.
    pub fn rebuild(&self) -> Result<usize, StoreError> {
        self.write(|tx| {
            tx.execute_batch(
                "DELETE FROM documents; DELETE FROM doc_ids; DELETE FROM labels;",
            )?;
            Ok(())
        })?;

        let mut indexed = 0;
        let mut batch = Vec::with_capacity(REBUILD_BATCH);
        for obj in self.store.get_all_objects() {
            batch.push(obj?);
            if batch.len() == REBUILD_BATCH {
                self.add(&batch)?;
                indexed += batch.len();
                batch.clear();
            }
        }
        if !batch.is_empty() {
            self.add(&batch)?;
            indexed += batch.len();
        }

        tracing::info!(objects = indexed, "Rebuilt search index");
        Ok(indexed)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.count()? == 0)
    }
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer").finish_non_exhaustive()
    }
}

fn doc_for(tx: &Transaction<'_>, id: &str) -> Result<Option<i64>, StoreError> {
    let mut stmt = tx.prepare_cached("SELECT doc FROM doc_ids WHERE id = ?1")?;
    Ok(stmt.query_row([id], |row| row.get(0)).optional()?)
}

/// Documents are deleted by rowid; matching on the unindexed `id` column would scan the index.
fn delete_document(tx: &Transaction<'_>, id: &str) -> Result<(), StoreError> {
    if let Some(doc) = doc_for(tx, id)? {
        tx.prepare_cached("DELETE FROM documents WHERE rowid = ?1")?
            .execute([doc])?;
    }
    Ok(())
}

/// Builds an FTS5 expression in which every term must match as a prefix.
///
/// Terms are quoted so that operators and punctuation are matched literally.
fn match_expression(terms: &str) -> Option<String> {
    let terms = terms
        .split_whitespace()
        .map(|t| format!("\"{}\"*", t.replace('"', "\"\"")))
        .collect::<Vec<_>>();
    if terms.is_empty() {
        return None;
    }
    Some(terms.join(" AND "))
}

fn labels(obj: &Object) -> impl Iterator<Item = (&str, &str)> {
    obj.unstructured
        .pointer("/metadata/labels")
        .and_then(|labels| labels.as_object())
        .into_iter()
        .flat_map(|labels| labels.iter())
        .filter_map(|(k, v)| Some((k.as_str(), v.as_str()?)))
}
