use ahash::AHashMap as HashMap;
use explorer_k8s_api::{DynamicObject, ResourceExt};
use std::fmt;

/// A change reported by a cluster watcher.
#[derive(Clone, Debug)]
pub struct Record {
    pub cluster: String,
    pub transaction: Transaction,
}

#[derive(Clone, Debug)]
pub enum Transaction {
    /// The object was created or updated.
    Upsert(DynamicObject),

    /// The object was deleted from its cluster.
    Delete(DynamicObject),

    /// Every object collected from the cluster is gone, e.g. because the cluster was removed.
    DeleteAll,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TransactionType {
    Upsert,
    Delete,
    DeleteAll,
}

// === impl Record ===

impl Record {
    pub fn upsert(cluster: impl Into<String>, obj: DynamicObject) -> Self {
        Self {
            cluster: cluster.into(),
            transaction: Transaction::Upsert(obj),
        }
    }

    pub fn delete(cluster: impl Into<String>, obj: DynamicObject) -> Self {
        Self {
            cluster: cluster.into(),
            transaction: Transaction::Delete(obj),
        }
    }

    pub fn delete_all(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            transaction: Transaction::DeleteAll,
        }
    }

    pub fn transaction_type(&self) -> TransactionType {
        match self.transaction {
            Transaction::Upsert(_) => TransactionType::Upsert,
            Transaction::Delete(_) => TransactionType::Delete,
            Transaction::DeleteAll => TransactionType::DeleteAll,
        }
    }

    pub fn object(&self) -> Option<&DynamicObject> {
        match &self.transaction {
            Transaction::Upsert(obj) | Transaction::Delete(obj) => Some(obj),
            Transaction::DeleteAll => None,
        }
    }

    /// Identifies the object a record refers to within its cluster.
    fn key(&self) -> Option<RecordKey> {
        let obj = self.object()?;
        let (api_version, kind) = obj
            .types
            .as_ref()
            .map(|t| (t.api_version.clone(), t.kind.clone()))
            .unwrap_or_default();
        Some(RecordKey {
            cluster: self.cluster.clone(),
            api_version,
            kind,
            namespace: obj.namespace().unwrap_or_default(),
            name: obj.name_any(),
        })
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
            Self::DeleteAll => "deleteAll",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct RecordKey {
    cluster: String,
    api_version: String,
    kind: String,
    namespace: String,
    name: String,
}

/// Collapses a batch so that only the last record for each object is kept.
///
/// A `DeleteAll` supersedes every earlier record for its cluster. Records keep the order of their
/// last occurrence.
pub fn compact(records: Vec<Record>) -> Vec<Record> {
    let mut slots = Vec::<Option<Record>>::with_capacity(records.len());
    let mut positions = HashMap::<RecordKey, usize>::default();

    for record in records {
        match record.key() {
            Some(key) => {
                if let Some(prior) = positions.insert(key, slots.len()) {
                    slots[prior] = None;
                }
            }
            None => {
                let cluster = record.cluster.as_str();
                for slot in slots.iter_mut() {
                    if slot.as_ref().is_some_and(|r| r.cluster == cluster) {
                        *slot = None;
                    }
                }
                positions.retain(|key, _| key.cluster != cluster);
            }
        }
        slots.push(Some(record));
    }

    slots.into_iter().flatten().collect()
}
