use crate::{
    iter::ObjectIter,
    schema::{self, OBJECT_COLUMNS},
    StoreError,
};
use explorer_core::{
    AccessRule, Category, Filter, Object, PolicyRule, Query, Role, RoleBinding, RoleRef, Subject,
    SubjectKind, Tenant,
};
use parking_lot::Mutex;
use rusqlite::{
    params, params_from_iter, types::Value, Connection, OptionalExtension, Row, Transaction,
};
use std::{
    collections::{BTreeMap, VecDeque},
    path::Path,
    sync::Arc,
};

/// The system of record for collected objects, RBAC rows and tenants.
///
/// All access goes through a single connection, which serializes writes. Each write call is
/// applied as one transaction: either every row in the call is written or none is.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

// === impl Store ===

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(schema::STORE)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
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

    // === Objects ===

    pub fn store_objects(&self, objects: &[Object]) -> Result<(), StoreError> {
        for obj in objects {
            obj.validate()?;
        }
        let rows = objects
            .iter()
            .map(|obj| Ok((obj, serde_json::to_string(&obj.unstructured)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;

        self.write(|tx| {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO objects (id, cluster, namespace, api_group, api_version, kind, name,
                    status, message, category, tenant, unstructured, kubernetes_deleted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT (id) DO UPDATE SET
                    status = excluded.status,
                    message = excluded.message,
                    category = excluded.category,
                    tenant = excluded.tenant,
                    unstructured = excluded.unstructured,
                    kubernetes_deleted_at = excluded.kubernetes_deleted_at",
            )?;
            for (obj, unstructured) in &rows {
                stmt.execute(params![
                    obj.id(),
                    obj.cluster,
                    obj.namespace,
                    obj.api_group,
                    obj.api_version,
                    obj.kind,
                    obj.name,
                    obj.status,
                    obj.message,
                    obj.category.map(|c| c.as_str()),
                    obj.tenant,
                    unstructured,
                    obj.kubernetes_deleted_at,
                ])?;
            }
            Ok(())
        })
    }

    pub fn delete_objects(&self, objects: &[Object]) -> Result<(), StoreError> {
        let ids = objects.iter().map(Object::id).collect::<Vec<_>>();
        self.delete_objects_by_id(&ids)
    }

    pub fn delete_objects_by_id(&self, ids: &[String]) -> Result<(), StoreError> {
        self.delete_by_id("DELETE FROM objects WHERE id = ?1", ids)
    }

    pub fn delete_all_objects(&self, clusters: &[String]) -> Result<(), StoreError> {
        self.delete_for_clusters("DELETE FROM objects WHERE cluster = ?1", clusters)
    }

    /// Returns the objects matching the query, optionally restricted to a set of IDs.
    ///
    /// The query's filters, ordering, offset and limit are applied; its terms are not (see
    /// [`crate::Indexer::search`]). Rows are fetched lazily, page by page.
    pub fn get_objects(&self, ids: Option<&[String]>, query: &Query) -> ObjectIter {
        let mut conds = Vec::new();
        let mut params = Vec::<Value>::new();

        if let Some(ids) = ids {
            if ids.is_empty() {
                return ObjectIter::empty(self.conn.clone());
            }
            conds.push(format!("id IN ({})", placeholders(ids.len())));
            params.extend(ids.iter().cloned().map(Value::from));
        }

        let sql = select_objects(query, conds, &mut params);
        ObjectIter::new(self.conn.clone(), sql, params, query.offset, query.limit)
    }

    /// Like [`Store::get_objects`], for ID sets of any size.
    ///
    /// The IDs are staged in a temporary table and the query runs once, so the results are read
    /// eagerly rather than page by page.
    pub(crate) fn get_matching_objects(
        &self,
        ids: &[String],
        query: &Query,
    ) -> Result<ObjectIter, StoreError> {
        if ids.is_empty() || query.limit == Some(0) {
            return Ok(ObjectIter::empty(self.conn.clone()));
        }

        let mut params = Vec::<Value>::new();
        let mut sql = select_objects(
            query,
            vec!["id IN (SELECT id FROM temp.search_ids)".to_string()],
            &mut params,
        );
        match query.limit {
            Some(limit) => sql.push_str(&format!(" LIMIT {limit} OFFSET {}", query.offset)),
            None => sql.push_str(&format!(" LIMIT -1 OFFSET {}", query.offset)),
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute_batch(schema::SEARCH_IDS)?;
        tx.execute("DELETE FROM temp.search_ids", [])?;
        {
            let mut insert =
                tx.prepare_cached("INSERT OR IGNORE INTO temp.search_ids (id) VALUES (?1)")?;
            for id in ids {
                insert.execute([id])?;
            }
        }
        let objects = tx
            .prepare(&sql)?
            .query_map(params_from_iter(params.iter()), object_from_row)?
            .collect::<Result<VecDeque<_>, _>>()?;
        tx.execute("DELETE FROM temp.search_ids", [])?;
        tx.commit()?;
        drop(conn);

        Ok(ObjectIter::buffered(self.conn.clone(), objects))
    }

    pub fn get_object_by_id(&self, id: &str) -> Result<Option<Object>, StoreError> {
        let conn = self.conn.lock();
        let obj = conn
            .query_row(
                &format!("SELECT {OBJECT_COLUMNS} FROM objects WHERE id = ?1"),
                [id],
                object_from_row,
            )
            .optional()?;
        Ok(obj)
    }

    /// Iterates over every stored object in ID order.
    pub fn get_all_objects(&self) -> ObjectIter {
        ObjectIter::new(
            self.conn.clone(),
            format!("SELECT {OBJECT_COLUMNS} FROM objects ORDER BY id"),
            Vec::new(),
            0,
            None,
        )
    }

    pub fn count_objects(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM objects", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    // === Roles ===

    /// Stores roles along with their policy rules, replacing the rules of any previous version.
    ///
    /// Roles without rules grant nothing and are dropped; a previously stored version is removed.
    pub fn store_roles(&self, roles: &[Role]) -> Result<(), StoreError> {
        for role in roles {
            role.validate()?;
        }

        self.write(|tx| {
            let mut upsert = tx.prepare_cached(
                "INSERT INTO roles (id, cluster, namespace, kind, name)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (id) DO NOTHING",
            )?;
            let mut delete_role = tx.prepare_cached("DELETE FROM roles WHERE id = ?1")?;
            let mut delete_rules = tx.prepare_cached("DELETE FROM policy_rules WHERE role_id = ?1")?;
            let mut insert_rule = tx.prepare_cached(
                "INSERT INTO policy_rules (role_id, position, api_groups, resources, verbs, resource_names)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;

            for role in roles {
                let id = role.id();
                if role.policy_rules.is_empty() {
                    tracing::debug!(%id, "Dropping role without rules");
                    delete_role.execute([&id])?;
                    continue;
                }

                upsert.execute(params![id, role.cluster, role.namespace, role.kind, role.name])?;
                delete_rules.execute([&id])?;
                for (position, rule) in role.policy_rules.iter().enumerate() {
                    insert_rule.execute(params![
                        id,
                        position as i64,
                        encode_set(&rule.api_groups)?,
                        encode_set(&rule.resources)?,
                        encode_set(&rule.verbs)?,
                        encode_set(&rule.resource_names)?,
                    ])?;
                }
            }
            Ok(())
        })
    }

    pub fn delete_roles(&self, roles: &[Role]) -> Result<(), StoreError> {
        let ids = roles.iter().map(Role::id).collect::<Vec<_>>();
        self.delete_roles_by_id(&ids)
    }

    pub fn delete_roles_by_id(&self, ids: &[String]) -> Result<(), StoreError> {
        self.delete_by_id("DELETE FROM roles WHERE id = ?1", ids)
    }

    pub fn delete_all_roles(&self, clusters: &[String]) -> Result<(), StoreError> {
        self.delete_for_clusters("DELETE FROM roles WHERE cluster = ?1", clusters)
    }

    pub fn get_roles(&self) -> Result<Vec<Role>, StoreError> {
        let conn = self.conn.lock();

        let mut rules = BTreeMap::<String, Vec<PolicyRule>>::new();
        let mut stmt = conn.prepare_cached(
            "SELECT role_id, api_groups, resources, verbs, resource_names
             FROM policy_rules ORDER BY role_id, position",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            rules.entry(row.get(0)?).or_default().push(PolicyRule {
                api_groups: decode_set(row, 1)?,
                resources: decode_set(row, 2)?,
                verbs: decode_set(row, 3)?,
                resource_names: decode_set(row, 4)?,
            });
        }

        let mut stmt =
            conn.prepare_cached("SELECT id, cluster, namespace, kind, name FROM roles ORDER BY id")?;
        let roles = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                Ok(Role {
                    cluster: row.get(1)?,
                    namespace: row.get(2)?,
                    kind: row.get(3)?,
                    name: row.get(4)?,
                    policy_rules: rules.remove(&id).unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(roles)
    }

    // === Role bindings ===

    /// Stores bindings along with their subjects, replacing the subjects of any previous version.
    pub fn store_role_bindings(&self, bindings: &[RoleBinding]) -> Result<(), StoreError> {
        for binding in bindings {
            binding.validate()?;
        }

        self.write(|tx| {
            let mut upsert = tx.prepare_cached(
                "INSERT INTO role_bindings (id, cluster, namespace, kind, name, role_ref_kind, role_ref_name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (id) DO UPDATE SET
                    role_ref_kind = excluded.role_ref_kind,
                    role_ref_name = excluded.role_ref_name",
            )?;
            let mut delete_subjects =
                tx.prepare_cached("DELETE FROM subjects WHERE binding_id = ?1")?;
            let mut insert_subject = tx.prepare_cached(
                "INSERT INTO subjects (binding_id, position, kind, name, namespace, api_group)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;

            for binding in bindings {
                let id = binding.id();
                upsert.execute(params![
                    id,
                    binding.cluster,
                    binding.namespace,
                    binding.kind,
                    binding.name,
                    binding.role_ref.kind,
                    binding.role_ref.name,
                ])?;
                delete_subjects.execute([&id])?;
                for (position, subject) in binding.subjects.iter().enumerate() {
                    insert_subject.execute(params![
                        id,
                        position as i64,
                        subject.kind.as_str(),
                        subject.name,
                        subject.namespace,
                        subject.api_group,
                    ])?;
                }
            }
            Ok(())
        })
    }

    pub fn delete_role_bindings(&self, bindings: &[RoleBinding]) -> Result<(), StoreError> {
        let ids = bindings.iter().map(RoleBinding::id).collect::<Vec<_>>();
        self.delete_role_bindings_by_id(&ids)
    }

    pub fn delete_role_bindings_by_id(&self, ids: &[String]) -> Result<(), StoreError> {
        self.delete_by_id("DELETE FROM role_bindings WHERE id = ?1", ids)
    }

    pub fn delete_all_role_bindings(&self, clusters: &[String]) -> Result<(), StoreError> {
        self.delete_for_clusters("DELETE FROM role_bindings WHERE cluster = ?1", clusters)
    }

    pub fn get_role_bindings(&self) -> Result<Vec<RoleBinding>, StoreError> {
        let conn = self.conn.lock();

        let mut subjects = BTreeMap::<String, Vec<Subject>>::new();
        let mut stmt = conn.prepare_cached(
            "SELECT binding_id, kind, name, namespace, api_group
             FROM subjects ORDER BY binding_id, position",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let kind: String = row.get(1)?;
            let kind = kind.parse::<SubjectKind>().map_err(|e: String| {
                rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
            })?;
            subjects.entry(row.get(0)?).or_default().push(Subject {
                kind,
                name: row.get(2)?,
                namespace: row.get(3)?,
                api_group: row.get(4)?,
            });
        }

        let mut stmt = conn.prepare_cached(
            "SELECT id, cluster, namespace, kind, name, role_ref_kind, role_ref_name
             FROM role_bindings ORDER BY id",
        )?;
        let bindings = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                Ok(RoleBinding {
                    cluster: row.get(1)?,
                    namespace: row.get(2)?,
                    kind: row.get(3)?,
                    name: row.get(4)?,
                    role_ref: RoleRef {
                        kind: row.get(5)?,
                        name: row.get(6)?,
                    },
                    subjects: subjects.remove(&id).unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(bindings)
    }

    /// Joins the stored bindings with the roles they reference.
    pub fn get_access_rules(&self) -> Result<Vec<AccessRule>, StoreError> {
        let roles = self.get_roles()?;
        let bindings = self.get_role_bindings()?;
        Ok(AccessRule::project(&roles, &bindings))
    }

    // === Tenants ===

    pub fn store_tenants(&self, tenants: &[Tenant]) -> Result<(), StoreError> {
        for tenant in tenants {
            tenant.validate()?;
        }

        self.write(|tx| {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO tenants (id, cluster_name, name, namespace) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (id) DO NOTHING",
            )?;
            for tenant in tenants {
                stmt.execute(params![
                    tenant.id(),
                    tenant.cluster_name,
                    tenant.name,
                    tenant.namespace
                ])?;
            }
            Ok(())
        })
    }

    pub fn delete_tenants(&self, tenants: &[Tenant]) -> Result<(), StoreError> {
        self.write(|tx| {
            let mut stmt = tx.prepare_cached("DELETE FROM tenants WHERE id = ?1")?;
            for tenant in tenants {
                stmt.execute([tenant.id()])?;
            }
            Ok(())
        })
    }

    /// Removes every tenant row derived from the given namespaces of a cluster.
    pub fn delete_tenants_for_namespaces(
        &self,
        cluster: &str,
        namespaces: &[String],
    ) -> Result<(), StoreError> {
        self.write(|tx| {
            let mut stmt = tx.prepare_cached(
                "DELETE FROM tenants WHERE cluster_name = ?1 AND namespace = ?2",
            )?;
            for ns in namespaces {
                stmt.execute([cluster, ns.as_str()])?;
            }
            Ok(())
        })
    }

    pub fn delete_all_tenants(&self, clusters: &[String]) -> Result<(), StoreError> {
        self.delete_for_clusters("DELETE FROM tenants WHERE cluster_name = ?1", clusters)
    }

    pub fn get_tenants(&self) -> Result<Vec<Tenant>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT cluster_name, name, namespace FROM tenants ORDER BY cluster_name, name, namespace",
        )?;
        let tenants = stmt
            .query_map([], |row| {
                Ok(Tenant {
                    cluster_name: row.get(0)?,
                    name: row.get(1)?,
                    namespace: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tenants)
    }

    fn delete_by_id(&self, sql: &str, ids: &[String]) -> Result<(), StoreError> {
        self.write(|tx| {
            let mut stmt = tx.prepare_cached(sql)?;
            for id in ids {
                stmt.execute([id])?;
            }
            Ok(())
        })
    }

    fn delete_for_clusters(&self, sql: &str, clusters: &[String]) -> Result<(), StoreError> {
        self.write(|tx| {
            let mut stmt = tx.prepare_cached(sql)?;
            for cluster in clusters {
                stmt.execute([cluster])?;
            }
            Ok(())
        })
    }

    #[cfg(test)]
    pub(crate) fn count_rows(&self, table: &str) -> usize {
        let conn = self.conn.lock();
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n as usize)
        .expect("table must exist")
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

/// Builds the ordered object query for the given filters and extra conditions.
fn select_objects(query: &Query, mut conds: Vec<String>, params: &mut Vec<Value>) -> String {
    for filter in query.parse_filters() {
        match filter {
            Filter::AnyOf { key, values } => {
                conds.push(format!("{} IN ({})", key.column(), placeholders(values.len())));
                params.extend(values.into_iter().map(Value::from));
            }
            Filter::Unsupported(key) => {
                tracing::debug!(%key, "Unsupported filter matches nothing");
                conds.push("0".to_string());
            }
        }
    }

    let mut sql = format!("SELECT {OBJECT_COLUMNS} FROM objects");
    if !conds.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conds.join(" AND "));
    }
    let dir = if query.descending { "DESC" } else { "ASC" };
    sql.push_str(&format!(
        " ORDER BY {} {dir}, id {dir}",
        query.order_key().column()
    ));
    sql
}

pub(crate) fn object_from_row(row: &Row<'_>) -> rusqlite::Result<Object> {
    let category: Option<String> = row.get(9)?;
    let category = category
        .map(|c| c.parse::<Category>())
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, e.into())
        })?;
    let unstructured: String = row.get(11)?;
    let unstructured = serde_json::from_str(&unstructured).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(Object {
        cluster: row.get(1)?,
        namespace: row.get(2)?,
        api_group: row.get(3)?,
        api_version: row.get(4)?,
        kind: row.get(5)?,
        name: row.get(6)?,
        status: row.get(7)?,
        message: row.get(8)?,
        category,
        tenant: row.get(10)?,
        unstructured,
        kubernetes_deleted_at: row.get(12)?,
    })
}

pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn encode_set(values: &[String]) -> Result<String, StoreError> {
    Ok(serde_json::to_string(values)?)
}

fn decode_set(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}
