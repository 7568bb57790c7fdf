pub(crate) const STORE: &str = r#"
CREATE TABLE IF NOT EXISTS objects (
    id                    TEXT PRIMARY KEY NOT NULL,
    cluster               TEXT NOT NULL,
    namespace             TEXT NOT NULL,
    api_group             TEXT NOT NULL,
    api_version           TEXT NOT NULL,
    kind                  TEXT NOT NULL,
    name                  TEXT NOT NULL,
    status                TEXT NOT NULL,
    message               TEXT NOT NULL,
    category              TEXT,
    tenant                TEXT NOT NULL,
    unstructured          TEXT NOT NULL,
    kubernetes_deleted_at TEXT
);
CREATE INDEX IF NOT EXISTS objects_by_cluster ON objects (cluster);

CREATE TABLE IF NOT EXISTS roles (
    id        TEXT PRIMARY KEY NOT NULL,
    cluster   TEXT NOT NULL,
    namespace TEXT NOT NULL,
    kind      TEXT NOT NULL,
    name      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS roles_by_cluster ON roles (cluster);

CREATE TABLE IF NOT EXISTS policy_rules (
    role_id        TEXT NOT NULL REFERENCES roles (id) ON DELETE CASCADE,
    position       INTEGER NOT NULL,
    api_groups     TEXT NOT NULL,
    resources      TEXT NOT NULL,
    verbs          TEXT NOT NULL,
    resource_names TEXT NOT NULL,
    PRIMARY KEY (role_id, position)
);

CREATE TABLE IF NOT EXISTS role_bindings (
    id            TEXT PRIMARY KEY NOT NULL,
    cluster       TEXT NOT NULL,
    namespace     TEXT NOT NULL,
    kind          TEXT NOT NULL,
    name          TEXT NOT NULL,
    role_ref_kind TEXT NOT NULL,
    role_ref_name TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS role_bindings_by_cluster ON role_bindings (cluster);

CREATE TABLE IF NOT EXISTS subjects (
    binding_id TEXT NOT NULL REFERENCES role_bindings (id) ON DELETE CASCADE,
    position   INTEGER NOT NULL,
    kind       TEXT NOT NULL,
    name       TEXT NOT NULL,
    namespace  TEXT NOT NULL,
    api_group  TEXT NOT NULL,
    PRIMARY KEY (binding_id, position)
);

CREATE TABLE IF NOT EXISTS tenants (
    id           TEXT PRIMARY KEY NOT NULL,
    cluster_name TEXT NOT NULL,
    name         TEXT NOT NULL,
    namespace    TEXT NOT NULL
);
"#;

// Identifiers are tokenized with `-`, `_` and `.` kept inside tokens so that names such as
// `podinfo-canary` or `helm.toolkit.fluxcd.io` match as a whole or by prefix.
pub(crate) const INDEX: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS documents USING fts5 (
    id UNINDEXED,
    cluster,
    namespace,
    api_group,
    api_version,
    kind,
    name,
    status,
    category,
    tenant,
    message,
    tokenize = "unicode61 tokenchars '-_.'"
);

-- Maps object IDs to document rowids. FTS5 columns cannot be indexed, so documents are only ever
-- looked up by rowid.
CREATE TABLE IF NOT EXISTS doc_ids (
    doc INTEGER PRIMARY KEY,
    id  TEXT UNIQUE NOT NULL
);

CREATE TABLE IF NOT EXISTS labels (
    id    TEXT NOT NULL,
    key   TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (id, key)
);
"#;

pub(crate) const OBJECT_COLUMNS: &str = "id, cluster, namespace, api_group, api_version, kind, \
    name, status, message, category, tenant, unstructured, kubernetes_deleted_at";

// Indexes written before `doc_ids` existed are backfilled from the documents' rowids.
pub(crate) const BACKFILL_DOC_IDS: &str = r#"
INSERT OR IGNORE INTO doc_ids (doc, id)
SELECT rowid, id FROM documents
WHERE NOT EXISTS (SELECT 1 FROM doc_ids LIMIT 1);
"#;

/// Search matches are staged here so that they can be joined against the objects table.
pub(crate) const SEARCH_IDS: &str =
    "CREATE TEMP TABLE IF NOT EXISTS search_ids (id TEXT PRIMARY KEY NOT NULL)";
