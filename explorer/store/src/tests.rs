use super::*;
use chrono::{Duration as ChronoDuration, Utc};
use explorer_core::{
    Category, KindConfig, Object, PolicyRule, Query, Role, RoleBinding, RoleRef, Subject,
    SubjectKind, Tenant,
};
use maplit::btreemap;
use serde_json::json;
use std::{sync::Arc, time::Duration};

fn mk_object(cluster: &str, ns: &str, kind: &str, name: &str) -> Object {
    let (group, version, category) = match kind {
        "HelmRelease" => ("helm.toolkit.fluxcd.io", "v2", Category::Automation),
        "Kustomization" => ("kustomize.toolkit.fluxcd.io", "v1", Category::Automation),
        "GitRepository" => ("source.toolkit.fluxcd.io", "v1", Category::Source),
        "Event" => ("", "v1", Category::Event),
        _ => ("example.com", "v1", Category::Template),
    };
    Object {
        cluster: cluster.to_string(),
        namespace: ns.to_string(),
        api_group: group.to_string(),
        api_version: version.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        status: "Success".to_string(),
        message: String::new(),
        category: Some(category),
        tenant: String::new(),
        unstructured: json!({
            "apiVersion": format!("{group}/{version}"),
            "kind": kind,
            "metadata": {"name": name, "namespace": ns},
        }),
        kubernetes_deleted_at: None,
    }
}

fn mk_role(cluster: &str, ns: &str, name: &str, rules: Vec<PolicyRule>) -> Role {
    Role {
        cluster: cluster.to_string(),
        namespace: ns.to_string(),
        kind: "Role".to_string(),
        name: name.to_string(),
        policy_rules: rules,
    }
}

fn mk_rule(groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    let strings = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    PolicyRule {
        api_groups: strings(groups),
        resources: strings(resources),
        verbs: strings(verbs),
        resource_names: vec![],
    }
}

fn mk_binding(cluster: &str, ns: &str, name: &str, role: &str, group: &str) -> RoleBinding {
    RoleBinding {
        cluster: cluster.to_string(),
        namespace: ns.to_string(),
        kind: "RoleBinding".to_string(),
        name: name.to_string(),
        role_ref: RoleRef {
            kind: "Role".to_string(),
            name: role.to_string(),
        },
        subjects: vec![Subject {
            kind: SubjectKind::Group,
            name: group.to_string(),
            namespace: String::new(),
            api_group: "rbac.authorization.k8s.io".to_string(),
        }],
    }
}

fn collect(iter: ObjectIter) -> Vec<Object> {
    iter.collect::<Result<Vec<_>, _>>().unwrap()
}

fn names(objects: &[Object]) -> Vec<&str> {
    objects.iter().map(|o| o.name.as_str()).collect()
}

#[test]
fn stored_objects_are_upserted() {
    let store = Store::in_memory().unwrap();
    let mut obj = mk_object("cluster-a", "ns-a", "HelmRelease", "podinfo");

    store.store_objects(&[obj.clone()]).unwrap();
    let found = collect(store.get_objects(Some(&[obj.id()][..]), &Query::default()));
    assert_eq!(found, vec![obj.clone()]);

    obj.status = "Failed".to_string();
    obj.message = "install retries exhausted".to_string();
    store.store_objects(&[obj.clone()]).unwrap();
    store.store_objects(&[obj.clone()]).unwrap();

    assert_eq!(store.count_objects().unwrap(), 1);
    assert_eq!(store.get_object_by_id(&obj.id()).unwrap(), Some(obj));
}

#[test]
fn deletion_timestamps_round_trip() {
    let store = Store::in_memory().unwrap();
    let mut obj = mk_object("cluster-a", "ns-a", "Event", "ev-0");
    obj.kubernetes_deleted_at = Some(Utc::now());
    store.store_objects(&[obj.clone()]).unwrap();
    assert_eq!(store.get_object_by_id(&obj.id()).unwrap(), Some(obj));
}

#[test]
fn invalid_objects_fail_the_whole_call() {
    let store = Store::in_memory().unwrap();
    let good = mk_object("cluster-a", "ns-a", "HelmRelease", "good");
    let mut bad = mk_object("cluster-a", "ns-a", "HelmRelease", "bad");
    bad.cluster.clear();

    let err = store.store_objects(&[good.clone(), bad]).unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)), "{err}");
    assert_eq!(store.count_objects().unwrap(), 0);

    let no_namespace = mk_object("cluster-a", "", "HelmRelease", "no-ns");
    let err = store.store_objects(&[good, no_namespace]).unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)), "{err}");
    assert_eq!(store.count_objects().unwrap(), 0);
}

#[test]
fn get_objects_filters_orders_and_pages() {
    let store = Store::in_memory().unwrap();
    store
        .store_objects(&[
            mk_object("cluster-a", "ns-a", "HelmRelease", "b"),
            mk_object("cluster-a", "ns-a", "HelmRelease", "a"),
            mk_object("cluster-a", "ns-b", "Kustomization", "c"),
            mk_object("cluster-b", "ns-a", "HelmRelease", "d"),
        ])
        .unwrap();

    let all = collect(store.get_objects(None, &Query::default()));
    assert_eq!(names(&all), vec!["a", "b", "c", "d"]);

    let query = Query::default()
        .with_filter("cluster:cluster-a")
        .with_filter("kind:HelmRelease")
        .with_filter("kind:Kustomization");
    assert_eq!(
        names(&collect(store.get_objects(None, &query))),
        vec!["a", "b", "c"]
    );

    let query = Query {
        descending: true,
        offset: 1,
        limit: Some(2),
        ..Default::default()
    };
    assert_eq!(names(&collect(store.get_objects(None, &query))), vec!["c", "b"]);

    let query = Query::default().with_filter("color:blue");
    assert!(collect(store.get_objects(None, &query)).is_empty());

    assert!(collect(store.get_objects(Some(&[][..]), &Query::default())).is_empty());
}

#[test]
fn object_iterators_page_lazily() {
    let store = Store::in_memory().unwrap();
    let objects = (0..600)
        .map(|i| mk_object("cluster-a", "ns-a", "Event", &format!("ev-{i:04}")))
        .collect::<Vec<_>>();
    store.store_objects(&objects).unwrap();

    assert_eq!(collect(store.get_all_objects()).len(), 600);

    let mut iter = store.get_all_objects();
    assert_eq!(iter.next().unwrap().unwrap().name, "ev-0000");
    iter.close();
    assert!(iter.is_closed());
    assert!(iter.next().is_none());

    let query = Query {
        offset: 590,
        ..Default::default()
    };
    assert_eq!(collect(store.get_objects(None, &query)).len(), 10);
}

#[test]
fn delete_all_objects_is_scoped_to_clusters() {
    let store = Store::in_memory().unwrap();
    store
        .store_objects(&[
            mk_object("cluster-x", "ns-a", "HelmRelease", "a"),
            mk_object("cluster-x", "ns-b", "Event", "b"),
            mk_object("cluster-y", "ns-a", "HelmRelease", "c"),
        ])
        .unwrap();

    store
        .delete_all_objects(&["cluster-x".to_string()])
        .unwrap();
    assert_eq!(names(&collect(store.get_all_objects())), vec!["c"]);
}

#[test]
fn roles_replace_their_rules() {
    let store = Store::in_memory().unwrap();
    let mut role = mk_role(
        "cluster-a",
        "ns-a",
        "role-a",
        vec![
            mk_rule(&["helm.toolkit.fluxcd.io"], &["helmreleases"], &["get", "list"]),
            mk_rule(&[""], &["events"], &["list"]),
        ],
    );
    store.store_roles(&[role.clone()]).unwrap();
    assert_eq!(store.get_roles().unwrap(), vec![role.clone()]);
    assert_eq!(store.count_rows("policy_rules"), 2);

    role.policy_rules.truncate(1);
    store.store_roles(&[role.clone()]).unwrap();
    assert_eq!(store.get_roles().unwrap(), vec![role.clone()]);
    assert_eq!(store.count_rows("policy_rules"), 1);

    store.delete_roles(&[role]).unwrap();
    assert!(store.get_roles().unwrap().is_empty());
    assert_eq!(store.count_rows("policy_rules"), 0, "no orphaned rules");
}

#[test]
fn roles_without_rules_are_dropped() {
    let store = Store::in_memory().unwrap();
    let mut role = mk_role(
        "cluster-a",
        "ns-a",
        "role-a",
        vec![mk_rule(&["*"], &["*"], &["list"])],
    );
    store.store_roles(&[role.clone()]).unwrap();
    assert_eq!(store.get_roles().unwrap().len(), 1);

    role.policy_rules.clear();
    store.store_roles(&[role]).unwrap();
    assert!(store.get_roles().unwrap().is_empty());
    assert_eq!(store.count_rows("policy_rules"), 0);

    let empty = mk_role("cluster-a", "ns-a", "role-b", vec![]);
    store.store_roles(&[empty]).unwrap();
    assert!(store.get_roles().unwrap().is_empty());
}

#[test]
fn bindings_replace_their_subjects() {
    let store = Store::in_memory().unwrap();
    let mut binding = mk_binding("cluster-a", "ns-a", "binding-a", "role-a", "group-a");
    store.store_role_bindings(&[binding.clone()]).unwrap();
    assert_eq!(store.get_role_bindings().unwrap(), vec![binding.clone()]);

    binding.subjects.push(Subject {
        kind: SubjectKind::ServiceAccount,
        name: "flux".to_string(),
        namespace: "flux-system".to_string(),
        api_group: String::new(),
    });
    binding.role_ref.name = "role-b".to_string();
    store.store_role_bindings(&[binding.clone()]).unwrap();
    assert_eq!(store.get_role_bindings().unwrap(), vec![binding.clone()]);
    assert_eq!(store.count_rows("subjects"), 2);

    store.delete_role_bindings(&[binding]).unwrap();
    assert!(store.get_role_bindings().unwrap().is_empty());
    assert_eq!(store.count_rows("subjects"), 0, "no orphaned subjects");
}

#[test]
fn delete_all_rbac_rows_for_a_cluster() {
    let store = Store::in_memory().unwrap();
    let rule = mk_rule(&["*"], &["*"], &["list"]);
    store
        .store_roles(&[
            mk_role("cluster-x", "ns-a", "role-a", vec![rule.clone()]),
            mk_role("cluster-y", "ns-a", "role-a", vec![rule]),
        ])
        .unwrap();
    store
        .store_role_bindings(&[
            mk_binding("cluster-x", "ns-a", "binding-a", "role-a", "group-a"),
            mk_binding("cluster-y", "ns-a", "binding-a", "role-a", "group-a"),
        ])
        .unwrap();

    let clusters = ["cluster-x".to_string()];
    store.delete_all_roles(&clusters).unwrap();
    store.delete_all_role_bindings(&clusters).unwrap();

    let roles = store.get_roles().unwrap();
    assert_eq!(roles.len(), 1);
    assert_eq!(roles[0].cluster, "cluster-y");
    let bindings = store.get_role_bindings().unwrap();
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].cluster, "cluster-y");
    assert_eq!(store.count_rows("policy_rules"), 1);
    assert_eq!(store.count_rows("subjects"), 1);
}

#[test]
fn access_rules_join_bindings_and_roles() {
    let store = Store::in_memory().unwrap();
    store
        .store_roles(&[mk_role(
            "cluster-a",
            "ns-a",
            "role-a",
            vec![mk_rule(
                &["helm.toolkit.fluxcd.io"],
                &["helmreleases"],
                &["get", "list", "watch"],
            )],
        )])
        .unwrap();
    store
        .store_role_bindings(&[
            mk_binding("cluster-a", "ns-a", "binding-a", "role-a", "group-a"),
            mk_binding("cluster-a", "ns-a", "dangling", "role-missing", "group-b"),
        ])
        .unwrap();

    let rules = store.get_access_rules().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].namespace, "ns-a");
    assert_eq!(rules[0].principal, "group:group-a");
    assert_eq!(
        rules[0].accessible_kinds,
        vec!["helm.toolkit.fluxcd.io/helmreleases".to_string()]
    );
}

#[test]
fn tenants() {
    let store = Store::in_memory().unwrap();
    let tenant = |ns: &str| Tenant {
        cluster_name: "cluster-a".to_string(),
        name: "team-a".to_string(),
        namespace: ns.to_string(),
    };
    store
        .store_tenants(&[tenant("ns-a"), tenant("ns-b"), tenant("ns-a")])
        .unwrap();
    assert_eq!(store.get_tenants().unwrap(), vec![tenant("ns-a"), tenant("ns-b")]);

    store
        .delete_tenants_for_namespaces("cluster-a", &["ns-a".to_string()])
        .unwrap();
    assert_eq!(store.get_tenants().unwrap(), vec![tenant("ns-b")]);

    store.delete_tenants(&[tenant("ns-b")]).unwrap();
    assert!(store.get_tenants().unwrap().is_empty());

    let mut invalid = tenant("ns-c");
    invalid.name.clear();
    assert!(store.store_tenants(&[invalid]).is_err());
}

#[test]
fn search_matches_terms_by_prefix() {
    let store = Store::in_memory().unwrap();
    let index = Indexer::in_memory(store.clone()).unwrap();
    let objects = vec![
        mk_object("cluster-a", "ns-a", "HelmRelease", "podinfo"),
        mk_object("cluster-a", "ns-a", "HelmRelease", "podinfo-canary"),
        mk_object("cluster-b", "ns-b", "Kustomization", "infra"),
    ];
    store.store_objects(&objects).unwrap();
    index.add(&objects).unwrap();

    let found = collect(index.search(&Query::terms("podinfo")).unwrap());
    assert_eq!(names(&found), vec!["podinfo", "podinfo-canary"]);

    let found = collect(index.search(&Query::terms("pod cluster-a")).unwrap());
    assert_eq!(found.len(), 2);

    let found = collect(index.search(&Query::terms("infra ns-a")).unwrap());
    assert!(found.is_empty(), "all terms must match");

    let query = Query::terms("podinfo").with_filter("name:podinfo-canary");
    assert_eq!(
        names(&collect(index.search(&query).unwrap())),
        vec!["podinfo-canary"]
    );

    assert!(matches!(
        index.search(&Query::default()),
        Err(StoreError::InvalidQuery(_))
    ));
}

#[test]
fn facets_include_labels() {
    let store = Store::in_memory().unwrap();
    let index = Indexer::in_memory(store).unwrap();
    let mut labelled = mk_object("cluster-a", "ns-a", "HelmRelease", "podinfo");
    labelled.unstructured["metadata"]["labels"] = json!({"app": "podinfo", "tier": "web"});
    index
        .add(&[
            labelled,
            mk_object("cluster-b", "ns-b", "GitRepository", "repo"),
        ])
        .unwrap();

    let facets = index.list_facets().unwrap();
    assert_eq!(
        facets,
        btreemap! {
            "cluster".to_string() => vec!["cluster-a".to_string(), "cluster-b".to_string()],
            "kind".to_string() => vec!["GitRepository".to_string(), "HelmRelease".to_string()],
            "namespace".to_string() => vec!["ns-a".to_string(), "ns-b".to_string()],
            "category".to_string() => vec!["automation".to_string(), "source".to_string()],
            "status".to_string() => vec!["Success".to_string()],
            "labels.app".to_string() => vec!["podinfo".to_string()],
            "labels.tier".to_string() => vec!["web".to_string()],
        }
    );
}

#[test]
fn delete_all_removes_cluster_from_store_and_index() {
    let store = Store::in_memory().unwrap();
    let index = Indexer::in_memory(store.clone()).unwrap();
    let objects = vec![
        mk_object("cluster-x", "ns-a", "HelmRelease", "podinfo-x"),
        mk_object("cluster-x", "ns-b", "HelmRelease", "other-x"),
        mk_object("cluster-y", "ns-a", "HelmRelease", "podinfo-y"),
    ];
    store.store_objects(&objects).unwrap();
    index.add(&objects).unwrap();

    store
        .delete_all_objects(&["cluster-x".to_string()])
        .unwrap();
    assert_eq!(index.remove_by_query("cluster:cluster-x").unwrap(), 2);

    assert_eq!(names(&collect(store.get_all_objects())), vec!["podinfo-y"]);
    assert_eq!(index.count().unwrap(), 1);
    let found = collect(index.search(&Query::terms("podinfo")).unwrap());
    assert_eq!(names(&found), vec!["podinfo-y"]);

    assert!(index.remove_by_query("color:blue").is_err());
    assert!(index.remove_by_query("").is_err());
}

#[test]
fn rebuild_reindexes_the_store() {
    let store = Store::in_memory().unwrap();
    let index = Indexer::in_memory(store.clone()).unwrap();
    let objects = (0..700)
        .map(|i| mk_object("cluster-a", "ns-a", "Event", &format!("ev-{i}")))
        .collect::<Vec<_>>();
    store.store_objects(&objects).unwrap();
    index
        .add(&[mk_object("cluster-z", "ns-z", "Event", "stale")])
        .unwrap();

    assert_eq!(index.rebuild().unwrap(), 700);
    assert_eq!(index.count().unwrap(), 700);
    assert!(collect(index.search(&Query::terms("stale")).unwrap()).is_empty());
}

#[test]
fn reindexing_does_not_scan_the_index() {
    let store = Store::in_memory().unwrap();
    let index = Indexer::in_memory(store).unwrap();
    let objects = (0..20_000)
        .map(|i| mk_object("cluster-a", "ns-a", "Event", &format!("ev-{i}")))
        .collect::<Vec<_>>();
    index.add(&objects).unwrap();

    let started = std::time::Instant::now();
    index.add(&objects[..1_000]).unwrap();
    index.remove(&objects[1_000..2_000]).unwrap();
    let elapsed = started.elapsed();

    assert_eq!(index.count().unwrap(), 19_000);
    assert!(
        elapsed < Duration::from_secs(5),
        "replacing 2000 documents took {elapsed:?}"
    );
}

#[test]
fn searches_may_match_any_number_of_objects() {
    let store = Store::in_memory().unwrap();
    let index = Indexer::in_memory(store.clone()).unwrap();
    // More matches than SQLite accepts as bound parameters in one statement.
    let objects = (0..33_000)
        .map(|i| {
            let ns = if i % 2 == 0 { "ns-a" } else { "ns-b" };
            mk_object("cluster-a", ns, "Event", &format!("ev-{i:05}"))
        })
        .collect::<Vec<_>>();
    store.store_objects(&objects).unwrap();
    index.add(&objects).unwrap();

    let found = collect(index.search(&Query::terms("ev")).unwrap());
    assert_eq!(found.len(), 33_000);
    assert_eq!(found[0].name, "ev-00000");

    let query = Query {
        offset: 10,
        limit: Some(3),
        ..Query::terms("ev").with_filter("namespace:ns-b")
    };
    let found = collect(index.search(&query).unwrap());
    assert_eq!(names(&found), vec!["ev-00021", "ev-00023", "ev-00025"]);

    let query = Query {
        limit: Some(0),
        ..Query::terms("ev")
    };
    assert!(collect(index.search(&query).unwrap()).is_empty());
}

#[test]
fn retention_purges_expired_objects() {
    let store = Store::in_memory().unwrap();
    let index = Indexer::in_memory(store.clone()).unwrap();
    let now = Utc::now();

    let mut expired = mk_object("cluster-a", "ns-a", "Event", "expired");
    expired.kubernetes_deleted_at = Some(now - ChronoDuration::hours(2));
    let mut recent = mk_object("cluster-a", "ns-a", "Event", "recent");
    recent.kubernetes_deleted_at = Some(now - ChronoDuration::minutes(30));
    let live = mk_object("cluster-a", "ns-a", "Event", "live");
    let mut unmanaged = mk_object("cluster-a", "ns-a", "HelmRelease", "unmanaged");
    unmanaged.kubernetes_deleted_at = Some(now - ChronoDuration::days(30));

    let objects = vec![expired, recent, live, unmanaged];
    store.store_objects(&objects).unwrap();
    index.add(&objects).unwrap();

    let retention = RetentionManager::new(
        store.clone(),
        index.clone(),
        Arc::new(KindConfig::default()),
        Duration::from_secs(60),
    );
    assert_eq!(retention.sweep(now).unwrap(), 1);

    assert_eq!(
        names(&collect(store.get_all_objects())),
        vec!["live", "recent", "unmanaged"]
    );
    assert_eq!(index.count().unwrap(), 3);
    assert!(collect(index.search(&Query::terms("expired")).unwrap()).is_empty());

    assert_eq!(retention.sweep(now).unwrap(), 0);
}

#[tokio::test]
async fn retention_runs_until_shutdown() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .try_init()
        .ok();

    let store = Store::in_memory().unwrap();
    let index = Indexer::in_memory(store.clone()).unwrap();
    let mut expired = mk_object("cluster-a", "ns-a", "Event", "expired");
    expired.kubernetes_deleted_at = Some(Utc::now() - ChronoDuration::hours(2));
    store.store_objects(&[expired]).unwrap();

    let shutdown = tokio_util::sync::CancellationToken::new();
    let task = tokio::spawn(
        RetentionManager::new(
            store.clone(),
            index,
            Arc::new(KindConfig::default()),
            Duration::from_secs(60),
        )
        .run(shutdown.clone()),
    );

    // The first tick fires immediately.
    for _ in 0..100 {
        if store.count_objects().unwrap() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.count_objects().unwrap(), 0);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("retention task must stop")
        .unwrap();
}
