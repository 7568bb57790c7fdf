use super::*;
use explorer_authz::ResourceMap;
use explorer_core::{
    Category, KindConfig, PolicyRule, Role, RoleBinding, RoleRef, Subject, SubjectKind,
};
use serde_json::json;

fn helm_release(cluster: &str, ns: &str, name: &str) -> Object {
    Object {
        cluster: cluster.to_string(),
        namespace: ns.to_string(),
        api_group: "helm.toolkit.fluxcd.io".to_string(),
        api_version: "v2".to_string(),
        kind: "HelmRelease".to_string(),
        name: name.to_string(),
        status: "Success".to_string(),
        message: String::new(),
        category: Some(Category::Automation),
        tenant: String::new(),
        unstructured: json!({
            "apiVersion": "helm.toolkit.fluxcd.io/v2",
            "kind": "HelmRelease",
            "metadata": {"name": name, "namespace": ns, "labels": {"app": name}},
        }),
        kubernetes_deleted_at: None,
    }
}

fn role_a(cluster: &str) -> Role {
    Role {
        cluster: cluster.to_string(),
        namespace: "ns-a".to_string(),
        kind: "Role".to_string(),
        name: "role-a".to_string(),
        policy_rules: vec![PolicyRule {
            api_groups: vec!["helm.toolkit.fluxcd.io".to_string()],
            resources: vec!["helmreleases".to_string()],
            verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
            resource_names: vec![],
        }],
    }
}

fn binding_a(cluster: &str) -> RoleBinding {
    RoleBinding {
        cluster: cluster.to_string(),
        namespace: "ns-a".to_string(),
        kind: "RoleBinding".to_string(),
        name: "role-a-binding".to_string(),
        role_ref: RoleRef {
            kind: "Role".to_string(),
            name: "role-a".to_string(),
        },
        subjects: vec![Subject {
            kind: SubjectKind::Group,
            name: "group-a".to_string(),
            namespace: String::new(),
            api_group: "rbac.authorization.k8s.io".to_string(),
        }],
    }
}

/// Seeds `cluster-a` with `role-a`, bound to `group-a`, granting HelmReleases in `ns-a`.
fn service(objects: &[Object]) -> QueryService {
    let store = Store::in_memory().unwrap();
    let index = Indexer::in_memory(store.clone()).unwrap();
    store.store_roles(&[role_a("cluster-a")]).unwrap();
    store.store_role_bindings(&[binding_a("cluster-a")]).unwrap();
    store.store_objects(objects).unwrap();
    index.add(objects).unwrap();
    QueryService::new(
        store,
        index,
        Authorizer::new(ResourceMap::new(&KindConfig::default())),
    )
}

fn names(objects: &[Object]) -> Vec<&str> {
    objects.iter().map(|o| o.name.as_str()).collect()
}

fn group_a() -> Principal {
    Principal::new("user-a", ["group-a"])
}

#[test]
fn returns_only_objects_the_principal_may_list() {
    let svc = service(&[
        helm_release("cluster-a", "ns-a", "podinfo-a"),
        helm_release("cluster-a", "ns-b", "podinfo-b"),
    ]);

    let objects = svc.run_query(&group_a(), &Query::default()).unwrap();
    assert_eq!(names(&objects), vec!["podinfo-a"]);

    let objects = svc
        .run_query(&Principal::new("user-b", ["group-b"]), &Query::default())
        .unwrap();
    assert!(objects.is_empty());
}

#[test]
fn free_text_queries_are_authorized() {
    let svc = service(&[
        helm_release("cluster-a", "ns-a", "podinfo"),
        helm_release("cluster-a", "ns-a", "nginx"),
        helm_release("cluster-a", "ns-b", "podinfo"),
    ]);

    let objects = svc.run_query(&group_a(), &Query::terms("podin")).unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].namespace, "ns-a");
    assert_eq!(objects[0].name, "podinfo");
}

#[test]
fn clusters_are_authorized_by_their_own_rules() {
    let svc = service(&[
        helm_release("cluster-a", "ns-a", "a"),
        helm_release("cluster-b", "ns-a", "b"),
    ]);
    let objects = svc.run_query(&group_a(), &Query::default()).unwrap();
    assert_eq!(names(&objects), vec!["a"], "cluster-b has no bindings");
}

#[test]
fn pages_count_only_visible_objects() {
    let mut objects = Vec::new();
    for i in 0..5 {
        objects.push(helm_release("cluster-a", "ns-a", &format!("a-{i}")));
        objects.push(helm_release("cluster-a", "ns-b", &format!("a-{i}-hidden")));
    }
    let svc = service(&objects);

    let query = Query {
        offset: 1,
        limit: Some(2),
        ..Default::default()
    };
    let page = svc.run_query(&group_a(), &query).unwrap();
    assert_eq!(names(&page), vec!["a-1", "a-2"]);

    let query = Query {
        offset: 3,
        limit: Some(10),
        descending: true,
        ..Default::default()
    };
    let page = svc.run_query(&group_a(), &query).unwrap();
    assert_eq!(names(&page), vec!["a-1", "a-0"]);

    let query = Query {
        limit: Some(0),
        ..Default::default()
    };
    assert!(svc.run_query(&group_a(), &query).unwrap().is_empty());
}

#[test]
fn unsupported_filters_match_nothing() {
    let svc = service(&[helm_release("cluster-a", "ns-a", "podinfo")]);

    let query = Query::default().with_filter("namespace:ns-a");
    assert_eq!(svc.run_query(&group_a(), &query).unwrap().len(), 1);

    let query = Query::default()
        .with_filter("namespace:ns-a")
        .with_filter("color:blue");
    assert!(svc.run_query(&group_a(), &query).unwrap().is_empty());
}

#[test]
fn facets_cover_the_catalogue() {
    let svc = service(&[
        helm_release("cluster-a", "ns-a", "podinfo"),
        helm_release("cluster-b", "ns-b", "nginx"),
    ]);
    let facets = svc.list_facets(&group_a()).unwrap();
    assert_eq!(facets["cluster"], vec!["cluster-a", "cluster-b"]);
    assert_eq!(facets["namespace"], vec!["ns-a", "ns-b"]);
    assert_eq!(facets["labels.app"], vec!["nginx", "podinfo"]);
    assert_eq!(facets["kind"], vec!["HelmRelease"]);
}
