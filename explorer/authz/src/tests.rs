use super::*;
use explorer_core::{Category, KindConfig, RoleRef, Subject, SubjectKind};

fn mk_object(cluster: &str, ns: &str, group: &str, kind: &str, name: &str) -> Object {
    Object {
        cluster: cluster.to_string(),
        namespace: ns.to_string(),
        api_group: group.to_string(),
        api_version: "v1".to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        status: String::new(),
        message: String::new(),
        category: Some(Category::Automation),
        tenant: String::new(),
        unstructured: serde_json::Value::Null,
        kubernetes_deleted_at: None,
    }
}

fn helm_release(cluster: &str, ns: &str, name: &str) -> Object {
    mk_object(cluster, ns, "helm.toolkit.fluxcd.io", "HelmRelease", name)
}

fn kustomization(cluster: &str, ns: &str, name: &str) -> Object {
    mk_object(cluster, ns, "kustomize.toolkit.fluxcd.io", "Kustomization", name)
}

fn rule(groups: &[&str], resources: &[&str], verbs: &[&str], names: &[&str]) -> PolicyRule {
    let strings = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    PolicyRule {
        api_groups: strings(groups),
        resources: strings(resources),
        verbs: strings(verbs),
        resource_names: strings(names),
    }
}

fn role(cluster: &str, kind: &str, ns: &str, name: &str, rules: Vec<PolicyRule>) -> Role {
    Role {
        cluster: cluster.to_string(),
        namespace: ns.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        policy_rules: rules,
    }
}

fn binding(
    cluster: &str,
    kind: &str,
    ns: &str,
    role_kind: &str,
    role_name: &str,
    subject: Subject,
) -> RoleBinding {
    RoleBinding {
        cluster: cluster.to_string(),
        namespace: ns.to_string(),
        kind: kind.to_string(),
        name: format!("{role_name}-binding"),
        role_ref: RoleRef {
            kind: role_kind.to_string(),
            name: role_name.to_string(),
        },
        subjects: vec![subject],
    }
}

fn group(name: &str) -> Subject {
    Subject {
        kind: SubjectKind::Group,
        name: name.to_string(),
        namespace: String::new(),
        api_group: "rbac.authorization.k8s.io".to_string(),
    }
}

fn authorizer() -> Authorizer {
    Authorizer::new(ResourceMap::new(&KindConfig::default()))
}

fn helm_reader(cluster: &str, ns: &str) -> (Role, RoleBinding) {
    (
        role(
            cluster,
            "Role",
            ns,
            "role-a",
            vec![rule(
                &["helm.toolkit.fluxcd.io"],
                &["helmreleases"],
                &["get", "list", "watch"],
                &[],
            )],
        ),
        binding(cluster, "RoleBinding", ns, "Role", "role-a", group("group-a")),
    )
}

#[test]
fn namespaced_roles_grant_their_namespace_only() {
    let (r, b) = helm_reader("cluster-a", "ns-a");
    let mut authz = authorizer().for_request(
        Principal::new("user-a", ["group-a"]),
        vec![r],
        vec![b],
    );

    assert_eq!(authz.allows(&helm_release("cluster-a", "ns-a", "a")), Ok(true));
    assert_eq!(authz.allows(&helm_release("cluster-a", "ns-b", "b")), Ok(false));
    assert_eq!(
        authz.allows(&kustomization("cluster-a", "ns-a", "k")),
        Ok(false),
        "other resources are not granted"
    );
    assert_eq!(
        authz.allows(&helm_release("cluster-b", "ns-a", "a")),
        Ok(false),
        "grants do not cross clusters"
    );
}

#[test]
fn other_principals_are_denied() {
    let (r, b) = helm_reader("cluster-a", "ns-a");
    let mut authz = authorizer().for_request(
        Principal::new("user-b", ["group-b"]),
        vec![r],
        vec![b],
    );
    assert_eq!(authz.allows(&helm_release("cluster-a", "ns-a", "a")), Ok(false));
}

#[test]
fn cluster_role_bindings_grant_every_namespace() {
    let roles = vec![role(
        "cluster-a",
        "ClusterRole",
        "",
        "flux-view",
        vec![rule(&["helm.toolkit.fluxcd.io"], &["helmreleases"], &["list"], &[])],
    )];
    let bindings = vec![binding(
        "cluster-a",
        "ClusterRoleBinding",
        "",
        "ClusterRole",
        "flux-view",
        group("group-a"),
    )];
    let mut authz =
        authorizer().for_request(Principal::new("user-a", ["group-a"]), roles, bindings);

    assert_eq!(authz.allows(&helm_release("cluster-a", "ns-a", "a")), Ok(true));
    assert_eq!(authz.allows(&helm_release("cluster-a", "ns-b", "b")), Ok(true));
    assert_eq!(authz.allows(&helm_release("cluster-a", "", "c")), Ok(true));
    assert_eq!(authz.allows(&helm_release("cluster-b", "ns-a", "d")), Ok(false));
}

#[test]
fn role_bindings_may_reference_cluster_roles() {
    let roles = vec![role(
        "cluster-a",
        "ClusterRole",
        "",
        "flux-view",
        vec![rule(&["*"], &["*"], &["list"], &[])],
    )];
    let bindings = vec![binding(
        "cluster-a",
        "RoleBinding",
        "ns-a",
        "ClusterRole",
        "flux-view",
        group("group-a"),
    )];
    let mut authz =
        authorizer().for_request(Principal::new("user-a", ["group-a"]), roles, bindings);

    assert_eq!(authz.allows(&helm_release("cluster-a", "ns-a", "a")), Ok(true));
    assert_eq!(authz.allows(&helm_release("cluster-a", "ns-b", "b")), Ok(false));
}

#[test]
fn wildcard_resources_grant_every_mapped_kind() {
    let roles = vec![role(
        "cluster-a",
        "Role",
        "ns-a",
        "everything",
        vec![rule(&["*"], &["*"], &["list"], &[])],
    )];
    let bindings = vec![binding(
        "cluster-a",
        "RoleBinding",
        "ns-a",
        "Role",
        "everything",
        group("group-a"),
    )];
    let mut authz =
        authorizer().for_request(Principal::new("user-a", ["group-a"]), roles, bindings);

    assert_eq!(authz.allows(&helm_release("cluster-a", "ns-a", "a")), Ok(true));
    assert_eq!(authz.allows(&kustomization("cluster-a", "ns-a", "k")), Ok(true));
    assert_eq!(
        authz.allows(&mk_object("cluster-a", "ns-a", "", "Event", "ev")),
        Ok(true)
    );
    assert_eq!(
        authz.allows(&mk_object("cluster-a", "ns-a", "example.com", "Widget", "w")),
        Ok(false),
        "unmapped kinds are denied"
    );
}

#[test]
fn rules_must_grant_list() {
    let roles = vec![role(
        "cluster-a",
        "Role",
        "ns-a",
        "getter",
        vec![rule(
            &["helm.toolkit.fluxcd.io"],
            &["helmreleases"],
            &["get", "watch"],
            &[],
        )],
    )];
    let bindings = vec![binding(
        "cluster-a",
        "RoleBinding",
        "ns-a",
        "Role",
        "getter",
        group("group-a"),
    )];
    let mut authz =
        authorizer().for_request(Principal::new("user-a", ["group-a"]), roles, bindings);
    assert_eq!(authz.allows(&helm_release("cluster-a", "ns-a", "a")), Ok(false));
}

#[test]
fn resource_names_restrict_grants() {
    let roles = vec![role(
        "cluster-a",
        "Role",
        "ns-a",
        "podinfo-only",
        vec![rule(
            &["helm.toolkit.fluxcd.io"],
            &["helmreleases"],
            &["list"],
            &["podinfo"],
        )],
    )];
    let bindings = vec![binding(
        "cluster-a",
        "RoleBinding",
        "ns-a",
        "Role",
        "podinfo-only",
        Subject {
            kind: SubjectKind::User,
            name: "user-a".to_string(),
            namespace: String::new(),
            api_group: String::new(),
        },
    )];
    let mut authz =
        authorizer().for_request(Principal::new("user-a", Vec::<String>::new()), roles, bindings);
    assert_eq!(
        authz.allows(&helm_release("cluster-a", "ns-a", "podinfo")),
        Ok(true)
    );
    assert_eq!(
        authz.allows(&helm_release("cluster-a", "ns-a", "other")),
        Ok(false)
    );
}

#[test]
fn unresolvable_bindings_deny() {
    let bindings = vec![binding(
        "cluster-a",
        "RoleBinding",
        "ns-a",
        "Role",
        "missing",
        group("group-a"),
    )];
    let mut authz =
        authorizer().for_request(Principal::new("user-a", ["group-a"]), vec![], bindings);
    assert_eq!(authz.allows(&helm_release("cluster-a", "ns-a", "a")), Ok(false));
}

#[test]
fn resolvers_are_built_once_per_cluster() {
    let (r, b) = helm_reader("cluster-a", "ns-a");
    let mut authz = authorizer().for_request(
        Principal::new("user-a", ["group-a"]),
        vec![r],
        vec![b],
    );
    for i in 0..10 {
        authz
            .allows(&helm_release("cluster-a", "ns-a", &format!("hr-{i}")))
            .unwrap();
    }
    assert_eq!(authz.resolved_clusters(), 1);
    authz.allows(&helm_release("cluster-b", "ns-a", "x")).unwrap();
    assert_eq!(authz.resolved_clusters(), 2);
}

#[test]
fn cluster_authorizers_reject_foreign_objects() {
    let (r, b) = helm_reader("cluster-a", "ns-a");
    let mut authz = authorizer().for_cluster(
        Principal::new("user-a", ["group-a"]),
        "cluster-a",
        vec![r],
        vec![b],
    );
    assert_eq!(authz.cluster(), "cluster-a");
    assert_eq!(authz.allows(&helm_release("cluster-a", "ns-a", "a")), Ok(true));
    assert!(matches!(
        authz.allows(&helm_release("cluster-b", "ns-a", "a")),
        Err(AuthzError::ClusterMismatch { .. })
    ));
}
