//! Planner scenarios against realistic pod templates

use devswap_common::{Error, PersistPath, PersistenceOptions, ReplaceRequest, ReplaceTarget};
use devswap_persist::plan;
use k8s_openapi::api::core::v1::PodSpec;

fn pod_spec(yaml: &str) -> PodSpec {
    serde_yaml::from_str(yaml).expect("valid pod spec")
}

fn web_spec() -> PodSpec {
    pod_spec(
        r#"
containers:
  - name: app
    image: ghcr.io/acme/web:1.4.2
    ports:
      - containerPort: 8080
  - name: sidecar
    image: envoyproxy/envoy:v1.31
"#,
    )
}

fn request(workload: &str, paths: Vec<PersistPath>) -> ReplaceRequest {
    ReplaceRequest {
        target: ReplaceTarget::deployment(workload),
        persist_paths: paths,
        ..Default::default()
    }
}

/// Story: a developer persists /data of the app container in a two-container pod
#[test]
fn story_web_app_data_is_persisted() {
    let req = request("web", vec![PersistPath::new("/data").in_container("app")]);
    let out = plan(&req, "web", web_spec()).expect("plan succeeds");

    let volumes = out.volumes.as_ref().expect("volumes");
    assert_eq!(volumes.len(), 1);
    assert_eq!(volumes[0].name, "devspace-persistence");
    let pvc = volumes[0].persistent_volume_claim.as_ref().expect("pvc source");
    assert_eq!(pvc.claim_name, "web");

    let app = &out.containers[0];
    let mounts = app.volume_mounts.as_ref().expect("app mounts");
    assert_eq!(mounts.len(), 1);
    assert_eq!(mounts[0].name, "devspace-persistence");
    assert_eq!(mounts[0].mount_path, "/data");
    assert_eq!(mounts[0].sub_path.as_deref(), Some("path-0"));
    assert!(out.containers[1].volume_mounts.is_none());

    let inits = out.init_containers.as_ref().expect("init containers");
    assert_eq!(inits.len(), 1);
    assert_eq!(inits[0].name, "path-0-init");
    assert_eq!(inits[0].image.as_deref(), Some("ghcr.io/acme/web:1.4.2"));
    let command = [
        inits[0].command.clone().unwrap_or_default(),
        inits[0].args.clone().unwrap_or_default(),
    ]
    .concat()
    .join(" ");
    assert!(command.contains("/devspace-persistence"));
    assert!(command.contains("/data"));
}

/// Story: forgetting containerName in a multi-container pod is a hard error
#[test]
fn story_ambiguous_target_lists_all_containers() {
    let spec = pod_spec(
        r#"
containers:
  - name: a
    image: alpine
  - name: b
    image: alpine
"#,
    );
    let req = request("multi", vec![PersistPath::new("/x")]);
    match plan(&req, "multi", spec) {
        Err(Error::AmbiguousContainer { path, containers }) => {
            assert_eq!(path, "/x");
            assert_eq!(containers, vec!["a".to_string(), "b".to_string()]);
        }
        other => panic!("expected AmbiguousContainer, got {:?}", other),
    }
}

/// Story: the first error aborts planning; later paths are never considered
#[test]
fn story_first_error_wins() {
    let req = request(
        "web",
        vec![
            PersistPath::new("/ok").in_container("app"),
            PersistPath::new("/bad").in_container("missing"),
            PersistPath::new("/ambiguous"),
        ],
    );
    let err = plan(&req, "web", web_spec()).unwrap_err();
    assert_eq!(err.path(), Some("/bad"));
    assert!(matches!(err, Error::ContainerNotFound { .. }));
}

#[test]
fn single_container_with_no_paths_adds_only_the_volume() {
    let spec = pod_spec("containers: [{name: app, image: nginx}]");
    let out = plan(&request("web", vec![]), "web", spec).expect("plan");
    assert_eq!(out.volumes.as_ref().map(Vec::len), Some(1));
    assert!(out.containers[0].volume_mounts.is_none());
    assert!(out.init_containers.is_none());
}

#[test]
fn claim_override_is_used_regardless_of_workload() {
    let mut req = request("web", vec![]);
    req.persistence_options = Some(PersistenceOptions {
        name: Some("custom-pvc".to_string()),
        ..Default::default()
    });
    let out = plan(&req, "web", web_spec()).expect("plan");
    let pvc = out.volumes.expect("volumes")[0]
        .persistent_volume_claim
        .clone()
        .expect("pvc");
    assert_eq!(pvc.claim_name, "custom-pvc");
}

#[test]
fn read_only_and_skip_populate_keep_mount_without_init() {
    let mut ro = PersistPath::new("/ro").in_container("app");
    ro.read_only = true;
    let mut skip = PersistPath::new("/skip").in_container("app");
    skip.skip_populate = true;

    let out = plan(&request("web", vec![ro, skip]), "web", web_spec()).expect("plan");
    let mounts = out.containers[0].volume_mounts.as_ref().expect("mounts");
    assert_eq!(mounts.len(), 2);
    assert_eq!(mounts[0].read_only, Some(true));
    assert_eq!(mounts[1].read_only, Some(false));
    assert!(out.init_containers.is_none());
}

#[test]
fn absent_and_default_options_plan_identically() {
    let paths = vec![PersistPath::new("/data").in_container("app")];
    let absent = request("web", paths.clone());
    let explicit = ReplaceRequest {
        persistence_options: Some(PersistenceOptions::default()),
        ..request("web", paths)
    };
    assert_eq!(
        plan(&absent, "web", web_spec()).expect("plan"),
        plan(&explicit, "web", web_spec()).expect("plan")
    );
}

#[test]
fn independent_copies_plan_identically() {
    let source = web_spec();
    let req = request(
        "web",
        vec![
            PersistPath::new("/data").in_container("app"),
            PersistPath::new("/var/cache").in_container("sidecar"),
            PersistPath::new("/etc/conf").in_container("app").at_volume_path("conf"),
        ],
    );

    let first = plan(&req, "web", source.clone()).expect("plan");
    let second = plan(&req, "web", source.clone()).expect("plan");
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).expect("json"),
        serde_json::to_string(&second).expect("json")
    );
    // the source template is untouched
    assert_eq!(source, web_spec());
}

#[test]
fn sub_path_follows_list_position() {
    let req = request(
        "web",
        vec![
            PersistPath::new("/a").in_container("app"),
            PersistPath::new("/b").in_container("app"),
            PersistPath::new("/c").in_container("sidecar"),
        ],
    );
    let out = plan(&req, "web", web_spec()).expect("plan");
    let app: Vec<_> = out.containers[0]
        .volume_mounts
        .iter()
        .flatten()
        .map(|m| m.sub_path.clone().unwrap_or_default())
        .collect();
    assert_eq!(app, vec!["path-0", "path-1"]);
    let sidecar = out.containers[1].volume_mounts.as_ref().expect("mounts");
    assert_eq!(sidecar[0].sub_path.as_deref(), Some("path-2"));

    let init_names: Vec<_> = out
        .init_containers
        .iter()
        .flatten()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(init_names, vec!["path-0-init", "path-1-init", "path-2-init"]);
}
