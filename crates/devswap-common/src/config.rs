//! Replace request types
//!
//! A `ReplaceRequest` arrives already parsed from the resolved project
//! configuration. It is immutable for the duration of one replace or revert.

use std::collections::BTreeMap;
use std::path::Path;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, REPLACED_LABEL};

/// Claim size used when `PersistenceOptions.size` is not set
pub const DEFAULT_CLAIM_SIZE: &str = "10Gi";

/// Access mode used when `PersistenceOptions.accessModes` is empty
pub const DEFAULT_ACCESS_MODE: &str = "ReadWriteOnce";

const VALID_ACCESS_MODES: &[&str] = &[
    "ReadWriteOnce",
    "ReadOnlyMany",
    "ReadWriteMany",
    "ReadWriteOncePod",
];

// =============================================================================
// Target selection
// =============================================================================

/// Kind of the workload being replaced
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TargetKind {
    /// apps/v1 Deployment
    #[default]
    Deployment,
    /// Bare core/v1 Pod
    Pod,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deployment => write!(f, "Deployment"),
            Self::Pod => write!(f, "Pod"),
        }
    }
}

impl std::str::FromStr for TargetKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Deployment" => Ok(Self::Deployment),
            "Pod" => Ok(Self::Pod),
            other => Err(Error::configuration(format!(
                "unknown workload kind '{}'",
                other
            ))),
        }
    }
}

/// Identity of the live workload to replace
///
/// Either `name` (with `kind`) or `labelSelector` must be set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceTarget {
    /// Namespace of the workload; the client default is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Workload name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Workload kind when selecting by name
    #[serde(default)]
    pub kind: TargetKind,

    /// Labels the workload's pods must carry
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label_selector: BTreeMap<String, String>,
}

impl ReplaceTarget {
    /// Target a Deployment by name
    pub fn deployment(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Target a bare Pod by name
    pub fn pod(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            kind: TargetKind::Pod,
            ..Default::default()
        }
    }

    /// Render the label selector as a Kubernetes selector string
    ///
    /// Always excludes pods created by a previous replace so a selector never
    /// resolves to our own replacement.
    pub fn selector_string(&self) -> String {
        let mut parts: Vec<String> = self
            .label_selector
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        parts.push(format!("!{}", REPLACED_LABEL));
        parts.join(",")
    }
}

// =============================================================================
// Persistence
// =============================================================================

/// Options for the persistence volume
///
/// Absence of the whole record behaves exactly like `PersistenceOptions::default()`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceOptions {
    /// Claim name override (defaults to the workload name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Attach the claim read-only and skip population for every path
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,

    /// Requested storage size (e.g., "10Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,

    /// Storage class; omitted means the cluster default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Access modes (ReadWriteOnce, ReadOnlyMany, ReadWriteMany, ReadWriteOncePod)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_modes: Vec<String>,
}

impl PersistenceOptions {
    /// Resolve the claim name for a workload
    pub fn claim_name<'a>(&'a self, workload: &'a str) -> &'a str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => workload,
        }
    }

    /// Render the claim an external provisioner should create for a workload
    ///
    /// devswap never submits this object; it only references the claim by name.
    pub fn claim_template(&self, workload: &str, namespace: &str) -> PersistentVolumeClaim {
        let access_modes = if self.access_modes.is_empty() {
            vec![DEFAULT_ACCESS_MODE.to_string()]
        } else {
            self.access_modes.clone()
        };
        let size = self.size.as_deref().unwrap_or(DEFAULT_CLAIM_SIZE);

        let mut requests = BTreeMap::new();
        requests.insert("storage".to_string(), Quantity(size.to_string()));

        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(self.claim_name(workload).to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(access_modes),
                storage_class_name: self.storage_class_name.clone(),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(requests),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// A container path whose contents must survive replacement
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistPath {
    /// Source path inside the container; empty entries are ignored
    #[serde(default)]
    pub path: String,

    /// Sub path on the volume (defaults to `path-{index}`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_path: Option<String>,

    /// Container to mount into; required when the workload has several
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,

    /// Mount read-only (also disables population)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,

    /// Do not copy the image contents into the volume
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_populate: bool,
}

impl PersistPath {
    /// Persist `path` with defaults
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Target a specific container
    pub fn in_container(mut self, container: impl Into<String>) -> Self {
        self.container_name = Some(container.into());
        self
    }

    /// Use an explicit sub path on the volume
    pub fn at_volume_path(mut self, volume_path: impl Into<String>) -> Self {
        self.volume_path = Some(volume_path.into());
        self
    }

    /// Entries with an empty source path take no part in planning
    pub fn is_inert(&self) -> bool {
        self.path.is_empty()
    }

    /// Effective sub path on the volume for the entry at `index`
    pub fn sub_path(&self, index: usize) -> String {
        match self.volume_path.as_deref() {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => format!("path-{}", index),
        }
    }
}

// =============================================================================
// Request
// =============================================================================

/// One replace operation's worth of configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceRequest {
    /// Workload to replace
    #[serde(default)]
    pub target: ReplaceTarget,

    /// Default container for persist paths that do not name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,

    /// Persistence volume options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence_options: Option<PersistenceOptions>,

    /// Ordered persist paths; the position determines the default sub path
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub persist_paths: Vec<PersistPath>,
}

impl ReplaceRequest {
    /// Parse a request from YAML (JSON is valid YAML)
    pub fn from_yaml(input: &str) -> Result<Self> {
        let request: Self = serde_yaml::from_str(input)?;
        request.validate()?;
        Ok(request)
    }

    /// Load and validate a request file
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&data)
    }

    /// Persistence options, with absence treated as all defaults
    pub fn persistence(&self) -> PersistenceOptions {
        self.persistence_options.clone().unwrap_or_default()
    }

    /// Container a persist path targets, falling back to the request default
    pub fn container_for<'a>(&'a self, path: &'a PersistPath) -> Option<&'a str> {
        path.container_name
            .as_deref()
            .filter(|c| !c.is_empty())
            .or_else(|| self.container_name.as_deref().filter(|c| !c.is_empty()))
    }

    /// Validate the request before any cluster call
    pub fn validate(&self) -> Result<()> {
        let has_name = self.target.name.as_deref().is_some_and(|n| !n.is_empty());
        let has_selector = !self.target.label_selector.is_empty();
        match (has_name, has_selector) {
            (false, false) => {
                return Err(Error::configuration_at(
                    "target",
                    "either name or labelSelector is required",
                ))
            }
            (true, true) => {
                return Err(Error::configuration_at(
                    "target",
                    "name and labelSelector are mutually exclusive",
                ))
            }
            _ => {}
        }

        if let Some(opts) = &self.persistence_options {
            if opts.size.as_deref().is_some_and(str::is_empty) {
                return Err(Error::configuration_at(
                    "persistenceOptions.size",
                    "must not be empty",
                ));
            }
            for (i, mode) in opts.access_modes.iter().enumerate() {
                if !VALID_ACCESS_MODES.contains(&mode.as_str()) {
                    return Err(Error::configuration_at(
                        format!("persistenceOptions.accessModes[{}]", i),
                        format!("unknown access mode '{}'", mode),
                    ));
                }
            }
        }

        for (i, p) in self.persist_paths.iter().enumerate() {
            if p.is_inert() {
                continue;
            }
            if !p.path.starts_with('/') {
                return Err(Error::configuration_at(
                    format!("persistPaths[{}].path", i),
                    format!("path '{}' must be absolute", p.path),
                ));
            }
            if let Some(vp) = p.volume_path.as_deref().filter(|v| !v.is_empty()) {
                if vp.starts_with('/') || vp.split('/').any(|seg| seg == "..") {
                    return Err(Error::configuration_at(
                        format!("persistPaths[{}].volumePath", i),
                        format!("volume path '{}' must be relative and stay inside the volume", vp),
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_for(name: &str) -> ReplaceRequest {
        ReplaceRequest {
            target: ReplaceTarget::deployment(name),
            ..Default::default()
        }
    }

    #[test]
    fn parses_camel_case_yaml() {
        let yaml = r#"
target:
  name: web
  namespace: dev
containerName: app
persistenceOptions:
  name: custom-pvc
  readOnly: true
  storageClassName: fast
  accessModes: [ReadWriteMany]
persistPaths:
  - path: /data
    volumePath: data
    containerName: app
    skipPopulate: true
  - path: /cache
    readOnly: true
"#;
        let req = ReplaceRequest::from_yaml(yaml).expect("valid request");
        assert_eq!(req.target.name.as_deref(), Some("web"));
        assert_eq!(req.target.namespace.as_deref(), Some("dev"));
        assert_eq!(req.target.kind, TargetKind::Deployment);
        assert_eq!(req.container_name.as_deref(), Some("app"));
        let opts = req.persistence_options.as_ref().expect("options");
        assert_eq!(opts.name.as_deref(), Some("custom-pvc"));
        assert!(opts.read_only);
        assert_eq!(opts.access_modes, vec!["ReadWriteMany".to_string()]);
        assert_eq!(req.persist_paths.len(), 2);
        assert!(req.persist_paths[0].skip_populate);
        assert!(req.persist_paths[1].read_only);
    }

    #[test]
    fn target_kind_parses_pod() {
        let req = ReplaceRequest::from_yaml("target: {name: worker, kind: Pod}").expect("valid");
        assert_eq!(req.target.kind, TargetKind::Pod);
        assert!("Job".parse::<TargetKind>().is_err());
    }

    #[test]
    fn sub_path_defaults_to_index() {
        assert_eq!(PersistPath::new("/data").sub_path(0), "path-0");
        assert_eq!(PersistPath::new("/data").sub_path(3), "path-3");
        assert_eq!(
            PersistPath::new("/data").at_volume_path("").sub_path(2),
            "path-2"
        );
        assert_eq!(
            PersistPath::new("/data").at_volume_path("db").sub_path(2),
            "db"
        );
    }

    #[test]
    fn claim_name_defaults_to_workload() {
        let opts = PersistenceOptions::default();
        assert_eq!(opts.claim_name("web"), "web");

        let opts = PersistenceOptions {
            name: Some("custom-pvc".to_string()),
            ..Default::default()
        };
        assert_eq!(opts.claim_name("web"), "custom-pvc");

        let opts = PersistenceOptions {
            name: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(opts.claim_name("web"), "web");
    }

    #[test]
    fn absent_options_behave_like_defaults() {
        let absent = request_for("web");
        let explicit = ReplaceRequest {
            persistence_options: Some(PersistenceOptions::default()),
            ..request_for("web")
        };
        assert_eq!(absent.persistence(), explicit.persistence());
    }

    #[test]
    fn claim_template_applies_defaults() {
        let pvc = PersistenceOptions::default().claim_template("web", "dev");
        assert_eq!(pvc.metadata.name.as_deref(), Some("web"));
        assert_eq!(pvc.metadata.namespace.as_deref(), Some("dev"));
        let spec = pvc.spec.expect("spec");
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteOnce".to_string()]));
        assert_eq!(spec.storage_class_name, None);
        let storage = spec
            .resources
            .and_then(|r| r.requests)
            .and_then(|r| r.get("storage").cloned())
            .expect("storage request");
        assert_eq!(storage.0, "10Gi");
    }

    #[test]
    fn claim_template_uses_overrides() {
        let opts = PersistenceOptions {
            name: Some("shared".to_string()),
            size: Some("1Gi".to_string()),
            storage_class_name: Some("fast".to_string()),
            access_modes: vec!["ReadWriteMany".to_string()],
            ..Default::default()
        };
        let pvc = opts.claim_template("web", "dev");
        assert_eq!(pvc.metadata.name.as_deref(), Some("shared"));
        let spec = pvc.spec.expect("spec");
        assert_eq!(spec.storage_class_name.as_deref(), Some("fast"));
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteMany".to_string()]));
    }

    #[test]
    fn container_for_falls_back_to_request_default() {
        let req = ReplaceRequest {
            container_name: Some("app".to_string()),
            ..request_for("web")
        };
        let explicit = PersistPath::new("/data").in_container("sidecar");
        let implicit = PersistPath::new("/data");
        assert_eq!(req.container_for(&explicit), Some("sidecar"));
        assert_eq!(req.container_for(&implicit), Some("app"));
        assert_eq!(request_for("web").container_for(&implicit), None);
    }

    #[test]
    fn selector_string_excludes_replacements() {
        let mut target = ReplaceTarget::default();
        target.label_selector.insert("app".to_string(), "web".to_string());
        target.label_selector.insert("tier".to_string(), "api".to_string());
        assert_eq!(target.selector_string(), "app=web,tier=api,!devspace.sh/replaced");
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn validation_requires_target() {
        let err = ReplaceRequest::default().validate().unwrap_err();
        assert!(matches!(err, Error::Configuration { field: Some(ref f), .. } if f == "target"));
    }

    #[test]
    fn validation_rejects_name_and_selector_together() {
        let mut req = request_for("web");
        req.target.label_selector.insert("app".to_string(), "web".to_string());
        assert!(req.validate().is_err());
    }

    #[test]
    fn validation_rejects_relative_paths() {
        let mut req = request_for("web");
        req.persist_paths.push(PersistPath::new("data"));
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("persistPaths[0].path"));
    }

    #[test]
    fn validation_ignores_inert_paths() {
        let mut req = request_for("web");
        req.persist_paths.push(PersistPath::new(""));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn validation_rejects_escaping_volume_paths() {
        for bad in ["/abs", "../up", "a/../../b"] {
            let mut req = request_for("web");
            req.persist_paths
                .push(PersistPath::new("/data").at_volume_path(bad));
            let err = req.validate().unwrap_err();
            assert!(err.to_string().contains("volumePath"), "{}", bad);
        }
    }

    #[test]
    fn validation_rejects_unknown_access_modes() {
        let req = ReplaceRequest {
            persistence_options: Some(PersistenceOptions {
                access_modes: vec!["ReadWriteSometimes".to_string()],
                ..Default::default()
            }),
            ..request_for("web")
        };
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("accessModes[0]"));
    }

    #[test]
    fn validation_rejects_empty_size() {
        let req = ReplaceRequest {
            persistence_options: Some(PersistenceOptions {
                size: Some(String::new()),
                ..Default::default()
            }),
            ..request_for("web")
        };
        assert!(req.validate().is_err());
    }
}
