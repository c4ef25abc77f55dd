//! Replacement workloads and the record needed to undo them
//!
//! The replacement Deployment carries everything revert needs in its own
//! annotations, so a fresh process can restore the parent without any local
//! state:
//! - `devspace.sh/parent-kind` / `devspace.sh/parent-name`
//! - `devspace.sh/replicas`: parent replica count before scale-down
//! - `devspace.sh/original-pod`: the stripped original Pod, for bare Pods
//! - `devspace.sh/config-hash`: detects whether a re-run changes anything

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use devswap_common::kube_utils::{hash_json, strip_server_metadata};
use devswap_common::{
    replacement_name, Error, ReplaceRequest, Result, TargetKind, CONFIG_HASH_ANNOTATION,
    ORIGINAL_POD_ANNOTATION, PARENT_KIND_ANNOTATION, PARENT_NAME_ANNOTATION, REPLACED_LABEL,
    REPLICAS_ANNOTATION,
};

/// Label added by the ReplicaSet controller; never copied onto replacements
const POD_TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

/// The live workload being replaced
#[derive(Clone, Debug, PartialEq)]
pub enum ParentWorkload {
    /// A Deployment, neutralised by scaling to zero
    Deployment(Deployment),
    /// A bare Pod, neutralised by deletion
    Pod(Pod),
}

impl ParentWorkload {
    /// Kind of the parent
    pub fn kind(&self) -> TargetKind {
        match self {
            Self::Deployment(_) => TargetKind::Deployment,
            Self::Pod(_) => TargetKind::Pod,
        }
    }

    /// Name of the parent
    pub fn name(&self) -> &str {
        let meta = match self {
            Self::Deployment(d) => &d.metadata,
            Self::Pod(p) => &p.metadata,
        };
        meta.name.as_deref().unwrap_or_default()
    }

    /// Replica count of a Deployment parent (Kubernetes defaults it to 1)
    pub fn replicas(&self) -> Option<i32> {
        match self {
            Self::Deployment(d) => Some(d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1)),
            Self::Pod(_) => None,
        }
    }

    /// Deep copy of the parent's pod template with server-owned fields removed
    pub fn pod_template(&self) -> Result<PodTemplateSpec> {
        let mut template = match self {
            Self::Deployment(d) => d
                .spec
                .as_ref()
                .map(|s| s.template.clone())
                .ok_or_else(|| {
                    Error::configuration(format!("Deployment {} has no spec", self.name()))
                })?,
            Self::Pod(p) => PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: p.metadata.labels.clone(),
                    annotations: p.metadata.annotations.clone(),
                    ..Default::default()
                }),
                spec: p.spec.clone(),
            },
        };

        if template.spec.is_none() {
            return Err(Error::configuration(format!(
                "{} {} has no pod spec",
                self.kind(),
                self.name()
            )));
        }

        let meta = template.metadata.get_or_insert_with(ObjectMeta::default);
        strip_server_metadata(meta);
        if let Some(labels) = meta.labels.as_mut() {
            labels.remove(POD_TEMPLATE_HASH_LABEL);
        }
        if let Some(spec) = template.spec.as_mut() {
            // bound to the original pod; the replacement is scheduled fresh
            spec.node_name = None;
        }
        Ok(template)
    }

    /// The original Pod as recorded on the replacement, for bare-Pod parents
    fn recorded_pod(&self) -> Option<Pod> {
        match self {
            Self::Deployment(_) => None,
            Self::Pod(p) => {
                let mut pod = p.clone();
                strip_server_metadata(&mut pod.metadata);
                pod.status = None;
                if let Some(spec) = pod.spec.as_mut() {
                    // the scheduler picks a node again on revert
                    spec.node_name = None;
                }
                Some(pod)
            }
        }
    }
}

/// Hash of everything that shapes the replacement
pub fn config_hash(request: &ReplaceRequest, template: &PodTemplateSpec) -> Result<String> {
    hash_json(&(request, template))
}

/// Everything needed to undo a replacement
#[derive(Clone, Debug, PartialEq)]
pub struct ReplacementRecord {
    /// Kind of the replaced parent
    pub parent_kind: TargetKind,
    /// Name of the replaced parent
    pub parent_name: String,
    /// Name of the replacement Deployment
    pub replacement_name: String,
    /// Parent replica count before scale-down (Deployment parents)
    pub replicas: Option<i32>,
    /// Original Pod to re-create (bare-Pod parents)
    pub original_pod: Option<Pod>,
    /// Hash of request and original template
    pub config_hash: String,
}

impl ReplacementRecord {
    /// Read the record from a replacement Deployment.
    ///
    /// Returns `Ok(None)` when the Deployment is not a replacement.
    pub fn from_deployment(deployment: &Deployment) -> Result<Option<Self>> {
        let meta = &deployment.metadata;
        let is_replacement = meta
            .labels
            .as_ref()
            .and_then(|l| l.get(REPLACED_LABEL))
            .is_some_and(|v| v == "true");
        if !is_replacement {
            return Ok(None);
        }

        let name = meta.name.clone().unwrap_or_default();
        let empty = BTreeMap::new();
        let annotations = meta.annotations.as_ref().unwrap_or(&empty);
        let annotation = |key: &str| -> Result<&String> {
            annotations.get(key).ok_or_else(|| {
                Error::serialization(format!(
                    "replacement {} is missing annotation {}",
                    name, key
                ))
            })
        };

        let parent_kind: TargetKind = annotation(PARENT_KIND_ANNOTATION)?.parse()?;
        let parent_name = annotation(PARENT_NAME_ANNOTATION)?.clone();
        let config_hash = annotation(CONFIG_HASH_ANNOTATION)?.clone();

        let replicas = match annotations.get(REPLICAS_ANNOTATION) {
            Some(v) => Some(v.parse::<i32>().map_err(|e| {
                Error::serialization(format!(
                    "replacement {} has invalid {}: {}",
                    name, REPLICAS_ANNOTATION, e
                ))
            })?),
            None => None,
        };
        let original_pod = match annotations.get(ORIGINAL_POD_ANNOTATION) {
            Some(json) => Some(serde_json::from_str::<Pod>(json)?),
            None => None,
        };

        match parent_kind {
            TargetKind::Deployment if replicas.is_none() => {
                return Err(Error::serialization(format!(
                    "replacement {} of a Deployment is missing {}",
                    name, REPLICAS_ANNOTATION
                )))
            }
            TargetKind::Pod if original_pod.is_none() => {
                return Err(Error::serialization(format!(
                    "replacement {} of a Pod is missing {}",
                    name, ORIGINAL_POD_ANNOTATION
                )))
            }
            _ => {}
        }

        Ok(Some(Self {
            parent_kind,
            parent_name,
            replacement_name: name,
            replicas,
            original_pod,
            config_hash,
        }))
    }

    /// Pod to re-create on revert, ready for submission
    pub fn restorable_pod(&self) -> Option<Pod> {
        self.original_pod.clone().map(|mut pod| {
            strip_server_metadata(&mut pod.metadata);
            pod.status = None;
            pod
        })
    }
}

/// Build the replacement Deployment around an already planned pod template.
///
/// `replicas` is the parent's replica count to record; pass the value from an
/// existing record on re-runs so a parent already at zero is not recorded as zero.
pub fn build_replacement(
    parent: &ParentWorkload,
    namespace: &str,
    mut template: PodTemplateSpec,
    replicas: Option<i32>,
    config_hash: &str,
) -> Result<Deployment> {
    let template_meta = template.metadata.get_or_insert_with(ObjectMeta::default);
    let labels = template_meta.labels.get_or_insert_with(BTreeMap::new);
    labels.insert(REPLACED_LABEL.to_string(), "true".to_string());
    let labels = labels.clone();

    let mut annotations = BTreeMap::new();
    annotations.insert(
        PARENT_KIND_ANNOTATION.to_string(),
        parent.kind().to_string(),
    );
    annotations.insert(PARENT_NAME_ANNOTATION.to_string(), parent.name().to_string());
    annotations.insert(CONFIG_HASH_ANNOTATION.to_string(), config_hash.to_string());
    if let Some(replicas) = replicas {
        annotations.insert(REPLICAS_ANNOTATION.to_string(), replicas.to_string());
    }
    if let Some(pod) = parent.recorded_pod() {
        annotations.insert(
            ORIGINAL_POD_ANNOTATION.to_string(),
            serde_json::to_string(&pod)?,
        );
    }

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(replacement_name(parent.name())),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            },
            // a ReadWriteOnce claim cannot be attached by two pods during a rollout
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            template,
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Copy of a Deployment with a new replica count, keeping its resourceVersion
pub fn with_replicas(deployment: &Deployment, replicas: i32) -> Deployment {
    let mut scaled = deployment.clone();
    scaled.status = None;
    scaled.metadata.managed_fields = None;
    if let Some(spec) = scaled.spec.as_mut() {
        spec.replicas = Some(replicas);
    }
    scaled
}
