//! Persistence planning
//!
//! Planning runs in two steps. [`PersistencePlan::resolve`] validates the
//! request against a borrowed spec and derives every mount and init
//! container; it fails on the first problem. [`PersistencePlan::apply`]
//! then appends everything to an owned spec and cannot fail, so callers
//! never observe a half-applied plan.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaimVolumeSource, PodSpec, Volume, VolumeMount,
};
use tracing::debug;

use devswap_common::{Error, ReplaceRequest, Result, PERSISTENCE_VOLUME_NAME};

use crate::population::{clean_path, PopulationInitContainer};

/// Resolved mount of one persist path into its container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeMountPlan {
    /// Position of the persist path in the request
    pub index: usize,
    /// Container receiving the mount
    pub container: String,
    /// Sub path on the persistence volume
    pub sub_path: String,
    /// Mount path inside the container (the persist path itself)
    pub mount_path: String,
    /// The persist path's own read-only flag
    pub read_only: bool,
}

impl VolumeMountPlan {
    /// Render the Kubernetes volume mount
    pub fn to_volume_mount(&self) -> VolumeMount {
        VolumeMount {
            name: PERSISTENCE_VOLUME_NAME.to_string(),
            mount_path: self.mount_path.clone(),
            sub_path: Some(self.sub_path.clone()),
            read_only: Some(self.read_only),
            ..Default::default()
        }
    }
}

/// Everything a replace operation adds to a pod spec for persistence
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistencePlan {
    /// Claim backing the persistence volume
    pub claim_name: String,
    /// Attach the claim read-only
    pub read_only: bool,
    /// Mounts in persist-path order
    pub mounts: Vec<VolumeMountPlan>,
    /// Population init containers in persist-path order
    pub init_containers: Vec<PopulationInitContainer>,
}

impl PersistencePlan {
    /// Validate `request` against `spec` and derive the plan.
    ///
    /// `workload` names the claim when the request does not override it.
    pub fn resolve(request: &ReplaceRequest, workload: &str, spec: &PodSpec) -> Result<Self> {
        let names = container_names(&spec.containers)?;

        if spec
            .volumes
            .iter()
            .flatten()
            .any(|v| v.name == PERSISTENCE_VOLUME_NAME)
        {
            return Err(Error::configuration_at(
                "spec.volumes",
                format!(
                    "pod spec already has a '{}' volume; plan from the original template",
                    PERSISTENCE_VOLUME_NAME
                ),
            ));
        }

        let options = request.persistence();
        let claim_name = options.claim_name(workload).to_string();

        let mut mounts = Vec::new();
        let mut init_containers = Vec::new();
        let mut claimed: BTreeSet<(String, String)> = BTreeSet::new();

        for (index, path) in request.persist_paths.iter().enumerate() {
            if path.is_inert() {
                continue;
            }

            let sub_path = path.sub_path(index);
            let requested = request.container_for(path);

            if names.len() > 1 && requested.is_none() {
                return Err(Error::AmbiguousContainer {
                    path: path.path.clone(),
                    containers: names,
                });
            }

            let container = match requested {
                Some(name) => spec.containers.iter().find(|c| c.name == name),
                None => spec.containers.first(),
            }
            .ok_or_else(|| Error::ContainerNotFound {
                path: path.path.clone(),
                container: requested.unwrap_or_default().to_string(),
                available: names.clone(),
            })?;

            let mount_path = clean_path(&path.path);
            let already_mounted = container
                .volume_mounts
                .iter()
                .flatten()
                .any(|m| clean_path(&m.mount_path) == mount_path);
            if already_mounted || !claimed.insert((container.name.clone(), mount_path)) {
                return Err(Error::configuration_at(
                    format!("persistPaths[{}].path", index),
                    format!(
                        "path {} is already mounted in container '{}'",
                        path.path, container.name
                    ),
                ));
            }

            debug!(
                index,
                path = %path.path,
                container = %container.name,
                sub_path = %sub_path,
                "planned persist path mount"
            );
            mounts.push(VolumeMountPlan {
                index,
                container: container.name.clone(),
                sub_path: sub_path.clone(),
                mount_path: path.path.clone(),
                read_only: path.read_only,
            });

            if path.read_only || options.read_only || path.skip_populate {
                continue;
            }

            let image = container
                .image
                .as_deref()
                .filter(|i| !i.is_empty())
                .ok_or_else(|| {
                    Error::configuration_at(
                        format!("persistPaths[{}]", index),
                        format!(
                            "container '{}' has no image to populate {} from",
                            container.name, path.path
                        ),
                    )
                })?;
            let init = PopulationInitContainer {
                index,
                image: image.to_string(),
                source_path: path.path.clone(),
                sub_path,
            };
            if spec
                .init_containers
                .iter()
                .flatten()
                .any(|c| c.name == init.name())
            {
                return Err(Error::configuration_at(
                    "spec.initContainers",
                    format!(
                        "pod spec already has an init container named '{}'",
                        init.name()
                    ),
                ));
            }
            init_containers.push(init);
        }

        Ok(Self {
            claim_name,
            read_only: options.read_only,
            mounts,
            init_containers,
        })
    }

    /// The claim-backed persistence volume
    pub fn volume(&self) -> Volume {
        Volume {
            name: PERSISTENCE_VOLUME_NAME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: self.claim_name.clone(),
                read_only: Some(self.read_only),
            }),
            ..Default::default()
        }
    }

    /// Append the volume, mounts and init containers to `spec`
    pub fn apply(&self, mut spec: PodSpec) -> PodSpec {
        spec.volumes.get_or_insert_with(Vec::new).push(self.volume());

        for mount in &self.mounts {
            if let Some(container) = spec
                .containers
                .iter_mut()
                .find(|c| c.name == mount.container)
            {
                container
                    .volume_mounts
                    .get_or_insert_with(Vec::new)
                    .push(mount.to_volume_mount());
            }
        }

        if !self.init_containers.is_empty() {
            spec.init_containers
                .get_or_insert_with(Vec::new)
                .extend(self.init_containers.iter().map(PopulationInitContainer::to_container));
        }

        spec
    }
}

/// Plan persistence for `workload` and apply it to an owned spec.
///
/// On error the pod spec is dropped; nothing partially mutated escapes.
pub fn plan(request: &ReplaceRequest, workload: &str, spec: PodSpec) -> Result<PodSpec> {
    let plan = PersistencePlan::resolve(request, workload, &spec)?;
    debug!(
        workload = %workload,
        claim = %plan.claim_name,
        mounts = plan.mounts.len(),
        init_containers = plan.init_containers.len(),
        "applying persistence plan"
    );
    Ok(plan.apply(spec))
}

/// Container names in spec order, rejecting duplicates
fn container_names(containers: &[Container]) -> Result<Vec<String>> {
    let mut seen = BTreeSet::new();
    for c in containers {
        if !seen.insert(c.name.as_str()) {
            return Err(Error::configuration_at(
                "spec.containers",
                format!("container name '{}' is not unique", c.name),
            ));
        }
    }
    Ok(containers.iter().map(|c| c.name.clone()).collect())
}
