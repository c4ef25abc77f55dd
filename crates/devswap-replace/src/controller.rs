//! Replacement lifecycle for one managed workload
//!
//! Phase transitions:
//! - `Original` / `Failed` → `Replacing` → `Replaced` | `Failed`
//! - `Replaced` / `Failed` → `Reverting` → `Original` | `Failed`
//!
//! The controller only orchestrates. Planning happens in `devswap-persist`
//! against a private copy of the parent's template; the parent is never
//! touched until the replacement has been accepted by the API server.
//! Nothing is retried here: conflicts and cancellations are returned to
//! the caller, who decides whether to try again.

use std::collections::BTreeSet;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use devswap_common::kube_utils::{cancellable, CallSite};
use devswap_common::{
    replacement_name, Error, ReplaceRequest, Result, TargetKind, REPLACED_LABEL,
};

use crate::client::ReplaceKubeClient;
use crate::replacement::{
    build_replacement, config_hash, with_replicas, ParentWorkload, ReplacementRecord,
};

/// Label the ReplicaSet controller puts on every pod it owns
const POD_TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

/// Lifecycle phase of a managed workload
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplacePhase {
    /// The production workload is running unmodified
    #[default]
    Original,
    /// A replace is in flight
    Replacing,
    /// The replacement is running and the parent is neutralised
    Replaced,
    /// A revert is in flight
    Reverting,
    /// The last attempt failed; a new replace or revert may be started
    Failed,
}

impl std::fmt::Display for ReplacePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Original => write!(f, "Original"),
            Self::Replacing => write!(f, "Replacing"),
            Self::Replaced => write!(f, "Replaced"),
            Self::Reverting => write!(f, "Reverting"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Drives replace and revert for the workload named by one request
pub struct ReplaceController {
    client: Arc<dyn ReplaceKubeClient>,
    request: ReplaceRequest,
    namespace: String,
    phase: ReplacePhase,
    record: Option<ReplacementRecord>,
}

impl ReplaceController {
    /// Create a controller; `default_namespace` applies when the request names none
    pub fn new(
        client: Arc<dyn ReplaceKubeClient>,
        request: ReplaceRequest,
        default_namespace: &str,
    ) -> Self {
        let namespace = request
            .target
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| default_namespace.to_string());
        Self {
            client,
            request,
            namespace,
            phase: ReplacePhase::Original,
            record: None,
        }
    }

    /// Current phase
    pub fn phase(&self) -> ReplacePhase {
        self.phase
    }

    /// Record of the active replacement, if any
    pub fn record(&self) -> Option<&ReplacementRecord> {
        self.record.as_ref()
    }

    /// Namespace the workload lives in
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Adopt a replacement left behind by an earlier process.
    ///
    /// Only meaningful while no operation is in flight; moves `Original` or
    /// `Failed` to `Replaced` when a replacement exists, and `Replaced` back
    /// to `Original` when it has disappeared.
    pub async fn sync(&mut self, cancel: &CancellationToken) -> Result<ReplacePhase> {
        if matches!(self.phase, ReplacePhase::Replacing | ReplacePhase::Reverting) {
            return Err(Error::invalid_state(self.phase, "sync"));
        }

        let existing = self.find_replacement(cancel).await?;
        match existing {
            Some((_, record)) => {
                if self.phase != ReplacePhase::Replaced {
                    info!(
                        namespace = %self.namespace,
                        workload = %record.parent_name,
                        replacement = %record.replacement_name,
                        "adopted existing replacement"
                    );
                }
                self.record = Some(record);
                self.phase = ReplacePhase::Replaced;
            }
            None => {
                if self.phase == ReplacePhase::Replaced {
                    warn!(namespace = %self.namespace, "replacement disappeared from the cluster");
                    self.phase = ReplacePhase::Original;
                }
                self.record = None;
            }
        }
        Ok(self.phase)
    }

    /// Replace the workload with its development variant
    pub async fn replace(&mut self, cancel: &CancellationToken) -> Result<&ReplacementRecord> {
        if !matches!(self.phase, ReplacePhase::Original | ReplacePhase::Failed) {
            return Err(Error::invalid_state(self.phase, "replace"));
        }

        self.phase = ReplacePhase::Replacing;
        info!(namespace = %self.namespace, workload = ?self.request.target.name, "replacing workload");

        match self.run_replace(cancel).await {
            Ok(record) => {
                info!(
                    namespace = %self.namespace,
                    workload = %record.parent_name,
                    replacement = %record.replacement_name,
                    "workload replaced"
                );
                self.phase = ReplacePhase::Replaced;
                Ok(&*self.record.insert(record))
            }
            Err(e) => {
                warn!(namespace = %self.namespace, error = %e, retryable = e.is_retryable(), "replace failed");
                self.phase = ReplacePhase::Failed;
                Err(e)
            }
        }
    }

    /// Restore the original workload and remove the replacement
    pub async fn revert(&mut self, cancel: &CancellationToken) -> Result<()> {
        if !matches!(self.phase, ReplacePhase::Replaced | ReplacePhase::Failed) {
            return Err(Error::invalid_state(self.phase, "revert"));
        }

        self.phase = ReplacePhase::Reverting;
        info!(namespace = %self.namespace, "reverting workload");

        match self.run_revert(cancel).await {
            Ok(()) => {
                info!(namespace = %self.namespace, "workload reverted");
                self.record = None;
                self.phase = ReplacePhase::Original;
                Ok(())
            }
            Err(e) => {
                warn!(namespace = %self.namespace, error = %e, retryable = e.is_retryable(), "revert failed");
                self.phase = ReplacePhase::Failed;
                Err(e)
            }
        }
    }

    // =========================================================================
    // Replace
    // =========================================================================

    async fn run_replace(&self, cancel: &CancellationToken) -> Result<ReplacementRecord> {
        self.request.validate()?;

        let existing = self.find_replacement(cancel).await?;
        let parent = match self.resolve_parent(cancel).await? {
            Some(parent) => Some(parent),
            None => match existing.as_ref() {
                Some((_, record)) => self.recorded_parent(record, cancel).await?,
                None => None,
            },
        };
        let Some(parent) = parent else {
            return Err(Error::configuration_at(
                "target",
                format!("no workload matches {}", self.describe_target()),
            ));
        };
        let parent_name = parent.name().to_string();

        let mut template = parent.pod_template()?;
        let hash = config_hash(&self.request, &template)?;
        let spec = template.spec.take().unwrap_or_default();
        let planned = devswap_persist::plan(&self.request, &parent_name, spec)?;
        template.spec = Some(planned);

        let claim_name = self
            .request
            .persistence()
            .claim_name(&parent_name)
            .to_string();
        self.check_claim(&claim_name, cancel).await?;

        let replicas = existing
            .as_ref()
            .and_then(|(_, r)| r.replicas)
            .or_else(|| parent.replicas());
        let mut replacement = build_replacement(&parent, &self.namespace, template, replicas, &hash)?;
        let replacement_name = replacement_name(&parent_name);

        match existing {
            None => {
                self.call("create", "Deployment", &replacement_name, cancel, |c, ns| {
                    let replacement = replacement.clone();
                    async move { c.create_deployment(&ns, &replacement).await }
                })
                .await?;
            }
            Some((_, record)) if record.config_hash == hash => {
                debug!(
                    replacement = %replacement_name,
                    hash = %hash,
                    "replacement already up to date"
                );
            }
            Some((current, _)) => {
                replacement.metadata.resource_version = current.metadata.resource_version;
                self.call("replace", "Deployment", &replacement_name, cancel, |c, ns| {
                    let replacement = replacement.clone();
                    async move { c.replace_deployment(&ns, &replacement).await }
                })
                .await?;
            }
        }

        self.neutralise_parent(&parent, cancel).await?;

        ReplacementRecord::from_deployment(&replacement)?.ok_or_else(|| {
            Error::serialization(format!(
                "replacement {} is missing the {} label",
                replacement_name, REPLACED_LABEL
            ))
        })
    }

    /// Parent named by an existing replacement's record.
    ///
    /// A selector finds no pods once a previous run scaled the parent
    /// Deployment to zero or deleted the bare Pod.
    async fn recorded_parent(
        &self,
        record: &ReplacementRecord,
        cancel: &CancellationToken,
    ) -> Result<Option<ParentWorkload>> {
        match record.parent_kind {
            TargetKind::Deployment => {
                let name = record.parent_name.clone();
                Ok(self
                    .call("get", "Deployment", &record.parent_name, cancel, |c, ns| async move {
                        c.get_deployment(&ns, &name).await
                    })
                    .await?
                    .map(ParentWorkload::Deployment))
            }
            TargetKind::Pod => Ok(record.restorable_pod().map(ParentWorkload::Pod)),
        }
    }

    /// Scale a Deployment parent to zero, or delete a bare Pod parent
    async fn neutralise_parent(
        &self,
        parent: &ParentWorkload,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match parent {
            ParentWorkload::Deployment(d) => {
                if d.spec.as_ref().and_then(|s| s.replicas) == Some(0) {
                    return Ok(());
                }
                let scaled = with_replicas(d, 0);
                self.call("replace", "Deployment", parent.name(), cancel, |c, ns| {
                    async move { c.replace_deployment(&ns, &scaled).await }
                })
                .await?;
                info!(deployment = %parent.name(), "scaled parent to zero");
            }
            ParentWorkload::Pod(_) => {
                let name = parent.name().to_string();
                let deleted = self
                    .call("delete", "Pod", parent.name(), cancel, |c, ns| async move {
                        c.delete_pod(&ns, &name).await
                    })
                    .await?;
                if deleted {
                    info!(pod = %parent.name(), "deleted parent pod");
                }
            }
        }
        Ok(())
    }

    async fn check_claim(&self, claim: &str, cancel: &CancellationToken) -> Result<()> {
        let name = claim.to_string();
        let found = self
            .call("get", "PersistentVolumeClaim", claim, cancel, |c, ns| async move {
                c.get_claim(&ns, &name).await
            })
            .await?;
        if found.is_none() {
            warn!(
                namespace = %self.namespace,
                claim = %claim,
                "persistence claim does not exist yet; replacement pods stay Pending until it is provisioned"
            );
        }
        Ok(())
    }

    // =========================================================================
    // Revert
    // =========================================================================

    async fn run_revert(&self, cancel: &CancellationToken) -> Result<()> {
        let record = match self.record.clone() {
            Some(record) => Some(record),
            None => self.find_replacement(cancel).await?.map(|(_, r)| r),
        };
        let Some(record) = record else {
            info!(namespace = %self.namespace, "no replacement found, nothing to revert");
            return Ok(());
        };

        match record.parent_kind {
            TargetKind::Deployment => self.restore_deployment(&record, cancel).await?,
            TargetKind::Pod => self.restore_pod(&record, cancel).await?,
        }

        let name = record.replacement_name.clone();
        self.call("delete", "Deployment", &record.replacement_name, cancel, |c, ns| async move {
            c.delete_deployment(&ns, &name).await
        })
        .await?;
        debug!(replacement = %record.replacement_name, "deleted replacement");
        Ok(())
    }

    async fn restore_deployment(
        &self,
        record: &ReplacementRecord,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let name = record.parent_name.clone();
        let parent = self
            .call("get", "Deployment", &record.parent_name, cancel, |c, ns| async move {
                c.get_deployment(&ns, &name).await
            })
            .await?;
        let Some(parent) = parent else {
            warn!(deployment = %record.parent_name, "parent deployment no longer exists, skipping restore");
            return Ok(());
        };

        let replicas = record.replicas.unwrap_or(1);
        if parent.spec.as_ref().and_then(|s| s.replicas) == Some(replicas) {
            return Ok(());
        }
        let restored = with_replicas(&parent, replicas);
        self.call("replace", "Deployment", &record.parent_name, cancel, |c, ns| {
            async move { c.replace_deployment(&ns, &restored).await }
        })
        .await?;
        info!(deployment = %record.parent_name, replicas, "restored parent replicas");
        Ok(())
    }

    async fn restore_pod(&self, record: &ReplacementRecord, cancel: &CancellationToken) -> Result<()> {
        let name = record.parent_name.clone();
        let current = self
            .call("get", "Pod", &record.parent_name, cancel, |c, ns| async move {
                c.get_pod(&ns, &name).await
            })
            .await?;
        if current.is_some() {
            debug!(pod = %record.parent_name, "parent pod already exists");
            return Ok(());
        }

        let mut pod: Pod = record.restorable_pod().ok_or_else(|| {
            Error::serialization(format!(
                "replacement {} has no recorded pod",
                record.replacement_name
            ))
        })?;
        pod.metadata.namespace = Some(self.namespace.clone());
        self.call("create", "Pod", &record.parent_name, cancel, |c, ns| async move {
            c.create_pod(&ns, &pod).await
        })
        .await?;
        info!(pod = %record.parent_name, "re-created parent pod");
        Ok(())
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Find the replacement Deployment for this request's target
    async fn find_replacement(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<(Deployment, ReplacementRecord)>> {
        let candidates = match self.target_name() {
            Some(name) => {
                let replacement = replacement_name(name);
                let lookup = replacement.clone();
                self.call("get", "Deployment", &replacement, cancel, |c, ns| async move {
                    c.get_deployment(&ns, &lookup).await
                })
                .await?
                .into_iter()
                .collect::<Vec<_>>()
            }
            None => {
                let selector = self.replacement_selector();
                let lookup = selector.clone();
                self.call("list", "Deployment", &selector, cancel, |c, ns| async move {
                    c.list_deployments(&ns, &lookup).await
                })
                .await?
            }
        };

        let mut found = Vec::new();
        for deployment in candidates {
            if let Some(record) = ReplacementRecord::from_deployment(&deployment)? {
                found.push((deployment, record));
            }
        }
        if found.len() > 1 {
            let names: Vec<_> = found.iter().map(|(_, r)| r.replacement_name.clone()).collect();
            return Err(Error::configuration_at(
                "target.labelSelector",
                format!("selector matches several replacements: {}", names.join(", ")),
            ));
        }
        Ok(found.pop())
    }

    /// Resolve the live parent workload
    async fn resolve_parent(&self, cancel: &CancellationToken) -> Result<Option<ParentWorkload>> {
        if let Some(name) = self.target_name() {
            let lookup = name.to_string();
            return match self.request.target.kind {
                TargetKind::Deployment => Ok(self
                    .call("get", "Deployment", name, cancel, |c, ns| async move {
                        c.get_deployment(&ns, &lookup).await
                    })
                    .await?
                    .map(ParentWorkload::Deployment)),
                TargetKind::Pod => Ok(self
                    .call("get", "Pod", name, cancel, |c, ns| async move {
                        c.get_pod(&ns, &lookup).await
                    })
                    .await?
                    .map(ParentWorkload::Pod)),
            };
        }

        let selector = self.request.target.selector_string();
        let lookup = selector.clone();
        let pods = self
            .call("list", "Pod", &selector, cancel, |c, ns| async move {
                c.list_pods(&ns, &lookup).await
            })
            .await?;

        let mut parents: BTreeSet<(TargetKind, String)> = BTreeSet::new();
        let mut bare_pods = Vec::new();
        for pod in pods {
            match pod_parent(&pod)? {
                (TargetKind::Pod, name) => {
                    if parents.insert((TargetKind::Pod, name)) {
                        bare_pods.push(pod);
                    }
                }
                parent => {
                    parents.insert(parent);
                }
            }
        }

        if parents.len() > 1 {
            let names: Vec<_> = parents
                .iter()
                .map(|(kind, name)| format!("{} {}", kind, name))
                .collect();
            return Err(Error::configuration_at(
                "target.labelSelector",
                format!(
                    "selector {} matches several workloads: {}",
                    selector,
                    names.join(", ")
                ),
            ));
        }

        match parents.into_iter().next() {
            None => Ok(None),
            Some((TargetKind::Pod, _)) => Ok(bare_pods.pop().map(ParentWorkload::Pod)),
            Some((TargetKind::Deployment, name)) => {
                let lookup = name.clone();
                Ok(self
                    .call("get", "Deployment", &name, cancel, |c, ns| async move {
                        c.get_deployment(&ns, &lookup).await
                    })
                    .await?
                    .map(ParentWorkload::Deployment))
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn target_name(&self) -> Option<&str> {
        self.request.target.name.as_deref().filter(|n| !n.is_empty())
    }

    fn describe_target(&self) -> String {
        match self.target_name() {
            Some(name) => format!("{} {}/{}", self.request.target.kind, self.namespace, name),
            None => format!(
                "selector {} in {}",
                self.request.target.selector_string(),
                self.namespace
            ),
        }
    }

    /// Selector matching replacements created for a label-selected target
    fn replacement_selector(&self) -> String {
        let mut parts: Vec<String> = self
            .request
            .target
            .label_selector
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        parts.push(format!("{}=true", REPLACED_LABEL));
        parts.join(",")
    }

    /// Run one cluster call under the cancellation token
    async fn call<'a, T, F, Fut>(
        &'a self,
        operation: &'a str,
        kind: &'a str,
        name: &'a str,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(Arc<dyn ReplaceKubeClient>, String) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let site = CallSite::new(operation, kind, &self.namespace, name);
        cancellable(cancel, site, f(self.client.clone(), self.namespace.clone())).await
    }
}

/// Identify the workload that owns a pod.
///
/// Pods owned by a ReplicaSet map to the Deployment whose name prefixes the
/// ReplicaSet name (`{deployment}-{pod-template-hash}`). Pods without a
/// controller are bare pods. Any other controller is not replaceable.
fn pod_parent(pod: &Pod) -> Result<(TargetKind, String)> {
    let name = pod.metadata.name.clone().unwrap_or_default();
    let controller = pod
        .metadata
        .owner_references
        .iter()
        .flatten()
        .find(|o| o.controller == Some(true));

    let Some(owner) = controller else {
        return Ok((TargetKind::Pod, name));
    };

    let hash = pod
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(POD_TEMPLATE_HASH_LABEL));
    if owner.kind == "ReplicaSet" {
        if let Some(deployment) = hash.and_then(|h| owner.name.strip_suffix(&format!("-{}", h))) {
            return Ok((TargetKind::Deployment, deployment.to_string()));
        }
    }

    Err(Error::configuration_at(
        "target.labelSelector",
        format!(
            "pod {} is controlled by {} {}, which cannot be replaced",
            name, owner.kind, owner.name
        ),
    ))
}
