//! Cluster access for the replacement controller
//!
//! The trait keeps the controller testable without a cluster; the kube-rs
//! implementation maps every failure to `Error::ClusterApi` with the
//! operation and resource identity attached.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use devswap_common::{Error, FIELD_MANAGER};

/// Typed CRUD over the objects a replace operation touches
///
/// `get_*` return `Ok(None)` for missing objects. `delete_*` return whether
/// the object existed. Writes carry the object's `resourceVersion` when set,
/// so a stale write fails with a conflict instead of overwriting.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReplaceKubeClient: Send + Sync {
    /// Get a Deployment by name
    async fn get_deployment(&self, namespace: &str, name: &str)
        -> Result<Option<Deployment>, Error>;

    /// List Deployments matching a label selector
    async fn list_deployments(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<Deployment>, Error>;

    /// Create a Deployment
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error>;

    /// Replace a Deployment, guarded by its resourceVersion
    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error>;

    /// Delete a Deployment
    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<bool, Error>;

    /// Get a Pod by name
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error>;

    /// List Pods matching a label selector
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error>;

    /// Create a Pod
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, Error>;

    /// Delete a Pod
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<bool, Error>;

    /// Get a PersistentVolumeClaim by name
    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, Error>;
}

/// Real Kubernetes client implementation
pub struct KubeReplaceClient {
    client: Client,
}

impl KubeReplaceClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Namespace the client falls back to when a request names none
    pub fn default_namespace(&self) -> &str {
        self.client.default_namespace()
    }

    fn post_params() -> PostParams {
        PostParams {
            dry_run: false,
            field_manager: Some(FIELD_MANAGER.to_string()),
        }
    }
}

fn object_name(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> &str {
    meta.name.as_deref().unwrap_or_default()
}

#[async_trait]
impl ReplaceKubeClient for KubeReplaceClient {
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| Error::cluster("get", "Deployment", namespace, name, e))
    }

    async fn list_deployments(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<Deployment>, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| Error::cluster("list", "Deployment", namespace, selector, e))?;
        Ok(list.items)
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error> {
        let name = object_name(&deployment.metadata);
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let created = api
            .create(&Self::post_params(), deployment)
            .await
            .map_err(|e| Error::cluster("create", "Deployment", namespace, name, e))?;
        debug!(namespace = %namespace, deployment = %name, "created deployment");
        Ok(created)
    }

    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error> {
        let name = object_name(&deployment.metadata);
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let replaced = api
            .replace(name, &Self::post_params(), deployment)
            .await
            .map_err(|e| Error::cluster("replace", "Deployment", namespace, name, e))?;
        debug!(namespace = %namespace, deployment = %name, "replaced deployment");
        Ok(replaced)
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(Error::cluster("delete", "Deployment", namespace, name, e)),
        }
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| Error::cluster("get", "Pod", namespace, name, e))
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| Error::cluster("list", "Pod", namespace, selector, e))?;
        Ok(list.items)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, Error> {
        let name = object_name(&pod.metadata);
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.create(&Self::post_params(), pod)
            .await
            .map_err(|e| Error::cluster("create", "Pod", namespace, name, e))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(Error::cluster("delete", "Pod", namespace, name, e)),
        }
    }

    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, Error> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| Error::cluster("get", "PersistentVolumeClaim", namespace, name, e))
    }
}
