//! Shared Kubernetes utilities
//!
//! Hashing for persisted annotations, metadata stripping for objects that
//! are recorded and later re-created, and cancellation of in-flight calls.

use std::future::Future;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Remove server-owned fields from metadata before recording or re-creating
/// an object:
/// - uid, resourceVersion, creationTimestamp, generation
/// - managedFields, ownerReferences (the owner belongs to the old object)
/// - deletion bookkeeping
pub fn strip_server_metadata(meta: &mut ObjectMeta) {
    meta.uid = None;
    meta.resource_version = None;
    meta.creation_timestamp = None;
    meta.managed_fields = None;
    meta.generation = None;
    meta.owner_references = None;
    meta.deletion_timestamp = None;
    meta.deletion_grace_period_seconds = None;
}

/// Compute a deterministic hash of the input string, returning a 16-char hex digest.
///
/// Uses truncated SHA-256 so the value is stable across toolchains; it is
/// persisted in annotations and compared by later runs.
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

/// Hash any serializable value through its canonical JSON form
pub fn hash_json<T: serde::Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_string(value)?;
    Ok(deterministic_hash(&json))
}

/// Identity of a cluster call, used to label errors
#[derive(Clone, Copy, Debug)]
pub struct CallSite<'a> {
    /// Operation being performed (get, create, replace, delete, list)
    pub operation: &'a str,
    /// Resource kind
    pub kind: &'a str,
    /// Namespace of the resource
    pub namespace: &'a str,
    /// Name of the resource (or selector for list calls)
    pub name: &'a str,
}

impl<'a> CallSite<'a> {
    /// Describe a call
    pub fn new(operation: &'a str, kind: &'a str, namespace: &'a str, name: &'a str) -> Self {
        Self {
            operation,
            kind,
            namespace,
            name,
        }
    }
}

/// Run a cluster call, aborting it if `cancel` fires first.
///
/// Cancellation drops the in-flight future without any compensating action.
/// The server may already have applied the call, so callers must re-query.
pub async fn cancellable<T, F>(cancel: &CancellationToken, site: CallSite<'_>, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(Error::cancelled(
            site.operation,
            site.kind,
            site.namespace,
            site.name,
        ));
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::warn!(
                operation = site.operation,
                kind = site.kind,
                namespace = site.namespace,
                name = site.name,
                "cluster call cancelled"
            );
            Err(Error::cancelled(site.operation, site.kind, site.namespace, site.name))
        }
        result = call => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    #[test]
    fn strip_removes_server_fields_and_keeps_identity() {
        let mut meta = ObjectMeta {
            name: Some("web".to_string()),
            namespace: Some("dev".to_string()),
            uid: Some("abc".to_string()),
            resource_version: Some("42".to_string()),
            generation: Some(3),
            owner_references: Some(vec![OwnerReference::default()]),
            ..Default::default()
        };
        strip_server_metadata(&mut meta);
        assert_eq!(meta.name.as_deref(), Some("web"));
        assert_eq!(meta.namespace.as_deref(), Some("dev"));
        assert!(meta.uid.is_none());
        assert!(meta.resource_version.is_none());
        assert!(meta.generation.is_none());
        assert!(meta.owner_references.is_none());
    }

    #[test]
    fn deterministic_hash_is_stable_and_short() {
        let a = deterministic_hash("hello");
        assert_eq!(a, deterministic_hash("hello"));
        assert_eq!(a.len(), 16);
        assert_ne!(a, deterministic_hash("hello!"));
        // sha256("hello") = 2cf24dba5fb0a30e...
        assert_eq!(a, "2cf24dba5fb0a30e");
    }

    #[test]
    fn hash_json_tracks_content() {
        let a = hash_json(&vec!["a", "b"]).expect("hash");
        let b = hash_json(&vec!["a", "b"]).expect("hash");
        let c = hash_json(&vec!["b", "a"]).expect("hash");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn cancellable_passes_through_result() {
        let token = CancellationToken::new();
        let site = CallSite::new("get", "Pod", "dev", "web");
        let value = cancellable(&token, site, async { Ok(7) }).await.expect("ok");
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn cancellable_aborts_pending_call() {
        let token = CancellationToken::new();
        token.cancel();
        let site = CallSite::new("create", "Deployment", "dev", "web-devspace");
        let err = cancellable(&token, site, std::future::pending::<Result<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert!(err.to_string().contains("dev/web-devspace"));
    }

    #[tokio::test]
    async fn cancellation_during_call_wins() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let site = CallSite::new("delete", "Pod", "dev", "web");
        let call = async move {
            trigger.cancel();
            std::future::pending::<Result<()>>().await
        };
        let err = cancellable(&token, site, call).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
    }
}
