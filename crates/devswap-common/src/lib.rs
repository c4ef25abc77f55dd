//! Common types for devswap: replace requests, errors, and kube utilities

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod kube_utils;
pub mod telemetry;

pub use config::{
    PersistPath, PersistenceOptions, ReplaceRequest, ReplaceTarget, TargetKind,
};
pub use error::{ApiFailure, Error};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Produced object names
// =============================================================================
// Existing tooling and operators look these names up verbatim. Do not change.

/// Name of the persistence volume and of every mount referencing it
pub const PERSISTENCE_VOLUME_NAME: &str = "devspace-persistence";

/// Mount root of the persistence volume inside population init containers
pub const PERSISTENCE_MOUNT_ROOT: &str = "/devspace-persistence";

/// Marker directory created at the mount root after a successful population
pub const POPULATION_MARKER: &str = ".devspace";

/// Suffix appended to the parent workload name for the replacement Deployment
pub const REPLACEMENT_SUFFIX: &str = "-devspace";

// =============================================================================
// Labels and annotations on replacement workloads
// =============================================================================

/// Label marking pods and Deployments created by a replace operation
pub const REPLACED_LABEL: &str = "devspace.sh/replaced";

/// Annotation recording the kind of the replaced parent (Deployment or Pod)
pub const PARENT_KIND_ANNOTATION: &str = "devspace.sh/parent-kind";

/// Annotation recording the name of the replaced parent
pub const PARENT_NAME_ANNOTATION: &str = "devspace.sh/parent-name";

/// Annotation recording the parent Deployment's replica count before scale-down
pub const REPLICAS_ANNOTATION: &str = "devspace.sh/replicas";

/// Annotation recording the original Pod (JSON) for bare-Pod parents
pub const ORIGINAL_POD_ANNOTATION: &str = "devspace.sh/original-pod";

/// Annotation recording the hash of the request and original template
pub const CONFIG_HASH_ANNOTATION: &str = "devspace.sh/config-hash";

/// Field manager used for writes issued by devswap
pub const FIELD_MANAGER: &str = "devswap";

/// Name of the replacement Deployment for a parent workload
pub fn replacement_name(parent: &str) -> String {
    format!("{}{}", parent, REPLACEMENT_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacement_name_appends_suffix() {
        assert_eq!(replacement_name("web"), "web-devspace");
    }
}
