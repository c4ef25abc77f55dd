//! Error types for pod replacement and persistence
//!
//! Errors carry the persist path, container, or cluster resource they are
//! about, so operators can fix the configuration directly from the message.

use std::fmt;

use thiserror::Error;

/// Classification of a failed Kubernetes API call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiFailure {
    /// 404 - object does not exist
    NotFound,
    /// 409 - optimistic concurrency conflict or already exists
    Conflict,
    /// 401/403 - caller is not allowed to perform the call
    Forbidden,
    /// 408/504 or a client-side timeout
    Timeout,
    /// 5xx or any other response code
    Server(u16),
    /// No response (connection, TLS, decoding)
    Transport,
}

impl ApiFailure {
    /// Classify an HTTP status code
    pub fn from_code(code: u16) -> Self {
        match code {
            404 => Self::NotFound,
            409 => Self::Conflict,
            401 | 403 => Self::Forbidden,
            408 | 504 => Self::Timeout,
            other => Self::Server(other),
        }
    }

    /// Classify a kube-rs client error
    pub fn from_kube(err: &kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) => Self::from_code(ae.code),
            _ => Self::Transport,
        }
    }
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Forbidden => write!(f, "forbidden"),
            Self::Timeout => write!(f, "timeout"),
            Self::Server(code) => write!(f, "status {}", code),
            Self::Transport => write!(f, "transport"),
        }
    }
}

/// Main error type for devswap operations
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed replace request, detected before any cluster mutation
    #[error("configuration error{}: {message}", field.as_ref().map(|f| format!(" at {}", f)).unwrap_or_default())]
    Configuration {
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "persistPaths[1].volumePath")
        field: Option<String>,
    },

    /// A persist path targets a multi-container workload without naming a container
    #[error(
        "couldn't persist path {path} as multiple containers were found {}, but no containerName was specified",
        containers.join(" ")
    )]
    AmbiguousContainer {
        /// Source path of the offending persist path
        path: String,
        /// Every container name in the workload, in spec order
        containers: Vec<String>,
    },

    /// A persist path names a container that the workload does not have
    #[error("couldn't persist path {path}: container '{container}' not found (available: {})", available.join(", "))]
    ContainerNotFound {
        /// Source path of the offending persist path
        path: String,
        /// The container name that was requested
        container: String,
        /// Every container name in the workload, in spec order
        available: Vec<String>,
    },

    /// Kubernetes API call failed
    #[error("{operation} {kind} {name} failed ({reason}): {message}")]
    ClusterApi {
        /// Operation being performed (get, create, replace, delete, list)
        operation: String,
        /// Resource kind (Deployment, Pod, PersistentVolumeClaim)
        kind: String,
        /// Namespaced resource name ("namespace/name")
        name: String,
        /// Classified failure
        reason: ApiFailure,
        /// Server or client message
        message: String,
    },

    /// A cluster call was cancelled before its outcome was observed
    #[error("{operation} {kind} {name} cancelled; re-query cluster state to learn the outcome")]
    Cancelled {
        /// Operation being performed
        operation: String,
        /// Resource kind
        kind: String,
        /// Namespaced resource name
        name: String,
    },

    /// The controller was asked to do something its current phase forbids
    #[error("cannot {operation} while workload is {phase}")]
    InvalidState {
        /// Current phase of the workload
        phase: String,
        /// Operation that was requested
        operation: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a configuration error without a field path
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a configuration error pointing at a request field
    pub fn configuration_at(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Wrap a kube-rs error with operation and resource identity
    pub fn cluster(
        operation: impl Into<String>,
        kind: impl Into<String>,
        namespace: &str,
        name: &str,
        source: kube::Error,
    ) -> Self {
        let message = match &source {
            kube::Error::Api(ae) => ae.message.clone(),
            other => other.to_string(),
        };
        Self::ClusterApi {
            operation: operation.into(),
            kind: kind.into(),
            name: format!("{}/{}", namespace, name),
            reason: ApiFailure::from_kube(&source),
            message,
        }
    }

    /// Create a cancellation error for an in-flight call
    pub fn cancelled(
        operation: impl Into<String>,
        kind: impl Into<String>,
        namespace: &str,
        name: &str,
    ) -> Self {
        Self::Cancelled {
            operation: operation.into(),
            kind: kind.into(),
            name: format!("{}/{}", namespace, name),
        }
    }

    /// Create an invalid-state error
    pub fn invalid_state(phase: impl fmt::Display, operation: impl Into<String>) -> Self {
        Self::InvalidState {
            phase: phase.to_string(),
            operation: operation.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Conflicts, timeouts, server and transport failures, and cancellations
    /// may succeed on a fresh attempt. Configuration and planning errors need
    /// the request or workload fixed first.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ClusterApi { reason, .. } => match reason {
                ApiFailure::Conflict | ApiFailure::Timeout | ApiFailure::Transport => true,
                ApiFailure::Server(code) => *code >= 500,
                ApiFailure::NotFound | ApiFailure::Forbidden => false,
            },
            Error::Cancelled { .. } => true,
            Error::Configuration { .. }
            | Error::AmbiguousContainer { .. }
            | Error::ContainerNotFound { .. }
            | Error::InvalidState { .. }
            | Error::Serialization { .. } => false,
        }
    }

    /// Check if this is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::ClusterApi {
                reason: ApiFailure::Conflict,
                ..
            }
        )
    }

    /// Check if this is a not-found response
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::ClusterApi {
                reason: ApiFailure::NotFound,
                ..
            }
        )
    }

    /// Get the persist path this error is about, if any
    pub fn path(&self) -> Option<&str> {
        match self {
            Error::AmbiguousContainer { path, .. } | Error::ContainerNotFound { path, .. } => {
                Some(path)
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::serialization(e.to_string())
    }
}
