//! Error types for the CLI

use std::path::PathBuf;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Planning, validation or cluster failure from the core crates
    #[error(transparent)]
    Core(#[from] devswap_common::Error),

    /// Pod spec file could not be parsed, or the plan could not be rendered
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An input file could not be read
    #[error("failed to read {}: {source}", path.display())]
    ReadFile {
        /// File that was being read
        path: PathBuf,
        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// Logging could not be initialised
    #[error("logging: {0}")]
    Telemetry(#[from] devswap_common::telemetry::TelemetryError),

    /// No usable kubeconfig or client could be built from it
    #[error("kubeconfig: {message}")]
    Kubeconfig {
        /// What went wrong while loading
        message: String,
    },
}

impl Error {
    /// Create a kubeconfig error
    pub fn kubeconfig(message: impl Into<String>) -> Self {
        Error::Kubeconfig {
            message: message.into(),
        }
    }

    /// Create a file read error naming the path
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::ReadFile {
            path: path.into(),
            source,
        }
    }
}
