//! WD-019: Error kinds for the deployment pipeline.
//!
//! Parse and composition errors abort a run before any remote mutation.
//! Remote failures carry the HTTP status when one was received.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{file}{}: {message}", .line.map(|l| format!(":{}", l)).unwrap_or_default())]
    YamlFormat {
        file: String,
        line: Option<usize>,
        message: String,
    },

    #[error("{file}: parameter [{name}] has invalid type [{type_name}]")]
    InvalidParameterType {
        file: String,
        name: String,
        type_name: String,
    },

    #[error("{file}: parameter [{name}] declared as [{expected}] but value is [{actual}]")]
    ParameterTypeMismatch {
        file: String,
        name: String,
        expected: String,
        actual: String,
    },

    #[error("{kind} [{name}] is declared more than once")]
    DuplicateEntity { kind: String, name: String },

    #[error("conflict detected for [{name}]: {first} and {second}")]
    Conflict {
        name: String,
        first: String,
        second: String,
    },

    #[error("cannot read {path}: {message}")]
    FileRead { path: String, message: String },

    #[error("remote error{}: {message}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    RemoteClient { status: Option<u16>, message: String },

    #[error("manifest file not found: {path}")]
    ManifestNotFound { path: String },

    #[error("{file}: {message}")]
    Validation { file: String, message: String },

    #[error("required input [{name}] of {entity} has no value")]
    RequiredInput { entity: String, name: String },

    #[error("invalid client configuration:\n{0}")]
    InvalidConfig(String),

    #[error("dependency [{name}]: {message}")]
    Dependency { name: String, message: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Build a `YamlFormat` error from a serde_yaml_ng failure, keeping the line.
    pub fn yaml(file: &str, err: &serde_yaml_ng::Error) -> Self {
        Error::YamlFormat {
            file: file.to_string(),
            line: err.location().map(|l| l.line()),
            message: err.to_string(),
        }
    }

    pub fn file_read(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        Error::FileRead {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    pub fn validation(file: &str, message: impl Into<String>) -> Self {
        Error::Validation {
            file: file.to_string(),
            message: message.into(),
        }
    }
}

impl From<crate::client::ClientError> for Error {
    fn from(e: crate::client::ClientError) -> Self {
        Error::RemoteClient {
            status: e.status,
            message: e.message,
        }
    }
}
