//! Error types for the registry crate.
//!
//! [`RegistryError`] is the only error that crosses the public API: lower
//! level failures (HTTP, archive, hashing) are converted into it at the edge.

use miette::Diagnostic;
use quiver_config::ConfigError;
use quiver_dl::DownloadError;
use quiver_utils::error::{FileSystemError, HashError};
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum RegistryError {
    #[error("Invalid artifact id: {0}")]
    #[diagnostic(
        code(quiver_registry::invalid_artifact_id),
        help("Artifact ids look like `@scope/name` or `@scope/name@1.2.3`")
    )]
    InvalidArtifactId(String),

    #[error("Not found: {0}")]
    #[diagnostic(code(quiver_registry::not_found))]
    NotFound(String),

    #[error("Authentication required: {0}")]
    #[diagnostic(
        code(quiver_registry::auth_required),
        help("Configure a token for this registry or export it in the environment")
    )]
    AuthRequired(String),

    #[error("Network error: {0}")]
    #[diagnostic(
        code(quiver_registry::network),
        help("Check your network connection and the registry host")
    )]
    Network(String),

    #[error("Invalid registry data: {0}")]
    #[diagnostic(code(quiver_registry::validation))]
    Validation(String),

    #[error("Archive rejected with {} violation(s)", .violations.len())]
    #[diagnostic(
        code(quiver_registry::unsafe_archive),
        help("{}", .violations.join("\n"))
    )]
    UnsafeArchive { violations: Vec<String> },

    #[error("Integrity mismatch: expected {expected}, got {actual}")]
    #[diagnostic(
        code(quiver_registry::integrity_mismatch),
        help("The artifact changed since it was locked; refusing to continue")
    )]
    IntegrityMismatch { expected: String, actual: String },

    #[error("Unsupported operation: {0}")]
    #[diagnostic(code(quiver_registry::unsupported))]
    UnsupportedOperation(String),

    #[error("Error while {action}: {source}")]
    #[diagnostic(code(quiver_registry::io))]
    IoError {
        action: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    FileSystem(#[from] FileSystemError),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

impl From<ureq::Error> for RegistryError {
    fn from(err: ureq::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<DownloadError> for RegistryError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::Network(err) => Self::Network(err.to_string()),
            DownloadError::HttpError { status, url } => {
                Self::Network(format!("HTTP {status} from {url}"))
            }
            DownloadError::NotFound { url } => Self::NotFound(url),
            DownloadError::AuthRequired { url } => Self::AuthRequired(url),
            DownloadError::InvalidResponse { url, reason } => {
                Self::Validation(format!("{url}: {reason}"))
            }
            err @ DownloadError::LayerNotFound { .. } => Self::Validation(err.to_string()),
            DownloadError::DigestMismatch { expected, actual } => {
                Self::IntegrityMismatch { expected, actual }
            }
            DownloadError::UnsafeArchive { violations } => Self::UnsafeArchive { violations },
            DownloadError::Extract { path, source } => {
                Self::IoError {
                    action: format!("extracting {path}"),
                    source,
                }
            }
            DownloadError::Io(source) => {
                Self::IoError {
                    action: "reading archive".to_string(),
                    source,
                }
            }
            DownloadError::FileSystem(err) => Self::FileSystem(err),
        }
    }
}

/// Extension trait for adding context to I/O errors.
pub trait ErrorContext<T> {
    /// Describes the action that failed.
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: FnOnce() -> String;
}

impl<T> ErrorContext<T> for std::io::Result<T> {
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: FnOnce() -> String,
    {
        self.map_err(|err| {
            RegistryError::IoError {
                action: context(),
                source: err,
            }
        })
    }
}
