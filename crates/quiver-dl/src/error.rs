use miette::Diagnostic;
use quiver_utils::error::FileSystemError;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum DownloadError {
    #[error(transparent)]
    #[diagnostic(
        code(quiver_dl::network),
        help("Check your internet connection or try again later")
    )]
    Network(#[from] Box<ureq::Error>),

    #[error("HTTP {status}: {url}")]
    #[diagnostic(code(quiver_dl::http_error))]
    HttpError { status: u16, url: String },

    #[error("Not found: {url}")]
    #[diagnostic(code(quiver_dl::not_found))]
    NotFound { url: String },

    #[error("Authentication required: {url}")]
    #[diagnostic(
        code(quiver_dl::auth_required),
        help("Provide a token with read access to the registry")
    )]
    AuthRequired { url: String },

    #[error("Invalid response from {url}: {reason}")]
    #[diagnostic(code(quiver_dl::invalid_response))]
    InvalidResponse { url: String, reason: String },

    #[error("No artifact layer in {repository}:{reference}")]
    #[diagnostic(
        code(quiver_dl::layer_not_found),
        help("The manifest must contain a gzip tar layer")
    )]
    LayerNotFound {
        repository: String,
        reference: String,
    },

    #[error("Digest mismatch: expected {expected}, got {actual}")]
    #[diagnostic(code(quiver_dl::digest_mismatch))]
    DigestMismatch { expected: String, actual: String },

    #[error("Archive rejected: {} violation(s)", .violations.len())]
    #[diagnostic(
        code(quiver_dl::unsafe_archive),
        help("{}", .violations.join("\n"))
    )]
    UnsafeArchive { violations: Vec<String> },

    #[error("Failed to extract {path}: {source}")]
    #[diagnostic(code(quiver_dl::extract))]
    Extract {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(code(quiver_dl::io))]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    FileSystem(#[from] FileSystemError),
}

pub type Result<T> = std::result::Result<T, DownloadError>;

impl From<ureq::Error> for DownloadError {
    fn from(e: ureq::Error) -> Self {
        Self::Network(Box::new(e))
    }
}
