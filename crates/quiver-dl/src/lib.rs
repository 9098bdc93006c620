//! Network and archive plumbing for quiver.
//!
//! [`oci`] is a pull-only OCI Distribution client with the bearer-token
//! challenge flow; [`tarball`] inspects archives before anything is written
//! to disk and extracts them once they are cleared.

pub mod error;
pub mod http_client;
pub mod oci;
pub mod tarball;

mod auth;

pub use error::{DownloadError, Result};
