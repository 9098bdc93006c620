//! Registry resolution and artifact clients.
//!
//! A scope such as `@acme` is resolved against the user configuration into a
//! [`ResolvedRegistry`], from which [`Registry`] builds one of three backends:
//!
//! - the quiver HTTP registry ([`DefaultRegistry`])
//! - a GitLab Generic Package Registry project ([`GitLabRegistry`])
//! - GitHub Container Registry through OCI ([`GitHubRegistry`])
//!
//! Every download is validated before extraction and reported with a
//! per-file hash map plus an aggregate integrity string.
//!
//! ```no_run
//! use std::path::Path;
//!
//! use quiver_config::{ChainTokenProvider, Config};
//! use quiver_registry::{parse_artifact_id, Registry, RegistryClient};
//!
//! # fn main() -> miette::Result<()> {
//! let config = Config::load()?;
//! let tokens = ChainTokenProvider::standard(config.credentials_path()?)?;
//! let artifact = parse_artifact_id("@acme/build-tools@1.2.0")?;
//!
//! let registry = Registry::for_scope(&artifact.scope, &config, Some(&tokens))?;
//! let result = registry.download(&artifact, None, Path::new("vendor/build-tools"))?;
//! println!("{} {}", result.version, result.integrity);
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod client;
pub mod default;
pub mod error;
pub mod github;
pub mod gitlab;
mod http;
pub mod install;
pub mod resolver;

#[cfg(test)]
mod test_utils;

pub use artifact::{parse_artifact_id, parse_source, ArtifactId, ParsedSource, SourceKind};
pub use client::{ArtifactInfo, DownloadResult, PublishResult, Registry, RegistryClient};
pub use default::{ArtifactMetadata, DefaultRegistry};
pub use error::{RegistryError, Result};
pub use github::GitHubRegistry;
pub use gitlab::GitLabRegistry;
pub use install::{install_archive, InstalledArchive};
pub use resolver::{resolve_registry, ResolvedRegistry, DEFAULT_REGISTRY_HOST};
