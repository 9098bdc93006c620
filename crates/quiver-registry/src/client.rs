use std::path::Path;

use quiver_config::{Config, RegistryKind, TokenProvider};
use quiver_dl::http_client::ClientConfig;
use quiver_utils::{fs::move_dir_contents, hash::FileHashMap};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    artifact::ArtifactId,
    default::DefaultRegistry,
    error::{ErrorContext, RegistryError, Result},
    github::GitHubRegistry,
    gitlab::GitLabRegistry,
    resolver::{resolve_registry, ResolvedRegistry},
};

/// Outcome of a successful download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResult {
    pub version: String,
    /// Where the bytes came from, e.g. a tarball URL or an `oci://` reference.
    pub resolved: String,
    pub integrity: String,
    pub file_hashes: FileHashMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecation_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishResult {
    pub version: String,
    pub resolved: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInfo {
    pub artifact_id: String,
    pub latest_version: Option<String>,
    pub versions: Vec<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// Operations every registry backend supports.
///
/// Lookups treat a missing artifact as an ordinary outcome (`None`, `false`
/// or an empty list); only `download` reports it as [`RegistryError::NotFound`].
pub trait RegistryClient {
    /// Downloads `version` (or the latest one) and installs it into `target_dir`.
    ///
    /// The version pinned on `artifact` is used when `version` is `None`.
    fn download(
        &self,
        artifact: &ArtifactId,
        version: Option<&str>,
        target_dir: &Path,
    ) -> Result<DownloadResult>;

    /// Uploads a `.tar.gz` as `version`. Existing versions are never overwritten.
    fn publish(&self, artifact: &ArtifactId, version: &str, tarball: &Path)
        -> Result<PublishResult>;

    fn latest_version(&self, artifact: &ArtifactId) -> Result<Option<String>>;

    fn version_exists(&self, artifact: &ArtifactId, version: &str) -> Result<bool>;

    /// Valid semver versions, highest first.
    fn list_versions(&self, artifact: &ArtifactId) -> Result<Vec<String>>;

    fn artifact_info(&self, artifact: &ArtifactId) -> Result<Option<ArtifactInfo>>;

    /// Downloads and checks the result against a locked integrity digest.
    ///
    /// The artifact is staged next to `target_dir` and only moved in when the
    /// digest matches; a mismatch is reported, not retried.
    fn download_verified(
        &self,
        artifact: &ArtifactId,
        version: Option<&str>,
        target_dir: &Path,
        expected_integrity: &str,
    ) -> Result<DownloadResult> {
        let parent = match target_dir.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
        let staging = tempfile::Builder::new()
            .prefix(".quiver-verify-")
            .tempdir_in(parent)
            .with_context(|| format!("creating staging directory in {}", parent.display()))?;

        let result = self.download(artifact, version, staging.path())?;
        if result.integrity != expected_integrity {
            warn!(
                artifact = %artifact.full_name(),
                expected = %expected_integrity,
                actual = %result.integrity,
                "Integrity mismatch"
            );
            return Err(RegistryError::IntegrityMismatch {
                expected: expected_integrity.to_string(),
                actual: result.integrity,
            });
        }

        move_dir_contents(staging.path(), target_dir)?;
        Ok(result)
    }
}

/// A registry backend, selected by the resolved registry's kind.
pub enum Registry {
    Default(DefaultRegistry),
    GitLab(GitLabRegistry),
    GitHub(GitHubRegistry),
}

impl Registry {
    /// Builds the client matching `resolved.kind`.
    pub fn from_resolved(resolved: ResolvedRegistry, config: &ClientConfig) -> Result<Self> {
        debug!(kind = %resolved.kind, host = %resolved.host, "Creating registry client");
        Ok(match resolved.kind {
            RegistryKind::Default => Self::Default(DefaultRegistry::new(resolved, config)?),
            RegistryKind::Gitlab => Self::GitLab(GitLabRegistry::new(resolved, config)?),
            RegistryKind::Github => Self::GitHub(GitHubRegistry::new(resolved, config)?),
        })
    }

    /// Resolves `scope` against `config` and builds its client.
    pub fn for_scope(
        scope: &str,
        config: &Config,
        token_provider: Option<&dyn TokenProvider>,
    ) -> Result<Self> {
        let resolved = resolve_registry(scope, config, token_provider);
        Self::from_resolved(resolved, &client_config(config)?)
    }

    pub fn kind(&self) -> RegistryKind {
        match self {
            Registry::Default(_) => RegistryKind::Default,
            Registry::GitLab(_) => RegistryKind::Gitlab,
            Registry::GitHub(_) => RegistryKind::Github,
        }
    }
}

/// HTTP settings derived from the configuration file.
pub fn client_config(config: &Config) -> Result<ClientConfig> {
    Ok(ClientConfig::default()
        .with_timeout(config.timeout()?)
        .with_user_agent(config.user_agent.clone()))
}

impl RegistryClient for Registry {
    fn download(
        &self,
        artifact: &ArtifactId,
        version: Option<&str>,
        target_dir: &Path,
    ) -> Result<DownloadResult> {
        match self {
            Registry::Default(registry) => registry.download(artifact, version, target_dir),
            Registry::GitLab(registry) => registry.download(artifact, version, target_dir),
            Registry::GitHub(registry) => registry.download(artifact, version, target_dir),
        }
    }

    fn publish(
        &self,
        artifact: &ArtifactId,
        version: &str,
        tarball: &Path,
    ) -> Result<PublishResult> {
        match self {
            Registry::Default(registry) => registry.publish(artifact, version, tarball),
            Registry::GitLab(registry) => registry.publish(artifact, version, tarball),
            Registry::GitHub(registry) => registry.publish(artifact, version, tarball),
        }
    }

    fn latest_version(&self, artifact: &ArtifactId) -> Result<Option<String>> {
        match self {
            Registry::Default(registry) => registry.latest_version(artifact),
            Registry::GitLab(registry) => registry.latest_version(artifact),
            Registry::GitHub(registry) => registry.latest_version(artifact),
        }
    }

    fn version_exists(&self, artifact: &ArtifactId, version: &str) -> Result<bool> {
        match self {
            Registry::Default(registry) => registry.version_exists(artifact, version),
            Registry::GitLab(registry) => registry.version_exists(artifact, version),
            Registry::GitHub(registry) => registry.version_exists(artifact, version),
        }
    }

    fn list_versions(&self, artifact: &ArtifactId) -> Result<Vec<String>> {
        match self {
            Registry::Default(registry) => registry.list_versions(artifact),
            Registry::GitLab(registry) => registry.list_versions(artifact),
            Registry::GitHub(registry) => registry.list_versions(artifact),
        }
    }

    fn artifact_info(&self, artifact: &ArtifactId) -> Result<Option<ArtifactInfo>> {
        match self {
            Registry::Default(registry) => registry.artifact_info(artifact),
            Registry::GitLab(registry) => registry.artifact_info(artifact),
            Registry::GitHub(registry) => registry.artifact_info(artifact),
        }
    }
}

/// Picks the version to download: explicit, pinned on the id, or latest.
pub(crate) fn requested_version<C: RegistryClient + ?Sized>(
    client: &C,
    artifact: &ArtifactId,
    version: Option<&str>,
) -> Result<String> {
    if let Some(version) = version.or(artifact.version.as_deref()) {
        return Ok(version.to_string());
    }

    client
        .latest_version(artifact)?
        .ok_or_else(|| RegistryError::NotFound(format!("no versions of {}", artifact.full_name())))
}
