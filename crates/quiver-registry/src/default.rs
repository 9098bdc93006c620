//! Client for the quiver HTTP registry.
//!
//! The registry is a static file layout:
//!
//! ```text
//! <base>/<scope>/<name>/metadata.json
//! <base>/<scope>/<name>/<version>/artifact.tar.gz
//! ```
//!
//! where `scope` has no leading `@`.

use std::{collections::BTreeMap, fs, path::Path};

use quiver_dl::http_client::{base_url, ClientConfig};
use quiver_utils::version::{highest_version, is_valid_version, sort_versions_desc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use ureq::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        StatusCode,
    },
    Agent,
};
use url::Url;

use crate::{
    artifact::ArtifactId,
    client::{ArtifactInfo, DownloadResult, PublishResult, RegistryClient},
    error::{ErrorContext, RegistryError, Result},
    http::{check_status, read_bytes, read_json},
    install::install_archive,
    resolver::ResolvedRegistry,
};

/// `metadata.json` of one artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMetadata {
    #[serde(default)]
    pub name: String,
    /// Informational only; the highest listed version is what counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<String>,
    #[serde(default)]
    pub versions: Vec<String>,
    /// Version to deprecation message.
    #[serde(default)]
    pub deprecated: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl ArtifactMetadata {
    pub fn latest_version(&self) -> Option<String> {
        highest_version(&self.versions)
    }
}

pub struct DefaultRegistry {
    base_url: String,
    token: Option<String>,
    agent: Agent,
}

impl DefaultRegistry {
    pub fn new(resolved: ResolvedRegistry, config: &ClientConfig) -> Result<Self> {
        let base_url = base_url(&resolved.host);
        Url::parse(&base_url).map_err(|err| {
            RegistryError::Validation(format!("invalid registry host `{}`: {err}", resolved.host))
        })?;

        Ok(Self {
            base_url,
            token: resolved.token.filter(|t| !t.is_empty()),
            agent: config.build(),
        })
    }

    fn artifact_url(&self, artifact: &ArtifactId) -> String {
        format!("{}/{}/{}", self.base_url, artifact.scope_name(), artifact.name)
    }

    fn tarball_url(&self, artifact: &ArtifactId, version: &str) -> String {
        format!("{}/{version}/artifact.tar.gz", self.artifact_url(artifact))
    }

    /// `None` when the registry has never heard of the artifact.
    pub fn metadata(&self, artifact: &ArtifactId) -> Result<Option<ArtifactMetadata>> {
        let url = format!("{}/metadata.json", self.artifact_url(artifact));
        let mut req = self.agent.get(&url);
        if let Some(token) = &self.token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let mut resp = req.call()?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!(artifact = %artifact.full_name(), "No metadata");
            return Ok(None);
        }
        check_status(&resp, &url)?;

        read_json(&mut resp, &url).map(Some)
    }
}

/// Versions become URL path segments, so only semver is accepted.
fn check_version(artifact: &ArtifactId, version: &str) -> Result<()> {
    if is_valid_version(version) {
        Ok(())
    } else {
        Err(RegistryError::Validation(format!(
            "invalid version {version:?} for {}",
            artifact.full_name()
        )))
    }
}

impl RegistryClient for DefaultRegistry {
    fn download(
        &self,
        artifact: &ArtifactId,
        version: Option<&str>,
        target_dir: &Path,
    ) -> Result<DownloadResult> {
        let requested = version.or(artifact.version.as_deref());
        if let Some(version) = requested {
            check_version(artifact, version)?;
        }

        let metadata = self
            .metadata(artifact)?
            .ok_or_else(|| RegistryError::NotFound(artifact.full_name()))?;

        let version = match requested {
            Some(version) => version.to_string(),
            None => {
                metadata.latest_version().ok_or_else(|| {
                    RegistryError::NotFound(format!("no versions of {}", artifact.full_name()))
                })?
            }
        };

        let deprecation_message = metadata.deprecated.get(&version).cloned();
        if let Some(message) = &deprecation_message {
            warn!(artifact = %artifact.full_name(), %version, %message, "Version is deprecated");
        }

        let url = self.tarball_url(artifact, &version);
        let mut req = self.agent.get(&url);
        if let Some(token) = &self.token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let mut resp = req.call()?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(format!(
                "{}@{version}",
                artifact.full_name()
            )));
        }
        check_status(&resp, &url)?;
        let bytes = read_bytes(&mut resp)?;
        debug!(%url, size = bytes.len(), "Downloaded artifact");

        let installed = install_archive(&bytes, target_dir)?;
        info!(artifact = %artifact.full_name(), %version, "Downloaded");

        Ok(DownloadResult {
            version,
            resolved: url,
            integrity: installed.integrity,
            file_hashes: installed.file_hashes,
            deprecation_message,
        })
    }

    fn publish(
        &self,
        artifact: &ArtifactId,
        version: &str,
        tarball: &Path,
    ) -> Result<PublishResult> {
        check_version(artifact, version)?;

        let Some(token) = &self.token else {
            return Err(RegistryError::UnsupportedOperation(format!(
                "publishing to {} requires a token",
                self.base_url
            )));
        };

        if self.version_exists(artifact, version)? {
            return Err(RegistryError::Validation(format!(
                "{}@{version} already exists",
                artifact.full_name()
            )));
        }

        let bytes = fs::read(tarball).with_context(|| format!("reading {}", tarball.display()))?;
        let url = self.tarball_url(artifact, version);
        let resp = self
            .agent
            .put(&url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(CONTENT_TYPE, "application/gzip")
            .send(&bytes[..])?;
        check_status(&resp, &url)?;

        info!(artifact = %artifact.full_name(), %version, "Published");
        Ok(PublishResult {
            version: version.to_string(),
            resolved: url,
        })
    }

    fn latest_version(&self, artifact: &ArtifactId) -> Result<Option<String>> {
        Ok(self
            .metadata(artifact)?
            .and_then(|metadata| metadata.latest_version()))
    }

    fn version_exists(&self, artifact: &ArtifactId, version: &str) -> Result<bool> {
        Ok(self
            .metadata(artifact)?
            .is_some_and(|metadata| metadata.versions.iter().any(|v| v == version)))
    }

    fn list_versions(&self, artifact: &ArtifactId) -> Result<Vec<String>> {
        Ok(self
            .metadata(artifact)?
            .map(|metadata| sort_versions_desc(&metadata.versions))
            .unwrap_or_default())
    }

    fn artifact_info(&self, artifact: &ArtifactId) -> Result<Option<ArtifactInfo>> {
        Ok(self.metadata(artifact)?.map(|metadata| {
            ArtifactInfo {
                artifact_id: artifact.full_name(),
                latest_version: metadata.latest_version(),
                versions: sort_versions_desc(&metadata.versions),
                created_at: metadata.created_at,
                updated_at: metadata.updated_at,
            }
        }))
    }
}
