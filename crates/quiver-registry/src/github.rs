//! Artifacts stored as OCI artifacts in GitHub Container Registry.
//!
//! `@scope/name` lives in the repository `<namespace>/[<prefix>-]<name>` and
//! every version is a tag. Pulls go through [`OciClient`]; pushes are handed
//! to the `oras` CLI.

use std::{
    io::Write as _,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::LazyLock,
};

use quiver_dl::{
    http_client::{bare_host, ClientConfig},
    oci::{OciClient, OciReference, ARTIFACT_LAYER_MEDIA_TYPE},
};
use quiver_utils::version::{highest_version, sort_versions_desc};
use regex::Regex;
use tracing::{debug, info};

use crate::{
    artifact::ArtifactId,
    client::{requested_version, ArtifactInfo, DownloadResult, PublishResult, RegistryClient},
    error::{ErrorContext, RegistryError, Result},
    install::install_archive,
    resolver::ResolvedRegistry,
};

/// OCI distribution tag grammar.
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._-]{0,127}$").expect("unable to compile tag regex")
});

/// Tool used to push artifacts.
pub const PUSH_TOOL: &str = "oras";
/// ghcr.io ignores the user name of a PAT login.
const PUSH_USERNAME: &str = "quiver";

pub struct GitHubRegistry {
    client: OciClient,
    host: String,
    namespace: String,
    prefix: Option<String>,
    token: Option<String>,
    push_tool: String,
}

impl GitHubRegistry {
    pub fn new(resolved: ResolvedRegistry, config: &ClientConfig) -> Result<Self> {
        let namespace = resolved
            .project
            .as_deref()
            .map(|project| project.trim().trim_matches('/'))
            .filter(|project| !project.is_empty())
            .ok_or_else(|| {
                RegistryError::Validation(format!(
                    "github registry on {} requires a `project` namespace",
                    resolved.host
                ))
            })?
            .to_lowercase();

        let token = resolved.token.filter(|t| !t.is_empty());
        Ok(Self {
            client: OciClient::new(&resolved.host, token.clone(), config),
            host: resolved.host,
            namespace,
            prefix: resolved.prefix,
            token,
            push_tool: PUSH_TOOL.to_string(),
        })
    }

    /// Uses another executable (name or path) for pushing.
    pub fn with_push_tool(mut self, tool: impl Into<String>) -> Self {
        self.push_tool = tool.into();
        self
    }

    /// `<namespace>/[<prefix>-]<name>`.
    pub fn repository(&self, artifact: &ArtifactId) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{prefix}-{}", self.namespace, artifact.name),
            None => format!("{}/{}", self.namespace, artifact.name),
        }
    }

    fn reference(&self, artifact: &ArtifactId, version: &str) -> OciReference {
        OciReference::new(&self.host, &self.repository(artifact), version)
    }

    fn push(&self, tool: &Path, token: &str, reference: &OciReference, tarball: &Path) -> Result<()> {
        let tarball = tarball
            .canonicalize()
            .with_context(|| format!("resolving {}", tarball.display()))?;
        let (Some(dir), Some(file_name)) = (tarball.parent(), tarball.file_name()) else {
            return Err(RegistryError::Validation(format!(
                "{} is not a file",
                tarball.display()
            )));
        };

        let target = format!(
            "{}/{}:{}",
            reference.registry, reference.repository, reference.reference
        );
        let layer = format!("{}:{ARTIFACT_LAYER_MEDIA_TYPE}", file_name.to_string_lossy());

        let mut command = Command::new(tool);
        command
            .current_dir(dir)
            .arg("push")
            .arg("--username")
            .arg(PUSH_USERNAME)
            .arg("--password-stdin");
        if self.client.base_url().starts_with("http://") {
            command.arg("--plain-http");
        }
        command
            .arg(&target)
            .arg(&layer)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(tool = %tool.display(), %target, "Pushing artifact");
        let mut child = command
            .spawn()
            .with_context(|| format!("running {}", tool.display()))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(token.as_bytes())
                .with_context(|| format!("writing credentials to {}", tool.display()))?;
        }
        let output = child
            .wait_with_output()
            .with_context(|| format!("waiting for {}", tool.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RegistryError::Network(format!(
                "{PUSH_TOOL} push to {target} failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn tags(&self, artifact: &ArtifactId) -> Result<Vec<String>> {
        Ok(self.client.list_tags(&self.repository(artifact))?)
    }
}

fn check_tag(artifact: &ArtifactId, version: &str) -> Result<()> {
    if TAG_RE.is_match(version) {
        Ok(())
    } else {
        Err(RegistryError::Validation(format!(
            "invalid version {version:?} for {}",
            artifact.full_name()
        )))
    }
}

impl RegistryClient for GitHubRegistry {
    fn download(
        &self,
        artifact: &ArtifactId,
        version: Option<&str>,
        target_dir: &Path,
    ) -> Result<DownloadResult> {
        let version = requested_version(self, artifact, version)?;
        check_tag(artifact, &version)?;
        let reference = self.reference(artifact, &version);

        let bytes = self
            .client
            .pull_artifact_layer(&reference.repository, &version)?;
        let installed = install_archive(&bytes, target_dir)?;
        info!(artifact = %artifact.full_name(), %version, %reference, "Downloaded");

        Ok(DownloadResult {
            version,
            resolved: reference.to_string(),
            integrity: installed.integrity,
            file_hashes: installed.file_hashes,
            deprecation_message: None,
        })
    }

    fn publish(
        &self,
        artifact: &ArtifactId,
        version: &str,
        tarball: &Path,
    ) -> Result<PublishResult> {
        check_tag(artifact, version)?;

        let tool: PathBuf = which::which(&self.push_tool).map_err(|_| {
            RegistryError::UnsupportedOperation(format!(
                "publishing to {} requires `{}` on PATH",
                self.host, self.push_tool
            ))
        })?;

        let Some(token) = &self.token else {
            return Err(RegistryError::AuthRequired(format!(
                "publishing to {} requires a token",
                self.host
            )));
        };

        if self.version_exists(artifact, version)? {
            return Err(RegistryError::Validation(format!(
                "{}@{version} already exists in {}",
                artifact.full_name(),
                self.repository(artifact)
            )));
        }

        let reference = self.reference(artifact, version);
        self.push(&tool, token, &reference, tarball)?;

        info!(artifact = %artifact.full_name(), %version, %reference, "Published");
        Ok(PublishResult {
            version: version.to_string(),
            resolved: reference.to_string(),
        })
    }

    fn latest_version(&self, artifact: &ArtifactId) -> Result<Option<String>> {
        Ok(highest_version(self.tags(artifact)?))
    }

    fn version_exists(&self, artifact: &ArtifactId, version: &str) -> Result<bool> {
        Ok(self.tags(artifact)?.iter().any(|tag| tag == version))
    }

    fn list_versions(&self, artifact: &ArtifactId) -> Result<Vec<String>> {
        Ok(sort_versions_desc(self.tags(artifact)?))
    }

    fn artifact_info(&self, artifact: &ArtifactId) -> Result<Option<ArtifactInfo>> {
        let versions = sort_versions_desc(self.tags(artifact)?);
        if versions.is_empty() {
            return Ok(None);
        }

        Ok(Some(ArtifactInfo {
            artifact_id: artifact.full_name(),
            latest_version: versions.first().cloned(),
            versions,
            created_at: None,
            updated_at: None,
        }))
    }
}

impl std::fmt::Debug for GitHubRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubRegistry")
            .field("host", &bare_host(&self.host))
            .field("namespace", &self.namespace)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
