//! Client for the GitLab Generic Package Registry.
//!
//! Package endpoints take the numeric project id, so the configured project
//! path is resolved once per client and cached.

use std::{
    fs,
    path::Path,
    sync::{Mutex, PoisonError},
};

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use quiver_dl::http_client::{base_url, ClientConfig};
use quiver_utils::version::{highest_version, sort_versions_desc};
use serde::Deserialize;
use tracing::{debug, info, trace};
use ureq::{http::StatusCode, Agent, RequestBuilder};

use crate::{
    artifact::ArtifactId,
    client::{requested_version, ArtifactInfo, DownloadResult, PublishResult, RegistryClient},
    error::{ErrorContext, RegistryError, Result},
    http::{check_status, read_bytes, read_json},
    install::install_archive,
    resolver::ResolvedRegistry,
};

const PRIVATE_TOKEN: &str = "PRIVATE-TOKEN";
const PER_PAGE: u32 = 100;

/// Everything but unreserved characters, so `group/project` becomes `group%2Fproject`.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, Deserialize)]
struct Project {
    id: u64,
}

/// One entry of the project package list.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabPackage {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

pub struct GitLabRegistry {
    base_url: String,
    project: String,
    token: Option<String>,
    agent: Agent,
    project_id: Mutex<Option<u64>>,
}

impl GitLabRegistry {
    pub fn new(resolved: ResolvedRegistry, config: &ClientConfig) -> Result<Self> {
        let project = resolved
            .project
            .filter(|project| !project.trim().is_empty())
            .ok_or_else(|| {
                RegistryError::Validation(format!(
                    "gitlab registry on {} requires a `project`",
                    resolved.host
                ))
            })?;

        Ok(Self {
            base_url: base_url(&resolved.host),
            project: project.trim().trim_matches('/').to_string(),
            token: resolved.token.filter(|t| !t.is_empty()),
            agent: config.build(),
            project_id: Mutex::new(None),
        })
    }

    fn authorized<B>(&self, req: RequestBuilder<B>) -> RequestBuilder<B> {
        match &self.token {
            Some(token) => req.header(PRIVATE_TOKEN, token),
            None => req,
        }
    }

    /// Numeric id of the configured project, fetched on first use.
    pub fn project_id(&self) -> Result<u64> {
        let mut cached = self.project_id.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = *cached {
            return Ok(id);
        }

        let url = format!(
            "{}/api/v4/projects/{}",
            self.base_url,
            utf8_percent_encode(&self.project, PATH_SEGMENT)
        );
        let mut resp = self.authorized(self.agent.get(&url)).call()?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(format!(
                "gitlab project {}",
                self.project
            )));
        }
        check_status(&resp, &url)?;
        let project: Project = read_json(&mut resp, &url)?;

        debug!(project = %self.project, id = project.id, "Resolved project id");
        *cached = Some(project.id);
        Ok(project.id)
    }

    fn package_url(&self, project_id: u64, artifact: &ArtifactId, version: &str) -> String {
        format!(
            "{}/api/v4/projects/{project_id}/packages/generic/{}/{}/artifact.tar.gz",
            self.base_url,
            utf8_percent_encode(&artifact.name, PATH_SEGMENT),
            utf8_percent_encode(version, PATH_SEGMENT),
        )
    }

    /// Generic packages named exactly like `artifact`, newest first.
    ///
    /// GitLab filters `package_name` by substring, so the list is narrowed here.
    pub fn packages(&self, artifact: &ArtifactId) -> Result<Vec<GitLabPackage>> {
        let project_id = self.project_id()?;
        let url = format!("{}/api/v4/projects/{project_id}/packages", self.base_url);
        let mut packages = Vec::new();
        let mut page = 1u32;

        loop {
            let mut resp = self
                .authorized(self.agent.get(&url))
                .query("package_type", "generic")
                .query("package_name", &artifact.name)
                .query("order_by", "created_at")
                .query("sort", "desc")
                .query("per_page", PER_PAGE.to_string())
                .query("page", page.to_string())
                .call()?;
            if resp.status() == StatusCode::NOT_FOUND {
                return Ok(Vec::new());
            }
            check_status(&resp, &url)?;

            let next = resp
                .headers()
                .get("x-next-page")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u32>().ok());
            let batch: Vec<GitLabPackage> = read_json(&mut resp, &url)?;
            trace!(page, count = batch.len(), "Fetched packages");
            packages.extend(batch.into_iter().filter(|pkg| pkg.name == artifact.name));

            match next {
                Some(next) if next > page => page = next,
                _ => return Ok(packages),
            }
        }
    }
}

impl RegistryClient for GitLabRegistry {
    fn download(
        &self,
        artifact: &ArtifactId,
        version: Option<&str>,
        target_dir: &Path,
    ) -> Result<DownloadResult> {
        let version = requested_version(self, artifact, version)?;
        let url = self.package_url(self.project_id()?, artifact, &version);

        let mut resp = self.authorized(self.agent.get(&url)).call()?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(format!(
                "{}@{version}",
                artifact.full_name()
            )));
        }
        check_status(&resp, &url)?;
        let bytes = read_bytes(&mut resp)?;

        let installed = install_archive(&bytes, target_dir)?;
        info!(artifact = %artifact.full_name(), %version, project = %self.project, "Downloaded");

        Ok(DownloadResult {
            version,
            resolved: url,
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
        let Some(token) = &self.token else {
            return Err(RegistryError::AuthRequired(format!(
                "publishing to gitlab project {} requires a token",
                self.project
            )));
        };

        if self.version_exists(artifact, version)? {
            return Err(RegistryError::Validation(format!(
                "{}@{version} already exists in {}",
                artifact.full_name(),
                self.project
            )));
        }

        let bytes = fs::read(tarball).with_context(|| format!("reading {}", tarball.display()))?;
        let url = self.package_url(self.project_id()?, artifact, version);
        let resp = self
            .agent
            .put(&url)
            .header(PRIVATE_TOKEN, token)
            .send(&bytes[..])?;
        check_status(&resp, &url)?;

        info!(artifact = %artifact.full_name(), %version, project = %self.project, "Published");
        Ok(PublishResult {
            version: version.to_string(),
            resolved: url,
        })
    }

    fn latest_version(&self, artifact: &ArtifactId) -> Result<Option<String>> {
        let packages = self.packages(artifact)?;
        Ok(highest_version(packages.iter().map(|pkg| &pkg.version)))
    }

    fn version_exists(&self, artifact: &ArtifactId, version: &str) -> Result<bool> {
        Ok(self
            .packages(artifact)?
            .iter()
            .any(|pkg| pkg.version == version))
    }

    fn list_versions(&self, artifact: &ArtifactId) -> Result<Vec<String>> {
        let packages = self.packages(artifact)?;
        Ok(sort_versions_desc(packages.iter().map(|pkg| &pkg.version)))
    }

    fn artifact_info(&self, artifact: &ArtifactId) -> Result<Option<ArtifactInfo>> {
        let packages = self.packages(artifact)?;
        let (Some(newest), Some(oldest)) = (packages.first(), packages.last()) else {
            return Ok(None);
        };

        Ok(Some(ArtifactInfo {
            artifact_id: artifact.full_name(),
            latest_version: highest_version(packages.iter().map(|pkg| &pkg.version)),
            versions: sort_versions_desc(packages.iter().map(|pkg| &pkg.version)),
            created_at: oldest.created_at.clone(),
            updated_at: newest.created_at.clone(),
        }))
    }
}
