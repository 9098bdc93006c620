//! Pull-only client for the OCI Distribution API.
//!
//! Registries such as ghcr.io answer anonymous or PAT-authenticated requests
//! with `401` and a `WWW-Authenticate: Bearer ...` challenge. [`OciClient`]
//! exchanges its token at the advertised realm, caches the bearer token per
//! `service:scope` and retries the request once.

use std::{collections::HashMap, fmt};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, trace, warn};
use ureq::{
    http::{
        header::{ACCEPT, AUTHORIZATION, LINK, WWW_AUTHENTICATE},
        Response, StatusCode,
    },
    Agent, Body,
};

use crate::{
    auth::{basic_auth, BearerChallenge, TokenCache},
    error::{DownloadError, Result},
    http_client::{bare_host, base_url, ClientConfig},
};

pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const DOCKER_MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Layer media type written by `quiver publish`.
pub const ARTIFACT_LAYER_MEDIA_TYPE: &str = "application/vnd.quiver.artifact.layer.v1.tar+gzip";
/// Generic gzip tar layer, accepted for artifacts pushed by other tools.
pub const OCI_LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
    application/vnd.docker.distribution.manifest.v2+json";

const MAX_BLOB_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// `oci://<registry>/<repository>:<tag>` or `...@sha256:<digest>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciReference {
    pub registry: String,
    pub repository: String,
    pub reference: String,
}

impl OciReference {
    pub fn new(registry: &str, repository: &str, reference: &str) -> Self {
        Self {
            registry: bare_host(registry).to_string(),
            repository: repository.to_string(),
            reference: reference.to_string(),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim_start_matches("oci://");
        let (registry, path) = value.split_once('/')?;

        // <repository>@sha256:<digest>
        if let Some((repository, digest)) = path.split_once('@') {
            return Some(Self::new(registry, repository, digest));
        }

        // <repository>:<tag>; only the last path segment can carry the tag
        let (repository, tag) = match path.rsplit_once(':') {
            Some((repository, tag)) if !tag.contains('/') => (repository, tag),
            _ => (path, "latest"),
        };

        if registry.is_empty() || repository.is_empty() {
            return None;
        }
        Some(Self::new(registry, repository, tag))
    }
}

impl fmt::Display for OciReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let separator = if self.reference.starts_with("sha256:") {
            '@'
        } else {
            ':'
        };
        write!(
            f,
            "oci://{}/{}{}{}",
            self.registry, self.repository, separator, self.reference
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciManifest {
    pub schema_version: u32,
    pub media_type: Option<String>,
    pub config: OciDescriptor,
    pub layers: Vec<OciDescriptor>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciDescriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl OciManifest {
    /// First layer carrying a gzip tar artifact.
    pub fn artifact_layer(&self) -> Option<&OciDescriptor> {
        self.layers.iter().find(|layer| {
            layer.media_type == ARTIFACT_LAYER_MEDIA_TYPE
                || layer.media_type == OCI_LAYER_MEDIA_TYPE
        })
    }
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

pub struct OciClient {
    base_url: String,
    token: Option<String>,
    agent: Agent,
    tokens: TokenCache,
}

impl OciClient {
    /// Creates a client for `host` (`https://` is assumed without a scheme).
    ///
    /// `token` is sent as `Authorization: Bearer` on first contact and used as
    /// the password of the token exchange.
    pub fn new(host: &str, token: Option<String>, config: &ClientConfig) -> Self {
        Self {
            base_url: base_url(host),
            token: token.filter(|t| !t.is_empty()),
            agent: config.build(),
            tokens: TokenCache::default(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `true` when `/v2/` answers 2xx or 401.
    pub fn ping(&self) -> Result<bool> {
        let url = format!("{}/v2/", self.base_url);
        let resp = self.send(&url, None, self.initial_auth())?;
        let status = resp.status();
        trace!(%url, %status, "ping");
        Ok(status.is_success() || status == StatusCode::UNAUTHORIZED)
    }

    pub fn pull_manifest(&self, repository: &str, reference: &str) -> Result<OciManifest> {
        let url = format!("{}/v2/{repository}/manifests/{reference}", self.base_url);
        let mut resp = self.get(&url, Some(MANIFEST_ACCEPT))?;
        check_status(&resp, &url)?;

        resp.body_mut()
            .read_json()
            .map_err(|err| DownloadError::InvalidResponse {
                url,
                reason: err.to_string(),
            })
    }

    /// Downloads a blob and checks it against its digest.
    pub fn pull_blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>> {
        let url = format!("{}/v2/{repository}/blobs/{digest}", self.base_url);
        let mut resp = self.get(&url, None)?;
        check_status(&resp, &url)?;

        let data = resp
            .body_mut()
            .with_config()
            .limit(MAX_BLOB_SIZE)
            .read_to_vec()?;
        verify_digest(digest, &data)?;

        debug!(%digest, size = data.len(), "Pulled blob");
        Ok(data)
    }

    /// All tags of `repository`; an unknown repository has none.
    pub fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let mut url = format!("{}/v2/{repository}/tags/list", self.base_url);
        let mut tags = Vec::new();

        loop {
            let mut resp = self.get(&url, None)?;
            if resp.status() == StatusCode::NOT_FOUND {
                debug!(%repository, "Repository has no tags");
                return Ok(tags);
            }
            check_status(&resp, &url)?;

            let next = next_link(&resp).map(|link| self.absolute(&link));
            let page: TagList =
                resp.body_mut()
                    .read_json()
                    .map_err(|err| DownloadError::InvalidResponse {
                        url: url.clone(),
                        reason: err.to_string(),
                    })?;
            tags.extend(page.tags.unwrap_or_default());

            match next {
                Some(next) if next != url => url = next,
                _ => return Ok(tags),
            }
        }
    }

    /// Pulls the artifact tarball published under `repository:tag`.
    pub fn pull_artifact_layer(&self, repository: &str, tag: &str) -> Result<Vec<u8>> {
        let manifest = self.pull_manifest(repository, tag)?;
        let layer = manifest
            .artifact_layer()
            .ok_or_else(|| DownloadError::LayerNotFound {
                repository: repository.to_string(),
                reference: tag.to_string(),
            })?;

        debug!(
            %repository,
            %tag,
            digest = %layer.digest,
            media_type = %layer.media_type,
            "Found artifact layer"
        );
        self.pull_blob(repository, &layer.digest)
    }

    /// GET with transparent bearer exchange on a `401` challenge.
    ///
    /// The original response comes back unchanged when the challenge is
    /// missing or malformed.
    fn get(&self, url: &str, accept: Option<&str>) -> Result<Response<Body>> {
        let resp = self.send(url, accept, self.initial_auth())?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        let Some(challenge) = resp
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .and_then(BearerChallenge::parse)
        else {
            debug!(%url, "401 without a usable bearer challenge");
            return Ok(resp);
        };

        let key = challenge.cache_key();
        let mut fresh = false;
        let bearer = self.tokens.get_or_fetch(&key, || {
            fresh = true;
            self.exchange(&challenge)
        })?;
        let resp = self.send(url, accept, Some(format!("Bearer {bearer}")))?;
        if fresh || resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        // Cached bearer tokens expire; exchange once more before giving up.
        debug!(%url, "Cached bearer token rejected");
        self.tokens.evict(&key, &bearer);
        let bearer = self
            .tokens
            .get_or_fetch(&key, || self.exchange(&challenge))?;
        self.send(url, accept, Some(format!("Bearer {bearer}")))
    }

    fn send(
        &self,
        url: &str,
        accept: Option<&str>,
        authorization: Option<String>,
    ) -> Result<Response<Body>> {
        let mut req = self.agent.get(url);
        if let Some(accept) = accept {
            req = req.header(ACCEPT, accept);
        }
        if let Some(authorization) = authorization {
            req = req.header(AUTHORIZATION, authorization);
        }
        Ok(req.call()?)
    }

    fn initial_auth(&self) -> Option<String> {
        self.token.as_ref().map(|token| format!("Bearer {token}"))
    }

    fn exchange(&self, challenge: &BearerChallenge) -> Result<String> {
        debug!(
            realm = %challenge.realm,
            service = ?challenge.service,
            scope = ?challenge.scope,
            "Exchanging token"
        );

        let mut req = self.agent.get(&challenge.realm);
        if let Some(service) = &challenge.service {
            req = req.query("service", service);
        }
        if let Some(scope) = &challenge.scope {
            req = req.query("scope", scope);
        }
        if let Some(token) = &self.token {
            req = req.header(AUTHORIZATION, basic_auth(token));
        }

        let auth_failed = || DownloadError::AuthRequired {
            url: challenge.realm.clone(),
        };

        let mut resp = req.call()?;
        if !resp.status().is_success() {
            warn!(realm = %challenge.realm, status = %resp.status(), "Token exchange failed");
            return Err(auth_failed());
        }

        let body: TokenResponse = resp.body_mut().read_json().map_err(|err| {
            DownloadError::InvalidResponse {
                url: challenge.realm.clone(),
                reason: err.to_string(),
            }
        })?;

        body.token
            .or(body.access_token)
            .filter(|token| !token.is_empty())
            .ok_or_else(auth_failed)
    }

    fn absolute(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            link.to_string()
        } else {
            format!("{}/{}", self.base_url, link.trim_start_matches('/'))
        }
    }
}

fn check_status(resp: &Response<Body>, url: &str) -> Result<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }

    let url = url.to_string();
    Err(match status {
        StatusCode::NOT_FOUND => DownloadError::NotFound { url },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DownloadError::AuthRequired { url },
        _ => {
            DownloadError::HttpError {
                status: status.as_u16(),
                url,
            }
        }
    })
}

/// Target of a `Link: <...>; rel="next"` header.
fn next_link(resp: &Response<Body>) -> Option<String> {
    let header = resp.headers().get(LINK)?.to_str().ok()?;
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        params
            .contains("rel=\"next\"")
            .then(|| {
                target
                    .trim()
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string()
            })
    })
}

fn verify_digest(expected: &str, data: &[u8]) -> Result<()> {
    let Some(expected_hex) = expected.strip_prefix("sha256:") else {
        warn!(digest = %expected, "Unsupported digest algorithm, skipping verification");
        return Ok(());
    };

    let actual = hex::encode(Sha256::digest(data));
    if actual.eq_ignore_ascii_case(expected_hex) {
        Ok(())
    } else {
        Err(DownloadError::DigestMismatch {
            expected: expected.to_string(),
            actual: format!("sha256:{actual}"),
        })
    }
}
