use std::{fmt, str::FromStr, sync::LazyLock};

use regex::Regex;

use crate::error::{RegistryError, Result};

static ARTIFACT_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@?([a-z0-9][a-z0-9-]*[a-z0-9]?)/([a-z0-9][a-z0-9-]*[a-z0-9]?)(?:@(.+))?$")
        .expect("unable to compile artifact id regex")
});

/// `@scope/name`, optionally pinned to a version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactId {
    /// Always starts with `@`.
    pub scope: String,
    pub name: String,
    pub version: Option<String>,
}

impl ArtifactId {
    /// Canonical `@scope/name`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.scope, self.name)
    }

    /// Scope without the leading `@`.
    pub fn scope_name(&self) -> &str {
        self.scope.trim_start_matches('@')
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}/{}@{version}", self.scope, self.name),
            None => write!(f, "{}/{}", self.scope, self.name),
        }
    }
}

impl FromStr for ArtifactId {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        parse_artifact_id(s)
    }
}

/// Parses `[@]scope/name[@version]`; a missing `@` before the scope is added.
pub fn parse_artifact_id(source: &str) -> Result<ArtifactId> {
    let caps = ARTIFACT_ID_RE
        .captures(source.trim())
        .ok_or_else(|| RegistryError::InvalidArtifactId(source.to_string()))?;

    Ok(ArtifactId {
        scope: format!("@{}", &caps[1]),
        name: caps[2].to_string(),
        version: caps.get(3).map(|m| m.as_str().to_string()),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Github,
    Gitlab,
    Registry,
}

/// A free-form artifact source such as `github:owner/repo#v1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSource {
    pub kind: SourceKind,
    pub identifier: String,
    /// Git ref after `#`.
    pub reference: Option<String>,
    /// Only set for GitLab sources.
    pub host: Option<String>,
    pub raw: String,
}

pub const GITLAB_DEFAULT_HOST: &str = "gitlab.com";

/// Classifies a source string.
///
/// `github:` and `gitlab:` select the forge; anything else is a registry
/// source. For GitLab a first path segment containing a `.` is the host.
pub fn parse_source(source: &str) -> ParsedSource {
    let raw = source.to_string();
    let (kind, rest) = if let Some(rest) = source.strip_prefix("github:") {
        (SourceKind::Github, rest)
    } else if let Some(rest) = source.strip_prefix("gitlab:") {
        (SourceKind::Gitlab, rest)
    } else {
        (SourceKind::Registry, source)
    };

    let (path, reference) = match rest.rsplit_once('#') {
        Some((path, reference)) => (path, Some(reference).filter(|r| !r.is_empty())),
        None => (rest, None),
    };
    let path = path.trim_matches('/');

    let (identifier, host) = match kind {
        SourceKind::Gitlab => {
            match path.split_once('/') {
                Some((first, remainder)) if first.contains('.') => {
                    (remainder.to_string(), Some(first.to_string()))
                }
                _ => (path.to_string(), Some(GITLAB_DEFAULT_HOST.to_string())),
            }
        }
        _ => (path.to_string(), None),
    };

    ParsedSource {
        kind,
        identifier,
        reference: reference.map(str::to_string),
        host,
        raw,
    }
}
