use std::{
    collections::HashMap,
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use quiver_utils::{
    path::{resolve_path, xdg_config_home},
    time::parse_duration,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, Result};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "QUIVER_CONFIG";

/// Backend type of a registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    /// The public quiver registry (or a self-hosted mirror of it).
    #[default]
    Default,
    /// GitLab Generic Package Registry.
    Gitlab,
    /// GitHub Container Registry, spoken to over the OCI Distribution API.
    Github,
}

impl RegistryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryKind::Default => "default",
            RegistryKind::Gitlab => "gitlab",
            RegistryKind::Github => "github",
        }
    }
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry settings for one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RegistryEntry {
    /// Backend type.
    /// Default: "default"
    #[serde(rename = "type", default)]
    pub kind: RegistryKind,

    /// Registry host, optionally with an `http://` or `https://` scheme.
    /// Default: depends on `type` (`gitlab.com`, `ghcr.io` or the public registry)
    pub host: Option<String>,

    /// GitLab project path or GitHub namespace. Required for `gitlab` and `github`.
    pub project: Option<String>,

    /// Static access token. Takes precedence over tokens from the environment
    /// or the credential store.
    pub token: Option<String>,

    /// GitHub only: prefix joined with `-` before the artifact name in the
    /// OCI repository name.
    pub prefix: Option<String>,
}

/// quiver configuration, read from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Scope (e.g. `@acme`) to registry mapping.
    #[serde(default)]
    pub registries: HashMap<String, RegistryEntry>,

    /// Network timeout applied to every registry request (e.g. "30s").
    /// Default: no timeout
    pub timeout: Option<String>,

    /// User agent sent with every request.
    /// Default: "quiver/<version>"
    pub user_agent: Option<String>,

    /// Path of the credentials file.
    /// Default: $XDG_CONFIG_HOME/quiver/credentials.toml
    pub credentials_path: Option<String>,
}

impl Config {
    /// Location of the config file: `$QUIVER_CONFIG`, else
    /// `$XDG_CONFIG_HOME/quiver/config.toml`.
    pub fn default_path() -> PathBuf {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => xdg_config_home().join("quiver").join("config.toml"),
        }
    }

    /// Loads the configuration from [`Config::default_path`].
    ///
    /// A missing file yields the default configuration.
    pub fn load() -> Result<Self> {
        Self::from_path(Self::default_path())
    }

    /// Loads and validates the configuration at `path`.
    ///
    /// A missing file yields the default configuration.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => {
                debug!("Loading configuration from {}", path.display());
                Self::from_toml_str(&content)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("No configuration at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(err) => {
                Err(ConfigError::IoError {
                    action: format!("reading {}", path.display()),
                    source: err,
                })
            }
        }
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks scope keys, required fields and the timeout format.
    pub fn validate(&self) -> Result<()> {
        for (scope, entry) in &self.registries {
            if !is_valid_scope(scope) {
                return Err(ConfigError::InvalidScope(scope.clone()));
            }

            let needs_project = matches!(entry.kind, RegistryKind::Gitlab | RegistryKind::Github);
            let has_project = entry.project.as_deref().is_some_and(|p| !p.trim().is_empty());
            if needs_project && !has_project {
                return Err(ConfigError::MissingProject {
                    scope: scope.clone(),
                    kind: entry.kind.to_string(),
                });
            }
        }

        self.timeout()?;
        Ok(())
    }

    /// Returns the registry entry for `scope`, with or without the leading `@`.
    pub fn registry(&self, scope: &str) -> Option<&RegistryEntry> {
        let bare = scope.trim_start_matches('@');
        self.registries
            .get(&format!("@{bare}"))
            .or_else(|| self.registries.get(bare))
    }

    /// Parsed request timeout.
    pub fn timeout(&self) -> Result<Option<Duration>> {
        match self.timeout.as_deref() {
            None => Ok(None),
            Some(value) => {
                parse_duration(value)
                    .map(Some)
                    .ok_or_else(|| ConfigError::InvalidTimeout(value.to_string()))
            }
        }
    }

    /// Resolved location of the credentials file.
    pub fn credentials_path(&self) -> Result<PathBuf> {
        match self.credentials_path.as_deref() {
            Some(path) => Ok(resolve_path(path)?),
            None => Ok(crate::credentials::CredentialStore::default_path()),
        }
    }
}

fn is_valid_scope(scope: &str) -> bool {
    let bare = scope.strip_prefix('@').unwrap_or(scope);
    !bare.is_empty()
        && !bare.starts_with('-')
        && bare
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
