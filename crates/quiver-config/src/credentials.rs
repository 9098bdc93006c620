//! Token lookup for registries.
//!
//! A [`TokenProvider`] answers "which token should I use for this backend
//! and host?". Tokens written in the config file are handled by the resolver
//! and always win; providers are only consulted when the config has none.

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, Write as _},
    path::{Path, PathBuf},
};

use quiver_utils::path::xdg_config_home;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    config::RegistryKind,
    error::{ConfigError, Result},
};

/// Environment variable overriding the credentials file location.
pub const CREDENTIALS_ENV: &str = "QUIVER_CREDENTIALS";

/// Source of registry tokens keyed by backend type and host.
pub trait TokenProvider: Send + Sync {
    fn token(&self, kind: RegistryKind, host: &str) -> Option<String>;
}

/// Reads tokens from well-known environment variables.
///
/// | kind      | variables                         |
/// |-----------|-----------------------------------|
/// | `default` | `QUIVER_TOKEN`                    |
/// | `gitlab`  | `GITLAB_TOKEN`, `CI_JOB_TOKEN`    |
/// | `github`  | `GITHUB_TOKEN`, `GH_TOKEN`        |
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvTokenProvider;

impl EnvTokenProvider {
    pub fn env_vars(kind: RegistryKind) -> &'static [&'static str] {
        match kind {
            RegistryKind::Default => &["QUIVER_TOKEN"],
            RegistryKind::Gitlab => &["GITLAB_TOKEN", "CI_JOB_TOKEN"],
            RegistryKind::Github => &["GITHUB_TOKEN", "GH_TOKEN"],
        }
    }
}

impl TokenProvider for EnvTokenProvider {
    fn token(&self, kind: RegistryKind, _host: &str) -> Option<String> {
        Self::env_vars(kind).iter().find_map(|var| {
            std::env::var(var)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .inspect(|_| trace!("Using token from ${var}"))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct HostCredential {
    pub token: String,

    /// Restricts the credential to one backend type.
    #[serde(rename = "type")]
    pub kind: Option<RegistryKind>,
}

/// Tokens persisted per host in `credentials.toml`.
///
/// ```toml
/// [hosts."gitlab.example.com"]
/// token = "glpat-..."
/// type = "gitlab"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CredentialStore {
    #[serde(default)]
    pub hosts: BTreeMap<String, HostCredential>,

    #[serde(skip)]
    path: Option<PathBuf>,
}

impl CredentialStore {
    /// `$QUIVER_CREDENTIALS`, else `$XDG_CONFIG_HOME/quiver/credentials.toml`.
    pub fn default_path() -> PathBuf {
        match std::env::var(CREDENTIALS_ENV) {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => xdg_config_home().join("quiver").join("credentials.toml"),
        }
    }

    /// Loads the store at `path`; a missing file is an empty store.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut store = match fs::read_to_string(path) {
            Ok(content) => toml::from_str::<Self>(&content)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                return Err(ConfigError::IoError {
                    action: format!("reading credentials from {}", path.display()),
                    source: err,
                })
            }
        };
        debug!(
            "Loaded {} credential(s) from {}",
            store.hosts.len(),
            path.display()
        );
        store.path = Some(path.to_path_buf());
        Ok(store)
    }

    pub fn set(&mut self, host: &str, kind: Option<RegistryKind>, token: impl Into<String>) {
        self.hosts.insert(
            normalize_host(host),
            HostCredential {
                token: token.into(),
                kind,
            },
        );
    }

    pub fn remove(&mut self, host: &str) -> Option<HostCredential> {
        self.hosts.remove(&normalize_host(host))
    }

    /// Writes the store back to the file it was loaded from, or to
    /// [`CredentialStore::default_path`].
    pub fn save(&self) -> Result<()> {
        let path = self.path.clone().unwrap_or_else(Self::default_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| ConfigError::IoError {
                action: format!("creating {}", parent.display()),
                source: err,
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        create_private(&path)
            .and_then(|mut file| file.write_all(content.as_bytes()))
            .map_err(|err| ConfigError::IoError {
                action: format!("writing credentials to {}", path.display()),
                source: err,
            })
    }
}

impl TokenProvider for CredentialStore {
    fn token(&self, kind: RegistryKind, host: &str) -> Option<String> {
        self.hosts
            .get(&normalize_host(host))
            .filter(|cred| cred.kind.is_none_or(|k| k == kind))
            .map(|cred| cred.token.clone())
    }
}

/// Asks each provider in turn; the first token found wins.
#[derive(Default)]
pub struct ChainTokenProvider {
    providers: Vec<Box<dyn TokenProvider>>,
}

impl ChainTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: impl TokenProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Environment variables first, then the credential store at `credentials_path`.
    pub fn standard<P: AsRef<Path>>(credentials_path: P) -> Result<Self> {
        Ok(Self::new()
            .with(EnvTokenProvider)
            .with(CredentialStore::load(credentials_path)?))
    }
}

impl TokenProvider for ChainTokenProvider {
    fn token(&self, kind: RegistryKind, host: &str) -> Option<String> {
        self.providers
            .iter()
            .find_map(|provider| provider.token(kind, host))
    }
}

fn normalize_host(host: &str) -> String {
    host.trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_ascii_lowercase()
}

/// Opens `path` for writing as an owner-only file, before any content is
/// written to it.
#[cfg(unix)]
fn create_private(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::{OpenOptionsExt as _, PermissionsExt as _};

    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies when the file is created.
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> io::Result<File> {
    File::create(path)
}
