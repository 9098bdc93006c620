use std::fmt;

use quiver_config::{Config, RegistryKind, TokenProvider};
use quiver_dl::http_client::bare_host;
use tracing::debug;

/// Host of the public registry used for scopes without configuration.
pub const DEFAULT_REGISTRY_HOST: &str = "registry.quiver.dev";
pub const GITLAB_DEFAULT_HOST: &str = crate::artifact::GITLAB_DEFAULT_HOST;
pub const GITHUB_DEFAULT_HOST: &str = "ghcr.io";

/// Registry settings for one scope after merging config and tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedRegistry {
    pub kind: RegistryKind,
    pub host: String,
    pub project: Option<String>,
    pub token: Option<String>,
    pub prefix: Option<String>,
}

impl ResolvedRegistry {
    pub fn default_registry(token: Option<String>) -> Self {
        Self {
            kind: RegistryKind::Default,
            host: DEFAULT_REGISTRY_HOST.to_string(),
            project: None,
            token,
            prefix: None,
        }
    }
}

impl fmt::Debug for ResolvedRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedRegistry")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("project", &self.project)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("prefix", &self.prefix)
            .finish()
    }
}

pub fn default_host(kind: RegistryKind) -> &'static str {
    match kind {
        RegistryKind::Default => DEFAULT_REGISTRY_HOST,
        RegistryKind::Gitlab => GITLAB_DEFAULT_HOST,
        RegistryKind::Github => GITHUB_DEFAULT_HOST,
    }
}

/// Resolves the registry serving `scope`. Never fails.
///
/// Without a config entry the public registry is used. A token written in the
/// config always wins; otherwise `token_provider` is asked by kind and host.
pub fn resolve_registry(
    scope: &str,
    config: &Config,
    token_provider: Option<&dyn TokenProvider>,
) -> ResolvedRegistry {
    let lookup = |kind: RegistryKind, host: &str| {
        token_provider.and_then(|provider| provider.token(kind, bare_host(host)))
    };

    let Some(entry) = config.registry(scope) else {
        debug!(%scope, "No registry configured, using {DEFAULT_REGISTRY_HOST}");
        return ResolvedRegistry::default_registry(lookup(
            RegistryKind::Default,
            DEFAULT_REGISTRY_HOST,
        ));
    };

    let host = entry
        .host
        .as_deref()
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .unwrap_or(default_host(entry.kind))
        .to_string();

    let token = entry
        .token
        .clone()
        .filter(|token| !token.is_empty())
        .or_else(|| lookup(entry.kind, &host));

    debug!(
        %scope,
        kind = %entry.kind,
        %host,
        has_token = token.is_some(),
        "Resolved registry"
    );

    ResolvedRegistry {
        kind: entry.kind,
        host,
        project: entry.project.clone(),
        token,
        prefix: entry.prefix.clone().filter(|prefix| !prefix.is_empty()),
    }
}
