use std::time::Duration;

use ureq::{Agent, Proxy};

/// User agent sent when none is configured.
pub const DEFAULT_USER_AGENT: &str = concat!("quiver/", env!("CARGO_PKG_VERSION"));

/// Settings for the HTTP agent owned by each registry client.
///
/// Every client builds its own [`Agent`] from this, so two clients with
/// different timeouts never interfere. Non-2xx responses are returned as
/// regular responses; callers inspect the status themselves.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub user_agent: Option<String>,
    pub proxy: Option<Proxy>,
    /// Upper bound for a whole request, including reading the body.
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: Some(DEFAULT_USER_AGENT.into()),
            proxy: None,
            timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        if user_agent.is_some() {
            self.user_agent = user_agent;
        }
        self
    }

    pub fn build(&self) -> Agent {
        let mut config = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(self.timeout);

        if let Some(proxy) = &self.proxy {
            config = config.proxy(Some(proxy.clone()));
        }

        if let Some(user_agent) = &self.user_agent {
            config = config.user_agent(user_agent);
        }

        config.build().into()
    }
}

/// Turns a configured host into a base URL.
///
/// Hosts without a scheme get `https://`; an explicit `http://` is kept for
/// local registries.
pub fn base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("https://") || host.starts_with("http://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

/// Strips the scheme from a host or base URL.
pub fn bare_host(host: &str) -> &str {
    host.trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
}
