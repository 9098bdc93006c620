use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Parsed `WWW-Authenticate: Bearer realm="..",service="..",scope=".."`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl BearerChallenge {
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(char::is_whitespace)?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let params = parse_params(params)?;
        let realm = params.get("realm").filter(|r| !r.is_empty())?.clone();
        Some(Self {
            realm,
            service: params.get("service").cloned(),
            scope: params.get("scope").cloned(),
        })
    }

    /// Token cache key.
    pub fn cache_key(&self) -> String {
        format!(
            "{}:{}",
            self.service.as_deref().unwrap_or_default(),
            self.scope.as_deref().unwrap_or_default()
        )
    }
}

/// Parses `key="value",key=value` pairs. Quoted values may contain commas.
fn parse_params(input: &str) -> Option<HashMap<String, String>> {
    let mut params = HashMap::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        let (key, after_key) = rest.split_once('=')?;
        let key = key.trim().to_ascii_lowercase();
        let after_key = after_key.trim_start();

        let (value, remaining) = if let Some(quoted) = after_key.strip_prefix('"') {
            let end = quoted.find('"')?;
            (&quoted[..end], &quoted[end + 1..])
        } else {
            let end = after_key.find(',').unwrap_or(after_key.len());
            (after_key[..end].trim(), &after_key[end..])
        };

        if key.is_empty() {
            return None;
        }
        params.insert(key, value.to_string());
        rest = remaining.trim_start().trim_start_matches(',').trim_start();
    }

    Some(params)
}

/// `Authorization` value for the token exchange.
pub(crate) fn basic_auth(token: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("USERNAME:{token}")))
}

/// Bearer tokens keyed by `service:scope`.
///
/// Each key has its own slot lock, so concurrent misses for one key wait on
/// a single exchange while other keys proceed.
#[derive(Debug, Default)]
pub(crate) struct TokenCache {
    slots: Mutex<HashMap<String, Arc<Mutex<Option<String>>>>>,
}

impl TokenCache {
    pub fn get_or_fetch<F, E>(&self, key: &str, fetch: F) -> Result<String, E>
    where
        F: FnOnce() -> Result<String, E>,
    {
        let slot = {
            let mut slots = lock(&self.slots);
            Arc::clone(slots.entry(key.to_string()).or_default())
        };

        let mut cached = lock(&slot);
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let token = fetch()?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Drops `stale` from the slot for `key`; a token another caller has
    /// already refreshed is left alone.
    pub fn evict(&self, key: &str, stale: &str) {
        let Some(slot) = lock(&self.slots).get(key).cloned() else {
            return;
        };
        let mut cached = lock(&slot);
        if cached.as_deref() == Some(stale) {
            *cached = None;
        }
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<String> {
        let slot = lock(&self.slots).get(key).cloned()?;
        let token = lock(&slot).clone();
        token
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
