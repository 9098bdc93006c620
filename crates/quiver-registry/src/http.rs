use serde::de::DeserializeOwned;
use ureq::{
    http::{Response, StatusCode},
    Body,
};

use crate::error::{RegistryError, Result};

/// Upper bound for a downloaded artifact tarball.
pub(crate) const MAX_ARTIFACT_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Maps a non-2xx status to the matching error.
pub(crate) fn check_status(resp: &Response<Body>, url: &str) -> Result<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }

    Err(match status {
        StatusCode::NOT_FOUND => RegistryError::NotFound(url.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            RegistryError::AuthRequired(format!("{url} returned {status}"))
        }
        _ => RegistryError::Network(format!("HTTP {} from {url}", status.as_u16())),
    })
}

pub(crate) fn read_json<T: DeserializeOwned>(resp: &mut Response<Body>, url: &str) -> Result<T> {
    resp.body_mut()
        .read_json()
        .map_err(|err| RegistryError::Validation(format!("{url}: {err}")))
}

pub(crate) fn read_bytes(resp: &mut Response<Body>) -> Result<Vec<u8>> {
    Ok(resp
        .body_mut()
        .with_config()
        .limit(MAX_ARTIFACT_SIZE)
        .read_to_vec()?)
}
