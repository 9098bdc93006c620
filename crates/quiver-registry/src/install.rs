use std::{
    io::Write as _,
    path::{Path, PathBuf},
};

use quiver_dl::tarball::TarballValidator;
use quiver_utils::{
    fs::move_dir_contents,
    hash::{calculate_integrity, hash_directory, FileHashMap},
};
use tracing::{debug, warn};

use crate::error::{ErrorContext, RegistryError, Result};

/// Hashes of an installed artifact tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledArchive {
    pub integrity: String,
    pub file_hashes: FileHashMap,
}

/// Validates, extracts and hashes a downloaded `.tar.gz` into `target_dir`.
///
/// The archive is spooled to a randomly named temp file that is deleted on
/// every exit path. Extraction happens in a staging directory next to
/// `target_dir`; a rejected or failed archive leaves `target_dir` untouched.
pub fn install_archive(bytes: &[u8], target_dir: &Path) -> Result<InstalledArchive> {
    let mut archive = tempfile::Builder::new()
        .prefix("quiver-")
        .suffix(".tar.gz")
        .tempfile()
        .with_context(|| "creating temporary archive".to_string())?;
    let archive_path = archive.path().to_path_buf();
    archive
        .write_all(bytes)
        .and_then(|()| archive.flush())
        .with_context(|| format!("writing {}", archive_path.display()))?;

    let validator = TarballValidator::new();
    let verdict = validator.validate(archive.path(), target_dir);
    if !verdict.safe {
        warn!(
            target = %target_dir.display(),
            violations = verdict.violations.len(),
            "Refusing to extract archive"
        );
        return Err(RegistryError::UnsafeArchive {
            violations: verdict.messages(),
        });
    }

    let parent = staging_parent(target_dir);
    std::fs::create_dir_all(&parent)
        .with_context(|| format!("creating {}", parent.display()))?;
    let staging = tempfile::Builder::new()
        .prefix(".quiver-staging-")
        .tempdir_in(&parent)
        .with_context(|| format!("creating staging directory in {}", parent.display()))?;

    validator
        .validate_for_extraction(archive.path(), staging.path())?
        .extract()?;

    let file_hashes = hash_directory(staging.path())?;
    let integrity = calculate_integrity(&file_hashes);

    move_dir_contents(staging.path(), target_dir)?;
    debug!(
        target = %target_dir.display(),
        files = file_hashes.len(),
        %integrity,
        "Installed archive"
    );

    Ok(InstalledArchive {
        integrity,
        file_hashes,
    })
}

fn staging_parent(target_dir: &Path) -> PathBuf {
    match target_dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
