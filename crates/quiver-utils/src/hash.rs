//! Content-addressable integrity for extracted artifact trees.
//!
//! Every hash produced here has the form `sha256:<32 hex chars>`: the first
//! 16 bytes of a SHA-256 digest. Lockfiles written by earlier releases store
//! exactly this truncated form, so it must not change.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    io,
    path::Path,
};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{HashError, HashResult};

/// Prefix shared by every file hash and integrity digest.
pub const HASH_PREFIX: &str = "sha256:";

/// Number of digest bytes kept in the hex-encoded hash.
const TRUNCATED_DIGEST_LEN: usize = 16;

/// Mapping from a forward-slash path relative to the artifact root to its file hash.
pub type FileHashMap = BTreeMap<String, String>;

/// A file whose hash differs from the expected value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifiedFile {
    pub path: String,
    pub expected: String,
    pub actual: String,
}

/// Outcome of comparing a directory against an expected [`FileHashMap`].
///
/// Extra files are reported but do not invalidate the tree; missing and
/// modified files do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub valid: bool,
    pub missing_files: Vec<String>,
    pub modified_files: Vec<ModifiedFile>,
    pub extra_files: Vec<String>,
}

/// Hashes a byte slice into the truncated `sha256:` form.
///
/// # Examples
///
/// ```
/// use quiver_utils::hash::hash_bytes;
///
/// let hash = hash_bytes(b"hello");
/// assert_eq!(hash, "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e");
/// ```
pub fn hash_bytes(data: &[u8]) -> String {
    finish(Sha256::digest(data).as_slice())
}

/// Hashes the raw bytes of a file, streaming its contents.
///
/// # Errors
///
/// * [`HashError::ReadFailed`] if the file cannot be opened or read.
pub fn hash_file<P: AsRef<Path>>(path: P) -> HashResult<String> {
    let path = path.as_ref();
    let read_failed = |source| HashError::ReadFailed {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(read_failed)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(read_failed)?;
    Ok(finish(hasher.finalize().as_slice()))
}

/// Recursively hashes every regular file under `root`.
///
/// Keys are paths relative to `root` joined with `/`. Symlinks are not
/// followed and directories (empty or not) contribute no entries.
///
/// # Errors
///
/// * [`HashError::NotADirectory`] if `root` is not a directory.
/// * [`HashError::WalkFailed`] / [`HashError::ReadFailed`] on I/O failures.
pub fn hash_directory<P: AsRef<Path>>(root: P) -> HashResult<FileHashMap> {
    let root = root.as_ref();
    let mut hashes = FileHashMap::new();

    for path in walk_files(root)? {
        let relative = relative_key(root, &path);
        hashes.insert(relative, hash_file(&path)?);
    }

    Ok(hashes)
}

/// Computes the aggregate integrity digest of a set of file hashes.
///
/// The input is serialized as `path:hash\n` lines sorted by path, then hashed,
/// so the result does not depend on iteration or insertion order.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use quiver_utils::hash::calculate_integrity;
///
/// let a = HashMap::from([("a.md", "sha256:01"), ("b.md", "sha256:02")]);
/// let b = vec![("b.md", "sha256:02"), ("a.md", "sha256:01")];
/// assert_eq!(calculate_integrity(&a), calculate_integrity(b));
/// ```
pub fn calculate_integrity<I, K, V>(file_hashes: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut entries: Vec<(K, V)> = file_hashes.into_iter().collect();
    entries.sort_by(|(a, _), (b, _)| a.as_ref().cmp(b.as_ref()));

    let serialized: String = entries
        .iter()
        .map(|(path, hash)| format!("{}:{}\n", path.as_ref(), hash.as_ref()))
        .collect();

    hash_bytes(serialized.as_bytes())
}

/// Compares the files under `root` against `expected`.
///
/// # Errors
///
/// Propagates failures from [`hash_directory`].
pub fn verify_integrity<P: AsRef<Path>>(root: P, expected: &FileHashMap) -> HashResult<IntegrityReport> {
    let actual = hash_directory(root)?;

    let mut report = IntegrityReport::default();

    for (path, expected_hash) in expected {
        match actual.get(path) {
            None => report.missing_files.push(path.clone()),
            Some(actual_hash) if actual_hash != expected_hash => {
                report.modified_files.push(ModifiedFile {
                    path: path.clone(),
                    expected: expected_hash.clone(),
                    actual: actual_hash.clone(),
                });
            }
            Some(_) => {}
        }
    }

    let expected_paths: BTreeSet<&String> = expected.keys().collect();
    report.extra_files = actual
        .keys()
        .filter(|path| !expected_paths.contains(path))
        .cloned()
        .collect();

    report.valid = report.missing_files.is_empty() && report.modified_files.is_empty();
    Ok(report)
}

/// Sums the sizes of all regular files under `root`.
///
/// # Errors
///
/// Propagates walk and metadata failures.
pub fn directory_size<P: AsRef<Path>>(root: P) -> HashResult<u64> {
    let root = root.as_ref();
    let mut total = 0u64;

    for path in walk_files(root)? {
        let metadata = path.metadata().map_err(|source| HashError::ReadFailed {
            path: path.clone(),
            source,
        })?;
        total = total.saturating_add(metadata.len());
    }

    Ok(total)
}

fn walk_files(root: &Path) -> HashResult<Vec<std::path::PathBuf>> {
    if !root.is_dir() {
        return Err(HashError::NotADirectory {
            path: root.to_path_buf(),
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|source| HashError::WalkFailed {
            path: root.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn relative_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn finish(digest: &[u8]) -> String {
    format!(
        "{HASH_PREFIX}{}",
        hex::encode(&digest[..TRUNCATED_DIGEST_LEN])
    )
}
