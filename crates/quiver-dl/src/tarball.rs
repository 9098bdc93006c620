//! Archive inspection before extraction.
//!
//! Every entry of a `.tar.gz` is listed first, the leading-component
//! stripping that extraction performs is simulated, and each resulting path
//! (plus symlink and hard link targets) must stay inside the destination
//! without passing through a symlink the archive itself creates.
//! Only a [`ValidatedArchive`] can be extracted, and one is only handed out
//! by a validation run that found no violations.

use std::{
    collections::HashSet,
    fmt,
    fs::{self, File},
    io,
    path::{Component, Path, PathBuf},
    process::Command,
    sync::LazyLock,
};

use flate2::read::GzDecoder;
use regex::Regex;
use tar::{Archive, EntryType};
use tracing::{debug, trace, warn};

use crate::error::{DownloadError, Result};

/// Artifacts wrap their content in a single top-level directory.
pub const DEFAULT_STRIP_COMPONENTS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    HardLink,
    Other,
}

/// One archive member as listed, before any stripping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarEntry {
    pub path: String,
    pub kind: EntryKind,
    pub link_target: Option<String>,
}

impl TarEntry {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
            link_target: None,
        }
    }

    pub fn link(kind: EntryKind, path: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            link_target: Some(target.into()),
        }
    }
}

/// Produces the entry list of a gzip-compressed tar archive.
pub trait TarLister: Send + Sync {
    fn list(&self, archive: &Path) -> Result<Vec<TarEntry>>;
}

/// Reads the archive in-process with `tar` and `flate2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeLister;

impl TarLister for NativeLister {
    fn list(&self, archive: &Path) -> Result<Vec<TarEntry>> {
        let mut archive = Archive::new(GzDecoder::new(File::open(archive)?));
        let mut entries = Vec::new();

        for entry in archive.entries()? {
            let entry = entry?;
            let header = entry.header();
            let kind = match header.entry_type() {
                EntryType::Regular | EntryType::Continuous => EntryKind::File,
                EntryType::Directory => EntryKind::Directory,
                EntryType::Symlink => EntryKind::Symlink,
                EntryType::Link => EntryKind::HardLink,
                _ => EntryKind::Other,
            };

            let link_target = entry
                .link_name_bytes()
                .map(|name| String::from_utf8_lossy(&name).into_owned());

            entries.push(TarEntry {
                path: String::from_utf8_lossy(&entry.path_bytes()).into_owned(),
                kind,
                link_target,
            });
        }

        Ok(entries)
    }
}

/// Shells out to the system `tar` and parses its listing.
///
/// Names come from `tar -tzf`; entry types and link targets from
/// `tar -tvzf`. Both GNU and BSD verbose formats are understood.
#[derive(Debug, Clone)]
pub struct SystemTarLister {
    program: PathBuf,
}

impl Default for SystemTarLister {
    fn default() -> Self {
        Self {
            program: PathBuf::from("tar"),
        }
    }
}

impl SystemTarLister {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, flags: &str, archive: &Path) -> Result<String> {
        let output = Command::new(&self.program)
            .arg(flags)
            .arg(archive)
            .output()?;

        if !output.status.success() {
            return Err(io::Error::other(format!(
                "{} {flags} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
            .into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl TarLister for SystemTarLister {
    fn list(&self, archive: &Path) -> Result<Vec<TarEntry>> {
        let names = self.run("-tzf", archive)?;
        let verbose = self.run("-tvzf", archive)?;

        let names: Vec<&str> = names.lines().filter(|l| !l.is_empty()).collect();
        let verbose: Vec<TarEntry> = verbose
            .lines()
            .filter(|l| !l.is_empty())
            .filter_map(parse_verbose_line)
            .collect();

        if names.len() != verbose.len() {
            debug!(
                names = names.len(),
                verbose = verbose.len(),
                "tar listings disagree, using verbose names"
            );
            return Ok(verbose);
        }

        // Plain names are exact; verbose names of links carry the target.
        Ok(names
            .into_iter()
            .zip(verbose)
            .map(|(name, entry)| {
                TarEntry {
                    path: name.to_string(),
                    ..entry
                }
            })
            .collect())
    }
}

static TIME_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s\d{1,2}:\d{2}(?::\d{2})?\s").expect("valid regex"));

/// Parses one `tar -tvzf` line.
///
/// GNU: `lrwxrwxrwx user/group 0 2024-01-01 12:00 pkg/link -> ../target`
/// BSD: `lrwxr-xr-x  0 user  group  0 Jan  1 12:00 pkg/link -> ../target`
fn parse_verbose_line(line: &str) -> Option<TarEntry> {
    let kind = match line.chars().next()? {
        '-' => EntryKind::File,
        'd' => EntryKind::Directory,
        'l' => EntryKind::Symlink,
        'h' => EntryKind::HardLink,
        _ => EntryKind::Other,
    };

    let name = match TIME_TOKEN.find_iter(line).last() {
        Some(time) => &line[time.end()..],
        None => line.rsplit(char::is_whitespace).next()?,
    };

    let (path, link_target) = match kind {
        EntryKind::Symlink => {
            match name.split_once(" -> ") {
                Some((path, target)) => (path, Some(target)),
                None => (name, None),
            }
        }
        EntryKind::HardLink => {
            match name.split_once(" link to ") {
                Some((path, target)) => (path, Some(target)),
                None => (name, None),
            }
        }
        _ => (name, None),
    };

    Some(TarEntry {
        path: path.to_string(),
        kind,
        link_target: link_target.map(str::to_string),
    })
}

/// Reason an archive was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    AbsolutePath { entry: String },
    PathTraversal { entry: String },
    OutsideTarget { entry: String },
    SymlinkEscape { entry: String, target: String },
    HardLinkEscape { entry: String, target: String },
    ThroughSymlink { entry: String, link: String },
    ListingFailed { reason: String },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::AbsolutePath { entry } => write!(f, "absolute path: {entry}"),
            Violation::PathTraversal { entry } => write!(f, "path traversal: {entry}"),
            Violation::OutsideTarget { entry } => {
                write!(f, "path resolves outside target directory: {entry}")
            }
            Violation::SymlinkEscape { entry, target } => {
                write!(f, "symlink escapes target directory: {entry} -> {target}")
            }
            Violation::HardLinkEscape { entry, target } => {
                write!(f, "hard link escapes target directory: {entry} -> {target}")
            }
            Violation::ThroughSymlink { entry, link } => {
                write!(f, "path passes through archive symlink {link}: {entry}")
            }
            Violation::ListingFailed { reason } => {
                write!(f, "failed to list archive: {reason}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarValidationResult {
    pub safe: bool,
    pub violations: Vec<Violation>,
}

impl TarValidationResult {
    fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            safe: violations.is_empty(),
            violations,
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.violations.iter().map(ToString::to_string).collect()
    }
}

/// Checks archives before they are extracted.
pub struct TarballValidator {
    lister: Box<dyn TarLister>,
    strip_components: usize,
}

impl Default for TarballValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl TarballValidator {
    pub fn new() -> Self {
        Self {
            lister: Box::new(NativeLister),
            strip_components: DEFAULT_STRIP_COMPONENTS,
        }
    }

    pub fn with_lister(mut self, lister: impl TarLister + 'static) -> Self {
        self.lister = Box::new(lister);
        self
    }

    pub fn strip_components(mut self, n: usize) -> Self {
        self.strip_components = n;
        self
    }

    /// Lists `archive` and collects every violation against `target_dir`.
    ///
    /// A listing failure is itself a violation.
    pub fn validate(&self, archive: &Path, target_dir: &Path) -> TarValidationResult {
        let entries = match self.lister.list(archive) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(archive = %archive.display(), "Could not list archive: {err}");
                return TarValidationResult::from_violations(vec![Violation::ListingFailed {
                    reason: err.to_string(),
                }]);
            }
        };

        trace!(archive = %archive.display(), entries = entries.len(), "Validating archive");
        TarValidationResult::from_violations(check_entries(
            &entries,
            target_dir,
            self.strip_components,
        ))
    }

    /// Validates `archive` and returns a handle that can extract it.
    pub fn validate_for_extraction<'a>(
        &self,
        archive: &'a Path,
        target_dir: &Path,
    ) -> Result<ValidatedArchive<'a>> {
        let result = self.validate(archive, target_dir);
        if !result.safe {
            return Err(DownloadError::UnsafeArchive {
                violations: result.messages(),
            });
        }

        Ok(ValidatedArchive {
            archive,
            target_dir: target_dir.to_path_buf(),
            strip_components: self.strip_components,
        })
    }
}

/// Validates with the native lister.
pub fn validate(archive: &Path, target_dir: &Path, strip_components: usize) -> TarValidationResult {
    TarballValidator::new()
        .strip_components(strip_components)
        .validate(archive, target_dir)
}

/// Checks listed entries; every entry is examined even after a violation.
///
/// Symlinks are tracked across the whole archive: no entry path, symlink
/// target or hard link target may pass through a symlink the archive itself
/// creates, whatever the member order.
pub fn check_entries(
    entries: &[TarEntry],
    target_dir: &Path,
    strip_components: usize,
) -> Vec<Violation> {
    let root = normalize(target_dir);
    let links: HashSet<PathBuf> = entries
        .iter()
        .filter(|entry| entry.kind == EntryKind::Symlink)
        .filter_map(|entry| strip_path(&entry.path, strip_components))
        .map(|stripped| normalize(Path::new(&stripped)))
        .collect();
    let mut violations = Vec::new();

    for entry in entries {
        if is_absolute(&entry.path) {
            violations.push(Violation::AbsolutePath {
                entry: entry.path.clone(),
            });
            continue;
        }

        // Stripping could hide a leading `..`, so the raw path is checked too.
        if normalize(Path::new(&entry.path)).starts_with("..") {
            violations.push(Violation::PathTraversal {
                entry: entry.path.clone(),
            });
            continue;
        }

        let Some(stripped) = strip_path(&entry.path, strip_components) else {
            continue;
        };

        let relative = normalize(Path::new(&stripped));
        if relative.starts_with("..") {
            violations.push(Violation::PathTraversal {
                entry: entry.path.clone(),
            });
            continue;
        }

        if !normalize(&root.join(&relative)).starts_with(&root) {
            violations.push(Violation::OutsideTarget {
                entry: entry.path.clone(),
            });
            continue;
        }

        if let Some(link) = symlink_on_path(Path::new(""), Path::new(&stripped), &links, false) {
            violations.push(Violation::ThroughSymlink {
                entry: entry.path.clone(),
                link: link.display().to_string(),
            });
            continue;
        }

        let Some(link_target) = entry.link_target.as_deref() else {
            continue;
        };

        match entry.kind {
            EntryKind::Symlink => {
                let escape = || Violation::SymlinkEscape {
                    entry: entry.path.clone(),
                    target: link_target.to_string(),
                };
                let parent = relative.parent().unwrap_or(Path::new(""));
                let (start, rest) = if is_absolute(link_target) {
                    match Path::new(link_target).strip_prefix(&root) {
                        Ok(rest) => (Path::new(""), rest),
                        Err(_) => {
                            violations.push(escape());
                            continue;
                        }
                    }
                } else {
                    (parent, Path::new(link_target))
                };

                if !normalize(&root.join(start).join(rest)).starts_with(&root) {
                    violations.push(escape());
                } else if let Some(link) = symlink_on_path(start, rest, &links, false) {
                    violations.push(Violation::ThroughSymlink {
                        entry: entry.path.clone(),
                        link: link.display().to_string(),
                    });
                }
            }
            EntryKind::HardLink => {
                // Hard link targets name other archive members.
                let target = strip_path(link_target, strip_components);
                let escapes = is_absolute(link_target)
                    || normalize(Path::new(link_target)).starts_with("..")
                    || target.as_deref().is_none_or(|target| {
                        let target = normalize(Path::new(target));
                        target.starts_with("..")
                            || !normalize(&root.join(target)).starts_with(&root)
                    });
                if escapes {
                    violations.push(Violation::HardLinkEscape {
                        entry: entry.path.clone(),
                        target: link_target.to_string(),
                    });
                    continue;
                }

                // Linking a symlink would re-root its relative target.
                let through = target.as_deref().and_then(|target| {
                    symlink_on_path(Path::new(""), Path::new(target), &links, true)
                });
                if let Some(link) = through {
                    violations.push(Violation::ThroughSymlink {
                        entry: entry.path.clone(),
                        link: link.display().to_string(),
                    });
                }
            }
            _ => {}
        }
    }

    violations
}

/// First archive symlink met while walking `path` from `start`.
///
/// The final component only counts when `include_last` is set; a symlink
/// pointing at another symlink is fine, a directory component that is one
/// is not.
fn symlink_on_path(
    start: &Path,
    path: &Path,
    links: &HashSet<PathBuf>,
    include_last: bool,
) -> Option<PathBuf> {
    let components: Vec<Component<'_>> = path.components().collect();
    let mut current = start.to_path_buf();

    for (index, component) in components.iter().enumerate() {
        match component {
            Component::Normal(part) => current.push(part),
            Component::ParentDir => {
                current.pop();
            }
            _ => continue,
        }
        let last = index + 1 == components.len();
        if (!last || include_last) && links.contains(&current) {
            return Some(current);
        }
    }
    None
}

/// Drops the first `n` components of an archive path.
///
/// Returns `None` when nothing is left, i.e. the entry is not written.
pub fn strip_path(path: &str, n: usize) -> Option<String> {
    let remainder: Vec<&str> = path
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .skip(n)
        .collect();

    if remainder.is_empty() {
        None
    } else {
        Some(remainder.join("/"))
    }
}

fn is_absolute(path: &str) -> bool {
    path.starts_with('/') || path.starts_with('\\') || Path::new(path).is_absolute()
}

/// Lexical normalization: `.` is dropped, `..` pops a component, and
/// unresolvable leading `..` are kept.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if can_pop {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// An archive that passed validation against `target_dir`.
#[derive(Debug)]
pub struct ValidatedArchive<'a> {
    archive: &'a Path,
    target_dir: PathBuf,
    strip_components: usize,
}

impl ValidatedArchive<'_> {
    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Extracts into the validated target directory, creating it if needed.
    ///
    /// Every write is re-checked on disk: the parent directory must resolve
    /// inside the target, a symlink already at the destination is replaced
    /// rather than followed, and hard link sources must be regular members
    /// inside the target.
    pub fn extract(self) -> Result<()> {
        fs::create_dir_all(&self.target_dir)?;
        let root = fs::canonicalize(&self.target_dir)?;
        let mut archive = Archive::new(GzDecoder::new(File::open(self.archive)?));
        let mut written = 0usize;

        for entry in archive.entries()? {
            let mut entry = entry?;
            let raw_path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let Some(stripped) = strip_path(&raw_path, self.strip_components) else {
                continue;
            };
            let extract_err = |source| DownloadError::Extract {
                path: stripped.clone(),
                source,
            };

            let dest = contained_path(&root, &stripped).map_err(extract_err)?;
            if let Some(parent) = dest.parent() {
                create_dir_inside(&root, parent).map_err(extract_err)?;
            }
            remove_symlink(&dest).map_err(extract_err)?;

            match entry.header().entry_type() {
                EntryType::Link => {
                    let linked = entry.link_name_bytes().and_then(|name| {
                        strip_path(&String::from_utf8_lossy(&name), self.strip_components)
                    });
                    let Some(linked) = linked else {
                        continue;
                    };
                    let source = contained_path(&root, &linked)
                        .and_then(|source| link_source_inside(&root, source))
                        .map_err(extract_err)?;
                    if fs::hard_link(&source, &dest).is_err() {
                        fs::copy(&source, &dest).map_err(extract_err)?;
                    }
                }
                EntryType::Regular
                | EntryType::Continuous
                | EntryType::Directory
                | EntryType::Symlink => {
                    entry.unpack(&dest).map_err(extract_err)?;
                }
                other => {
                    warn!(entry = %raw_path, "Skipping unsupported entry type {other:?}");
                    continue;
                }
            }
            written += 1;
        }

        debug!(
            archive = %self.archive.display(),
            target = %self.target_dir.display(),
            entries = written,
            "Extracted archive"
        );
        Ok(())
    }
}

fn outside(path: &Path, root: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::PermissionDenied,
        format!("{} resolves outside {}", path.display(), root.display()),
    )
}

/// Joins a stripped member path onto `root`, refusing anything lexically
/// outside it.
fn contained_path(root: &Path, relative: &str) -> io::Result<PathBuf> {
    let relative = Path::new(relative);
    let lexical = normalize(relative);
    if is_absolute(&relative.to_string_lossy()) || lexical.starts_with("..") {
        return Err(outside(relative, root));
    }
    Ok(root.join(lexical))
}

/// Fails unless `path` resolves on disk to somewhere under `root`.
fn check_resolves_inside(root: &Path, path: &Path) -> io::Result<()> {
    if fs::canonicalize(path)?.starts_with(root) {
        Ok(())
    } else {
        Err(outside(path, root))
    }
}

/// `create_dir_all` that checks the deepest existing ancestor first, so no
/// directory is created through a symlink that leaves `root`.
fn create_dir_inside(root: &Path, dir: &Path) -> io::Result<()> {
    let mut existing = dir;
    while fs::symlink_metadata(existing).is_err() {
        match existing.parent() {
            Some(parent) => existing = parent,
            None => break,
        }
    }
    check_resolves_inside(root, existing)?;
    fs::create_dir_all(dir)?;
    check_resolves_inside(root, dir)
}

fn remove_symlink(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => fs::remove_file(path),
        _ => Ok(()),
    }
}

fn link_source_inside(root: &Path, source: PathBuf) -> io::Result<PathBuf> {
    if fs::symlink_metadata(&source)?.file_type().is_symlink() {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("hard link source {} is a symlink", source.display()),
        ));
    }
    if let Some(parent) = source.parent() {
        check_resolves_inside(root, parent)?;
    }
    Ok(source)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use flate2::{write::GzEncoder, Compression};

    use super::*;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn build_archive(files: &[(&str, &[u8])], symlinks: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for &(path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, data).unwrap();
        }
        for &(path, target) in symlinks {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            header.set_mode(0o777);
            builder.append_link(&mut header, path, target).unwrap();
        }
        gzip(&builder.into_inner().unwrap())
    }

    /// Raw ustar member; the tar crate refuses to write `..` names itself.
    fn raw_member(name: &[u8], typeflag: u8, link: &[u8], data: &[u8]) -> Vec<u8> {
        let mut header = [0u8; 512];
        header[..name.len()].copy_from_slice(name);
        header[100..108].copy_from_slice(b"0000644\0");
        header[124..136].copy_from_slice(format!("{:011o}\0", data.len()).as_bytes());
        header[156] = typeflag;
        header[157..157 + link.len()].copy_from_slice(link);
        header[148..156].copy_from_slice(b"        ");
        let cksum: u32 = header.iter().map(|&b| u32::from(b)).sum();
        header[148..156].copy_from_slice(format!("{cksum:06o}\0 ").as_bytes());

        let mut out = header.to_vec();
        out.extend_from_slice(data);
        out.extend(std::iter::repeat_n(0u8, (512 - data.len() % 512) % 512));
        out
    }

    fn raw_archive(members: &[Vec<u8>]) -> Vec<u8> {
        let mut tar = members.concat();
        tar.extend(std::iter::repeat_n(0u8, 1024));
        gzip(&tar)
    }

    fn write_archive(dir: &Path, bytes: &[u8]) -> PathBuf {
        let path = dir.join("artifact.tar.gz");
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_strip_path() {
        assert_eq!(strip_path("a/b/c", 1).as_deref(), Some("b/c"));
        assert_eq!(strip_path("a/", 1), None);
        assert_eq!(strip_path("a", 1), None);
        assert_eq!(strip_path("./a/b", 1).as_deref(), Some("b"));
        assert_eq!(strip_path("a/b/c", 0).as_deref(), Some("a/b/c"));
        assert_eq!(strip_path("a/b/c", 3), None);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("a/./b/../c")), PathBuf::from("a/c"));
        assert_eq!(normalize(Path::new("../../etc")), PathBuf::from("../../etc"));
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
        assert_eq!(normalize(Path::new("/t/../../x")), PathBuf::from("/x"));
    }

    #[test]
    fn test_check_traversal_after_strip() {
        let entries = [TarEntry::file("pkg/../../etc/passwd")];
        let violations = check_entries(&entries, Path::new("/target"), 1);
        assert_eq!(
            violations,
            vec![Violation::PathTraversal {
                entry: "pkg/../../etc/passwd".to_string()
            }]
        );
    }

    #[test]
    fn test_check_leading_parent_before_strip() {
        let entries = [TarEntry::file("../escape.txt")];
        let violations = check_entries(&entries, Path::new("/target"), 1);
        assert!(matches!(violations[..], [Violation::PathTraversal { .. }]));
    }

    #[test]
    fn test_check_absolute() {
        let violations = check_entries(&[TarEntry::file("/etc/passwd")], Path::new("/target"), 1);
        assert!(matches!(violations[..], [Violation::AbsolutePath { .. }]));
    }

    #[test]
    fn test_check_nested_file_accepted() {
        let entries = [
            TarEntry {
                path: "pkg/".to_string(),
                kind: EntryKind::Directory,
                link_target: None,
            },
            TarEntry::file("pkg/src/lib/mod.txt"),
            TarEntry::file("pkg/a/../b.txt"),
        ];
        assert!(check_entries(&entries, Path::new("/target"), 1).is_empty());
    }

    #[test]
    fn test_check_symlinks() {
        let entries = [
            TarEntry::link(EntryKind::Symlink, "pkg/docs/link", "../README.md"),
            TarEntry::link(EntryKind::Symlink, "pkg/docs/bad", "../../outside"),
            TarEntry::link(EntryKind::Symlink, "pkg/abs", "/etc/shadow"),
            TarEntry::link(EntryKind::Symlink, "pkg/inside-abs", "/target/file"),
        ];
        let violations = check_entries(&entries, Path::new("/target"), 1);
        assert_eq!(
            violations,
            vec![
                Violation::SymlinkEscape {
                    entry: "pkg/docs/bad".to_string(),
                    target: "../../outside".to_string(),
                },
                Violation::SymlinkEscape {
                    entry: "pkg/abs".to_string(),
                    target: "/etc/shadow".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_check_symlink_chain() {
        let entries = [
            TarEntry {
                path: "pkg/sub/".to_string(),
                kind: EntryKind::Directory,
                link_target: None,
            },
            TarEntry::link(EntryKind::Symlink, "pkg/sub/a", ".."),
            TarEntry::link(EntryKind::Symlink, "pkg/sub/a/b", ".."),
            TarEntry::file("pkg/sub/a/b/escape.txt"),
        ];
        let violations = check_entries(&entries, Path::new("/target"), 1);
        assert_eq!(
            violations,
            vec![
                Violation::ThroughSymlink {
                    entry: "pkg/sub/a/b".to_string(),
                    link: "sub/a".to_string(),
                },
                Violation::ThroughSymlink {
                    entry: "pkg/sub/a/b/escape.txt".to_string(),
                    link: "sub/a".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_check_paths_through_archive_symlinks() {
        let entries = [
            // Listed before the symlink it is written through.
            TarEntry::file("pkg/docs/notes.txt"),
            TarEntry::link(EntryKind::Symlink, "pkg/docs", "src"),
            TarEntry::link(EntryKind::Symlink, "pkg/here", "."),
            TarEntry::link(EntryKind::Symlink, "pkg/up", "here/.."),
            TarEntry::link(EntryKind::Symlink, "pkg/readme", "docs"),
        ];
        let violations = check_entries(&entries, Path::new("/target"), 1);
        assert_eq!(
            violations,
            vec![
                Violation::ThroughSymlink {
                    entry: "pkg/docs/notes.txt".to_string(),
                    link: "docs".to_string(),
                },
                Violation::ThroughSymlink {
                    entry: "pkg/up".to_string(),
                    link: "here".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_check_hard_links_through_symlinks() {
        let entries = [
            TarEntry::file("pkg/src/secret.txt"),
            TarEntry::link(EntryKind::Symlink, "pkg/docs", "src"),
            TarEntry::link(EntryKind::HardLink, "pkg/copy", "pkg/docs/secret.txt"),
            TarEntry::link(EntryKind::HardLink, "pkg/alias", "pkg/docs"),
            TarEntry::link(EntryKind::HardLink, "pkg/plain", "pkg/src/secret.txt"),
        ];
        let violations = check_entries(&entries, Path::new("/target"), 1);
        assert_eq!(violations.len(), 2, "{violations:?}");
        assert!(violations
            .iter()
            .all(|v| matches!(v, Violation::ThroughSymlink { link, .. } if link == "docs")));
    }

    #[test]
    fn test_check_hard_links() {
        let entries = [
            TarEntry::link(EntryKind::HardLink, "pkg/copy", "pkg/original"),
            TarEntry::link(EntryKind::HardLink, "pkg/evil", "pkg/../../etc/passwd"),
            TarEntry::link(EntryKind::HardLink, "pkg/root", "/etc/passwd"),
        ];
        let violations = check_entries(&entries, Path::new("/target"), 1);
        assert_eq!(violations.len(), 2);
        assert!(violations
            .iter()
            .all(|v| matches!(v, Violation::HardLinkEscape { .. })));
    }

    #[test]
    fn test_check_collects_all_violations() {
        let entries = [
            TarEntry::file("pkg/../../a"),
            TarEntry::file("pkg/ok.txt"),
            TarEntry::file("/abs"),
            TarEntry::link(EntryKind::Symlink, "pkg/l", "../../../x"),
        ];
        assert_eq!(check_entries(&entries, Path::new("/target"), 1).len(), 3);
    }

    #[test]
    fn test_parse_verbose_gnu() {
        let entry =
            parse_verbose_line("-rw-r--r-- user/group 12 2024-01-01 12:00 pkg/my file.txt").unwrap();
        assert_eq!(entry, TarEntry::file("pkg/my file.txt"));

        let entry = parse_verbose_line(
            "lrwxrwxrwx user/group 0 2024-01-01 12:00 pkg/link -> ../../etc/passwd",
        )
        .unwrap();
        assert_eq!(
            entry,
            TarEntry::link(EntryKind::Symlink, "pkg/link", "../../etc/passwd")
        );

        let entry =
            parse_verbose_line("hrw-r--r-- user/group 0 2024-01-01 12:00 pkg/h link to pkg/a")
                .unwrap();
        assert_eq!(entry, TarEntry::link(EntryKind::HardLink, "pkg/h", "pkg/a"));

        let entry = parse_verbose_line("drwxr-xr-x user/group 0 2024-01-01 12:00 pkg/").unwrap();
        assert_eq!(entry.kind, EntryKind::Directory);
        assert_eq!(entry.path, "pkg/");
    }

    #[test]
    fn test_parse_verbose_bsd() {
        let entry = parse_verbose_line(
            "lrwxr-xr-x  0 user  staff       0 Jan  1 09:30 pkg/link -> target.txt",
        )
        .unwrap();
        assert_eq!(
            entry,
            TarEntry::link(EntryKind::Symlink, "pkg/link", "target.txt")
        );

        let entry =
            parse_verbose_line("-rw-r--r--  0 user  staff     42 Jan  1 09:30 pkg/a.txt").unwrap();
        assert_eq!(entry, TarEntry::file("pkg/a.txt"));
    }

    #[test]
    fn test_validate_and_extract() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(
            dir.path(),
            &build_archive(
                &[("pkg/README.md", b"# readme"), ("pkg/src/main.txt", b"main")],
                &[("pkg/docs", "src")],
            ),
        );
        let target = dir.path().join("out");

        let result = validate(&archive, &target, 1);
        assert!(result.safe, "{:?}", result.violations);

        TarballValidator::new()
            .validate_for_extraction(&archive, &target)
            .unwrap()
            .extract()
            .unwrap();

        assert_eq!(fs::read_to_string(target.join("README.md")).unwrap(), "# readme");
        assert_eq!(fs::read_to_string(target.join("src/main.txt")).unwrap(), "main");
        assert!(fs::symlink_metadata(target.join("docs"))
            .unwrap()
            .file_type()
            .is_symlink());
    }

    #[test]
    fn test_validate_rejects_traversal_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(
            dir.path(),
            &raw_archive(&[
                raw_member(b"pkg/ok.txt", b'0', b"", b"fine"),
                raw_member(b"pkg/../../../etc/passwd", b'0', b"", b"evil"),
                raw_member(b"pkg/link", b'2', b"../../outside", b""),
            ]),
        );
        let target = dir.path().join("out");

        let result = validate(&archive, &target, 1);
        assert!(!result.safe);
        assert_eq!(result.violations.len(), 2);

        let err = TarballValidator::new()
            .validate_for_extraction(&archive, &target)
            .unwrap_err();
        assert!(matches!(err, DownloadError::UnsafeArchive { ref violations } if violations.len() == 2));
        assert!(!target.exists());
    }

    fn symlink_chain_archive() -> Vec<u8> {
        raw_archive(&[
            raw_member(b"pkg/sub/", b'5', b"", b""),
            raw_member(b"pkg/sub/a", b'2', b"..", b""),
            raw_member(b"pkg/sub/a/b", b'2', b"..", b""),
            raw_member(b"pkg/sub/a/b/escape.txt", b'0', b"", b"escaped"),
        ])
    }

    #[test]
    fn test_symlink_chain_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(dir.path(), &symlink_chain_archive());
        let target = dir.path().join("out");

        let result = validate(&archive, &target, 1);
        assert!(!result.safe);
        assert!(result
            .messages()
            .iter()
            .any(|m| m.contains("pkg/sub/a/b/escape.txt")));

        let err = TarballValidator::new()
            .validate_for_extraction(&archive, &target)
            .unwrap_err();
        assert!(matches!(err, DownloadError::UnsafeArchive { .. }));
        assert!(!target.exists());
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn test_extract_refuses_writes_through_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(dir.path(), &symlink_chain_archive());
        let target = dir.path().join("out");

        // Skips validation to exercise the on-disk checks alone.
        let unchecked = ValidatedArchive {
            archive: &archive,
            target_dir: target.clone(),
            strip_components: 1,
        };
        let err = unchecked.extract().unwrap_err();
        assert!(matches!(err, DownloadError::Extract { ref path, .. } if path.starts_with("sub/a/b")));
        assert!(!dir.path().join("escape.txt").exists());
        assert!(!dir.path().join("b").exists());
    }

    #[test]
    fn test_extract_refuses_hard_link_through_symlink() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("secret.txt"), "outside").unwrap();
        let archive = write_archive(
            dir.path(),
            &raw_archive(&[
                raw_member(b"pkg/parent", b'2', b"..", b""),
                raw_member(b"pkg/stolen", b'1', b"pkg/parent/secret.txt", b""),
            ]),
        );
        let target = dir.path().join("out");

        assert!(!validate(&archive, &target, 1).safe);

        let unchecked = ValidatedArchive {
            archive: &archive,
            target_dir: target.clone(),
            strip_components: 1,
        };
        let err = unchecked.extract().unwrap_err();
        assert!(matches!(err, DownloadError::Extract { ref path, .. } if path == "stolen"));
        assert!(!target.join("stolen").exists());
    }

    #[test]
    fn test_extract_replaces_symlink_at_destination() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("victim.txt"), "untouched").unwrap();
        let archive = write_archive(
            dir.path(),
            &raw_archive(&[
                raw_member(b"pkg/config", b'2', b"../victim.txt", b""),
                raw_member(b"pkg/config", b'0', b"", b"overwritten"),
            ]),
        );
        let target = dir.path().join("out");

        let unchecked = ValidatedArchive {
            archive: &archive,
            target_dir: target.clone(),
            strip_components: 1,
        };
        unchecked.extract().unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("victim.txt")).unwrap(),
            "untouched"
        );
        assert_eq!(fs::read_to_string(target.join("config")).unwrap(), "overwritten");
    }

    #[test]
    fn test_validate_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(dir.path(), b"definitely not gzip");

        let result = validate(&archive, &dir.path().join("out"), 1);
        assert!(!result.safe);
        assert!(matches!(
            result.violations[..],
            [Violation::ListingFailed { .. }]
        ));

        let missing = validate(&dir.path().join("missing.tar.gz"), dir.path(), 1);
        assert!(!missing.safe);
    }

    #[test]
    fn test_system_lister_missing_program_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(dir.path(), &build_archive(&[("pkg/a", b"a")], &[]));

        let result = TarballValidator::new()
            .with_lister(SystemTarLister::with_program("/nonexistent/quiver-tar"))
            .validate(&archive, &dir.path().join("out"));
        assert!(!result.safe);
    }

    #[test]
    fn test_wrapper_only_entries_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(
            dir.path(),
            &raw_archive(&[
                raw_member(b"pkg/", b'5', b"", b""),
                raw_member(b"pkg/file.txt", b'0', b"", b"data"),
            ]),
        );
        let target = dir.path().join("out");

        TarballValidator::new()
            .validate_for_extraction(&archive, &target)
            .unwrap()
            .extract()
            .unwrap();

        let names: Vec<_> = fs::read_dir(&target)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["file.txt".to_string()]);
    }
}
