//! Semantic version helpers.
//!
//! Registry tags and package versions are plain strings; only those that parse
//! as strict semver (no leading `v`) take part in ordering. Everything else is
//! dropped by the filtering helpers.

use std::cmp::Ordering;

use semver::Version;

/// Returns `true` if `version` is a valid semantic version.
///
/// A leading `v` (as in `v1.2.3`) is rejected.
///
/// # Examples
///
/// ```
/// use quiver_utils::version::is_valid_version;
///
/// assert!(is_valid_version("1.2.3"));
/// assert!(is_valid_version("1.0.0-beta.1"));
/// assert!(!is_valid_version("v1.2.3"));
/// assert!(!is_valid_version("latest"));
/// ```
pub fn is_valid_version(version: &str) -> bool {
    parse(version).is_some()
}

/// Compares two version strings by semver precedence.
///
/// Invalid versions sort below every valid one and compare equal among
/// themselves, so callers can sort mixed lists without failing.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse(a), parse(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Keeps only the valid semantic versions, preserving input order.
pub fn filter_valid_versions<I, S>(versions: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    versions
        .into_iter()
        .filter(|v| is_valid_version(v.as_ref()))
        .map(|v| v.as_ref().to_string())
        .collect()
}

/// Returns the valid versions sorted from highest to lowest, without duplicates.
///
/// # Examples
///
/// ```
/// use quiver_utils::version::sort_versions_desc;
///
/// let sorted = sort_versions_desc(["1.0.0", "latest", "main", "2.0.0"]);
/// assert_eq!(sorted, vec!["2.0.0", "1.0.0"]);
/// ```
pub fn sort_versions_desc<I, S>(versions: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parsed: Vec<Version> = versions
        .into_iter()
        .filter_map(|v| parse(v.as_ref()))
        .collect();
    parsed.sort_by(|a, b| b.cmp(a));
    parsed.dedup();
    parsed.iter().map(Version::to_string).collect()
}

/// Returns the highest valid version, if any.
pub fn highest_version<I, S>(versions: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    versions
        .into_iter()
        .filter_map(|v| parse(v.as_ref()))
        .max()
        .map(|v| v.to_string())
}

fn parse(version: &str) -> Option<Version> {
    if version.starts_with(['v', 'V']) {
        return None;
    }
    Version::parse(version).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_version() {
        assert!(is_valid_version("0.1.0"));
        assert!(is_valid_version("10.20.30"));
        assert!(is_valid_version("1.0.0+build.5"));
        assert!(!is_valid_version("v1.0.0"));
        assert!(!is_valid_version("V1.0.0"));
        assert!(!is_valid_version("1.0"));
        assert!(!is_valid_version(""));
        assert!(!is_valid_version("main"));
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.0.0", "2.0.0"), Ordering::Less);
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0-alpha", "1.0.0"), Ordering::Less);
        assert_eq!(compare_versions("1.0.0", "latest"), Ordering::Greater);
        assert_eq!(compare_versions("main", "latest"), Ordering::Equal);
    }

    #[test]
    fn test_sort_versions_desc_drops_tags() {
        let sorted = sort_versions_desc(["1.0.0", "latest", "main", "2.0.0"]);
        assert_eq!(sorted, vec!["2.0.0".to_string(), "1.0.0".to_string()]);
    }

    #[test]
    fn test_sort_versions_desc_prerelease_and_dupes() {
        let sorted = sort_versions_desc(["1.0.0-rc.1", "1.0.0", "0.9.0", "1.0.0"]);
        assert_eq!(sorted, vec!["1.0.0", "1.0.0-rc.1", "0.9.0"]);
    }

    #[test]
    fn test_highest_version() {
        assert_eq!(
            highest_version(["1.2.0", "1.10.0", "v9.0.0", "1.9.9"]),
            Some("1.10.0".to_string())
        );
        assert_eq!(highest_version(["latest", "main"]), None);
        assert_eq!(highest_version(Vec::<String>::new()), None);
    }

    #[test]
    fn test_filter_valid_versions_keeps_order() {
        assert_eq!(
            filter_valid_versions(["2.0.0", "edge", "1.0.0"]),
            vec!["2.0.0", "1.0.0"]
        );
    }
}
