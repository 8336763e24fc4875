//! Path confinement for untrusted strings (archive entry names, manifest
//! paths, image references) becoming filesystem paths.
//!
//! Unlike a canonicalize-based check, this works on paths that may not yet
//! exist on disk, since it never stats the filesystem: it walks path
//! components and rejects anything that would escape the root after
//! normalization.

use crate::error::CoreError;
use std::path::{Component, Path, PathBuf};

/// Normalize `p`, rejecting absolute paths and any `..` that would escape
/// the leading position (i.e. the path must stay relative and confined).
pub fn clean_relative_path(p: &str) -> Result<PathBuf, CoreError> {
    let path = Path::new(p);
    let mut out = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return Err(CoreError::Unsafe(format!(
                        "path escapes its root: {p:?}"
                    )));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(CoreError::Unsafe(format!("absolute path rejected: {p:?}")));
            }
        }
    }

    if out.as_os_str().is_empty() {
        return Err(CoreError::Unsafe(format!("empty path rejected: {p:?}")));
    }

    Ok(out)
}

/// Join `untrusted` under `root`, after cleaning, rejecting any result that
/// would escape `root`.
pub fn safe_join_under(root: &Path, untrusted: &str) -> Result<PathBuf, CoreError> {
    let cleaned = clean_relative_path(untrusted)?;
    let joined = root.join(&cleaned);

    let root_components: Vec<_> = root.components().collect();
    let joined_components: Vec<_> = joined.components().collect();

    if joined_components.len() < root_components.len()
        || !root_components
            .iter()
            .zip(joined_components.iter())
            .all(|(a, b)| a == b)
    {
        return Err(CoreError::Unsafe(format!(
            "{untrusted:?} escapes root {root:?}"
        )));
    }

    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_relative_path_rejects_absolute() {
        assert!(clean_relative_path("/etc/passwd").is_err());
    }

    #[test]
    fn clean_relative_path_rejects_traversal_above_root() {
        assert!(clean_relative_path("../../etc/passwd").is_err());
        assert!(clean_relative_path("a/../../b").is_err());
    }

    #[test]
    fn clean_relative_path_normalizes_internal_traversal() {
        let out = clean_relative_path("a/b/../c").unwrap();
        assert_eq!(out, PathBuf::from("a/c"));
    }

    #[test]
    fn clean_relative_path_rejects_empty() {
        assert!(clean_relative_path("").is_err());
        assert!(clean_relative_path(".").is_err());
    }

    #[test]
    fn safe_join_under_confines_result() {
        let root = Path::new("/data/root");
        let joined = safe_join_under(root, "epel/repodata/repomd.xml").unwrap();
        assert_eq!(joined, PathBuf::from("/data/root/epel/repodata/repomd.xml"));
    }

    #[test]
    fn safe_join_under_rejects_traversal() {
        let root = Path::new("/data/root");
        assert!(safe_join_under(root, "../../etc/passwd").is_err());
    }

    #[test]
    fn safe_join_under_rejects_absolute_untrusted() {
        let root = Path::new("/data/root");
        assert!(safe_join_under(root, "/etc/passwd").is_err());
    }

    #[test]
    fn safe_join_under_works_on_nonexistent_paths() {
        // Must not require the path to exist on disk.
        let root = Path::new("/does/not/exist/anywhere");
        let joined = safe_join_under(root, "provider/new-file.bin").unwrap();
        assert_eq!(
            joined,
            PathBuf::from("/does/not/exist/anywhere/provider/new-file.bin")
        );
    }
}
