//! Path Guard
//!
//! The single containment check for every filesystem access made by the
//! transfer and sync core. A caller hands in a root directory and a path
//! relative to it; the guard canonicalizes both (following symlinks, `..`
//! and redundant separators) and refuses anything that does not land on the
//! root itself or a descendant of it.
//!
//! The candidate does not have to exist. Components that are missing on disk
//! are appended lexically after the deepest existing ancestor has been
//! canonicalized, so a new upload destination below a symlinked directory is
//! still checked against where the symlink really points.

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, TransferError};

/// Resolve `relative_path` against `root` and verify containment.
///
/// Returns the canonical path on success, `AccessDenied` if the result
/// escapes the root, and `NotFound` if the root itself does not exist.
pub fn resolve(relative_path: &str, root: &Path) -> Result<PathBuf> {
    let root = canonical_root(root)?;
    resolve_within(relative_path, &root)
}

/// Async variant of [`resolve`] that runs the filesystem probing on the
/// blocking pool.
pub async fn resolve_async(relative_path: &str, root: &Path) -> Result<PathBuf> {
    let relative_path = relative_path.to_string();
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || resolve(&relative_path, &root))
        .await
        .map_err(|e| TransferError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))?
}

/// Canonicalize a root directory.
pub fn canonical_root(root: &Path) -> Result<PathBuf> {
    root.canonicalize().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            TransferError::NotFound(format!("root directory {}", root.display()))
        } else {
            TransferError::Io(e)
        }
    })
}

/// Resolve against a root that is already canonical.
pub fn resolve_within(relative_path: &str, canonical_root: &Path) -> Result<PathBuf> {
    let relative = relative_path.trim();
    let mut resolved = canonical_root.to_path_buf();
    // Number of trailing components of `resolved` that do not exist on disk
    let mut missing = 0usize;

    for component in Path::new(relative).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
                missing = missing.saturating_sub(1);
            }
            Component::Normal(part) => {
                let next = resolved.join(part);
                if missing > 0 || !resolved.is_dir() {
                    resolved = next;
                    missing += 1;
                    continue;
                }

                resolved = match std::fs::symlink_metadata(&next) {
                    Ok(meta) if meta.file_type().is_symlink() => {
                        next.canonicalize().map_err(|_| {
                            TransferError::AccessDenied(format!(
                                "symlink target missing or invalid: {relative}"
                            ))
                        })?
                    }
                    Ok(_) => next,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        missing += 1;
                        next
                    }
                    Err(e) => return Err(TransferError::Io(e)),
                };
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(TransferError::AccessDenied(format!(
                    "absolute paths are not allowed: {relative}"
                )));
            }
        }
    }

    if !resolved.starts_with(canonical_root) {
        tracing::warn!(path = %relative, "Path escapes root directory");
        return Err(TransferError::AccessDenied(format!(
            "path is outside the root directory: {relative}"
        )));
    }

    Ok(resolved)
}

/// Render a path below `canonical_root` as a `/`-separated relative string.
pub fn relative_display(path: &Path, canonical_root: &Path) -> String {
    path.strip_prefix(canonical_root)
        .unwrap_or(path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("user");
        std::fs::create_dir_all(root.join("docs")).unwrap();
        std::fs::write(root.join("docs/a.txt"), b"a").unwrap();
        (temp, root)
    }

    #[test]
    fn test_resolves_existing_file() {
        let (_temp, root) = setup();
        let resolved = resolve("docs/a.txt", &root).unwrap();
        assert_eq!(resolved, root.canonicalize().unwrap().join("docs/a.txt"));
    }

    #[test]
    fn test_empty_path_is_root() {
        let (_temp, root) = setup();
        assert_eq!(resolve("", &root).unwrap(), root.canonicalize().unwrap());
        assert_eq!(resolve("  ./ ", &root).unwrap(), root.canonicalize().unwrap());
    }

    #[test]
    fn test_missing_leaf_is_allowed() {
        let (_temp, root) = setup();
        let resolved = resolve("docs/new/deeper/b.txt", &root).unwrap();
        assert!(resolved.ends_with("docs/new/deeper/b.txt"));
    }

    #[test]
    fn test_traversal_is_denied() {
        let (_temp, root) = setup();
        for path in ["../other", "docs/../../etc/passwd", "../../../etc/passwd", "new/../../x"] {
            let result = resolve(path, &root);
            assert!(
                matches!(result, Err(TransferError::AccessDenied(_))),
                "{path} should be denied"
            );
        }
    }

    #[test]
    fn test_inner_parent_segments_are_fine() {
        let (_temp, root) = setup();
        let resolved = resolve("docs/../docs//a.txt", &root).unwrap();
        assert!(resolved.ends_with("docs/a.txt"));
    }

    #[test]
    fn test_sibling_with_common_prefix_is_denied() {
        let (temp, root) = setup();
        std::fs::create_dir_all(temp.path().join("user2")).unwrap();
        let result = resolve("../user2/x", &root);
        assert!(matches!(result, Err(TransferError::AccessDenied(_))));
    }

    #[test]
    fn test_absolute_path_is_denied() {
        let (_temp, root) = setup();
        let result = resolve("/etc/passwd", &root);
        assert!(matches!(result, Err(TransferError::AccessDenied(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_denied() {
        let (temp, root) = setup();
        let outside = temp.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        let result = resolve("link/secret.txt", &root);
        assert!(matches!(result, Err(TransferError::AccessDenied(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_root_is_allowed() {
        let (_temp, root) = setup();
        std::os::unix::fs::symlink(root.join("docs"), root.join("alias")).unwrap();

        let resolved = resolve("alias/a.txt", &root).unwrap();
        assert_eq!(resolved, root.canonicalize().unwrap().join("docs/a.txt"));
    }

    #[test]
    fn test_missing_root() {
        let temp = TempDir::new().unwrap();
        let result = resolve("a", &temp.path().join("nope"));
        assert!(matches!(result, Err(TransferError::NotFound(_))));
    }

    #[test]
    fn test_relative_display() {
        let (_temp, root) = setup();
        let root = root.canonicalize().unwrap();
        assert_eq!(relative_display(&root.join("docs/a.txt"), &root), "docs/a.txt");
        assert_eq!(relative_display(&root, &root), "");
    }
}
