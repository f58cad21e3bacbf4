use std::path::{Component, Path, PathBuf};

use crate::TransferError;

/// Validates a resolved destination path.
///
/// Rejects:
/// - Relative paths
/// - Parent directory traversal (`..`)
/// - Paths without a final file name (`/`, `/tmp/..`)
pub fn validate_destination_path(path: &Path) -> Result<(), TransferError> {
    if path.as_os_str().is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    if !path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "relative path not allowed: {}",
            path.display()
        )));
    }

    for component in path.components() {
        if component == Component::ParentDir {
            return Err(TransferError::InvalidPath(format!(
                "parent directory traversal not allowed: {}",
                path.display()
            )));
        }
    }

    if path.file_name().is_none() {
        return Err(TransferError::InvalidPath(format!(
            "path has no file name: {}",
            path.display()
        )));
    }

    Ok(())
}

/// Ensures `path` lies strictly below `root`.
///
/// Besides the lexical check, the deepest existing directory above
/// `path` is canonicalized, so a symlink inside `root` cannot lead the
/// upload elsewhere. The file itself is not followed: the final rename
/// replaces a symlink at the destination rather than writing through it.
pub fn ensure_within_root(path: &Path, root: &Path) -> Result<(), TransferError> {
    let outside = || {
        TransferError::InvalidPath(format!(
            "{} is outside the upload root {}",
            path.display(),
            root.display()
        ))
    };

    if path == root || !path.starts_with(root) {
        return Err(outside());
    }

    let Some((dir, real_dir)) = deepest_existing_dir(path)? else {
        return Ok(());
    };
    // Everything below `root` is still missing; nothing to follow yet.
    if !dir.starts_with(root) {
        return Ok(());
    }
    let real_root = std::fs::canonicalize(root)?;
    if !real_dir.starts_with(&real_root) {
        return Err(outside());
    }
    Ok(())
}

/// Returns the closest existing ancestor directory of `path` together
/// with its canonical form.
fn deepest_existing_dir(path: &Path) -> Result<Option<(PathBuf, PathBuf)>, TransferError> {
    let Some(parent) = path.parent() else {
        return Ok(None);
    };
    for dir in parent.ancestors() {
        match std::fs::canonicalize(dir) {
            Ok(real) => return Ok(Some((dir.to_path_buf(), real))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(None)
}
