use std::{fs, path::Path};

use crate::error::{FileSystemError, FileSystemResult};

/// Removes the specified file or directory.
///
/// A missing path is not an error. Directories are removed recursively.
///
/// # Errors
///
/// Returns a [`FileSystemError::File`] if the removal fails for any reason other than
/// the path not existing.
pub fn safe_remove<P: AsRef<Path>>(path: P) -> FileSystemResult<()> {
    let path = path.as_ref();

    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(FileSystemError::File {
                path: path.to_path_buf(),
                action: "inspect",
                source: err,
            })
        }
    };

    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    result.map_err(|err| FileSystemError::File {
        path: path.to_path_buf(),
        action: "remove",
        source: err,
    })
}

/// Creates a directory structure if it doesn't exist.
///
/// # Errors
///
/// * [`FileSystemError::Directory`] if the directory could not be created.
/// * [`FileSystemError::NotADirectory`] if the path exists but is not a directory.
pub fn ensure_dir_exists<P: AsRef<Path>>(path: P) -> FileSystemResult<()> {
    let path = path.as_ref();
    if !path.exists() {
        fs::create_dir_all(path).map_err(|err| FileSystemError::Directory {
            path: path.to_path_buf(),
            action: "create",
            source: err,
        })?;
    } else if !path.is_dir() {
        return Err(FileSystemError::NotADirectory {
            path: path.to_path_buf(),
        });
    }

    Ok(())
}

/// Moves every top-level entry of `from` into `to`, replacing entries with the same name.
///
/// Both directories must live on the same filesystem; entries are renamed, not copied.
pub fn move_dir_contents<P: AsRef<Path>, Q: AsRef<Path>>(from: P, to: Q) -> FileSystemResult<()> {
    let from = from.as_ref();
    let to = to.as_ref();

    ensure_dir_exists(to)?;

    let entries = fs::read_dir(from).map_err(|err| FileSystemError::Directory {
        path: from.to_path_buf(),
        action: "read",
        source: err,
    })?;

    for entry in entries {
        let entry = entry.map_err(|err| FileSystemError::Directory {
            path: from.to_path_buf(),
            action: "read",
            source: err,
        })?;
        let dest = to.join(entry.file_name());
        safe_remove(&dest)?;
        fs::rename(entry.path(), &dest).map_err(|err| FileSystemError::File {
            path: entry.path(),
            action: "move",
            source: err,
        })?;
    }

    Ok(())
}
