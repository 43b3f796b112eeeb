//! Filesystem helpers shared across modules.
//!
//! Every error carries the operation and the path it failed on.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::error::{Result, StowageError};

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| StowageError::io("creating directory", path, e))
}

/// Ensure the parent directory of a file path exists.
pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    ensure_dir_all(parent).await
}

/// Sibling path used while a file is being written: `video1.m4s` -> `video1.m4s.part`.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// Writes `contents` to a temporary sibling and renames it over `path`, so
/// readers only ever see the old or the new file.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    ensure_parent_dir(path).await?;
    let tmp = partial_path(path);

    let mut file = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| StowageError::io("creating file", &tmp, e))?;
    file.write_all(contents)
        .await
        .map_err(|e| StowageError::io("writing file", &tmp, e))?;
    file.sync_all()
        .await
        .map_err(|e| StowageError::io("syncing file", &tmp, e))?;
    drop(file);

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StowageError::io("renaming file", path, e))
}

/// Removes a file, treating "already gone" as success.
pub async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StowageError::io("removing file", path, e)),
    }
}
