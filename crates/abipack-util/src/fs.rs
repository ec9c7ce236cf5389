//! Filesystem utilities for abipack.

use std::path::{Path, PathBuf};

use crate::error::UtilError;

/// Create a directory and all parent directories if they do not exist.
///
/// # Errors
/// Returns an error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> Result<(), UtilError> {
    std::fs::create_dir_all(path).map_err(|source| UtilError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Copy `src` to `dest`, creating parent directories and replacing any existing file.
///
/// # Errors
/// Returns an error if the parent cannot be created or the copy fails.
pub fn copy_file(src: &Path, dest: &Path) -> Result<(), UtilError> {
    if let Some(parent) = dest.parent() {
        ensure_dir(parent)?;
    }
    std::fs::copy(src, dest).map_err(|source| UtilError::Io {
        path: dest.display().to_string(),
        source,
    })?;
    Ok(())
}

/// Recursively copy every file under `src` into `dest`, preserving relative paths.
///
/// Returns the number of files copied.
///
/// # Errors
/// Returns an error if `src` cannot be read or any file cannot be copied.
pub fn copy_dir_all(src: &Path, dest: &Path) -> Result<usize, UtilError> {
    let files = collect_files(src)?;
    for file in &files {
        let relative = file.strip_prefix(src).unwrap_or(file);
        copy_file(file, &dest.join(relative))?;
    }
    Ok(files.len())
}

/// Write `contents` to `path` atomically (write-to-temp-then-rename).
///
/// # Errors
/// Returns an error if the temp file cannot be written or renamed into place.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), UtilError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp-{}", std::process::id()));
    std::fs::write(&tmp_path, contents).map_err(|source| UtilError::Io {
        path: tmp_path.display().to_string(),
        source,
    })?;
    std::fs::rename(&tmp_path, path).map_err(|source| {
        let _ = std::fs::remove_file(&tmp_path);
        UtilError::Io {
            path: path.display().to_string(),
            source,
        }
    })
}

/// Remove a directory and all its contents. No error if the directory is absent.
///
/// # Errors
/// Returns an error if the directory exists but cannot be removed.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<(), UtilError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(UtilError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Collect every regular file under `dir`, recursively, sorted by path.
///
/// A missing `dir` yields an empty list.
///
/// # Errors
/// Returns an error if `dir` exists but cannot be read.
pub fn collect_files(dir: &Path) -> Result<Vec<PathBuf>, UtilError> {
    let mut files = Vec::new();
    if dir.is_dir() {
        collect_files_recursive(dir, &mut files)?;
    }
    files.sort();
    Ok(files)
}

fn collect_files_recursive(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), UtilError> {
    let entries = std::fs::read_dir(dir).map_err(|source| UtilError::Io {
        path: dir.display().to_string(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| UtilError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let path = entry.path();

        if path.is_dir() {
            collect_files_recursive(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }

    Ok(())
}

/// Check that `relative` is a relative path that never climbs above its root.
///
/// `a/../b` is accepted (it stays inside), `../a` and `a/../../b` are not.
pub fn is_contained_relative(relative: &Path) -> bool {
    if relative.as_os_str().is_empty() {
        return false;
    }
    let mut depth: usize = 0;
    for component in relative.components() {
        match component {
            std::path::Component::Normal(_) => depth = depth.saturating_add(1),
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                let Some(up) = depth.checked_sub(1) else {
                    return false;
                };
                depth = up;
            }
            std::path::Component::RootDir | std::path::Component::Prefix(_) => return false,
        }
    }
    true
}
