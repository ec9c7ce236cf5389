//! Reproducible `.tar.gz` archives.
//!
//! Entries are written in sorted order with zeroed timestamps and ownership, so
//! the same input tree always produces a byte-identical archive.

use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::Compression;

use crate::error::UtilError;

/// A file to place into an archive under `name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArchiveEntry {
    /// Path inside the archive.
    pub name: PathBuf,
    /// File on disk.
    pub source: PathBuf,
}

/// A compiled set of glob patterns matched against relative paths.
///
/// A path is excluded when the path itself or any of its ancestor directories
/// matches, so `**/dex_builder` drops a whole `dex_builder` sub-tree.
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    patterns: Vec<glob::Pattern>,
}

impl ExcludeSet {
    /// Compile the given glob expressions.
    ///
    /// # Errors
    /// Returns an error if any pattern is not a valid glob.
    pub fn new(patterns: &[String]) -> Result<Self, UtilError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|e| UtilError::GlobPattern {
                    pattern: p.clone(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Whether `relative` (or one of its ancestors) matches a pattern.
    pub fn is_excluded(&self, relative: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let mut prefix = PathBuf::new();
        for component in relative.components() {
            prefix.push(component);
            if self.patterns.iter().any(|p| p.matches_path(&prefix)) {
                return true;
            }
        }
        false
    }
}

/// Collect every file under `root` as archive entries named relative to `root`,
/// skipping anything matched by `excludes`. Entries come back sorted.
///
/// # Errors
/// Returns an error if `root` cannot be walked.
pub fn collect_entries(root: &Path, excludes: &ExcludeSet) -> Result<Vec<ArchiveEntry>, UtilError> {
    let files = crate::fs::collect_files(root)?;
    let mut entries: Vec<ArchiveEntry> = files
        .into_iter()
        .filter_map(|source| {
            let name = source.strip_prefix(root).ok()?.to_path_buf();
            if excludes.is_excluded(&name) {
                tracing::debug!("excluding {} from archive", name.display());
                return None;
            }
            Some(ArchiveEntry { name, source })
        })
        .collect();
    entries.sort();
    Ok(entries)
}

/// Write `entries` to a gzip-compressed tarball at `dest`.
///
/// The archive is written to a temporary sibling and renamed into place, so `dest`
/// is either absent or complete.
///
/// # Errors
/// Returns an error if any entry cannot be read or the archive cannot be written.
pub fn write_tar_gz(dest: &Path, entries: &[ArchiveEntry]) -> Result<(), UtilError> {
    if let Some(parent) = dest.parent() {
        crate::fs::ensure_dir(parent)?;
    }

    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = dest.with_file_name(format!(".{file_name}.tmp-{}", std::process::id()));

    let result = write_entries(&tmp_path, entries).and_then(|()| {
        std::fs::rename(&tmp_path, dest).map_err(|source| UtilError::Io {
            path: dest.display().to_string(),
            source,
        })
    });
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result
}

fn write_entries(path: &Path, entries: &[ArchiveEntry]) -> Result<(), UtilError> {
    let io_err = |source: std::io::Error| UtilError::Io {
        path: path.display().to_string(),
        source,
    };

    let file = File::create(path).map_err(io_err)?;
    let gz = flate2::GzBuilder::new()
        .mtime(0)
        .write(file, Compression::default());
    let mut builder = tar::Builder::new(gz);

    let mut sorted: Vec<&ArchiveEntry> = entries.iter().collect();
    sorted.sort();

    for entry in sorted {
        let source = File::open(&entry.source).map_err(|source| UtilError::Io {
            path: entry.source.display().to_string(),
            source,
        })?;
        let len = source
            .metadata()
            .map_err(|e| UtilError::Io {
                path: entry.source.display().to_string(),
                source: e,
            })?
            .len();

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(len);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        builder
            .append_data(&mut header, &entry.name, source)
            .map_err(io_err)?;
    }

    let gz = builder.into_inner().map_err(io_err)?;
    gz.finish().map_err(io_err)?;
    Ok(())
}

/// List the entry names stored in a `.tar.gz`, in archive order.
///
/// # Errors
/// Returns an error if the archive cannot be opened or decoded.
pub fn list_tar_gz(path: &Path) -> Result<Vec<PathBuf>, UtilError> {
    let io_err = |source: std::io::Error| UtilError::Io {
        path: path.display().to_string(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
    let mut names = Vec::new();
    for entry in archive.entries().map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        names.push(entry.path().map_err(io_err)?.into_owned());
    }
    Ok(names)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use super::*;

    fn symbols_tree(root: &Path) {
        for abi in ["arm64-v8a", "x86"] {
            let dir = root.join(abi);
            fs::create_dir_all(dir.join("dex_builder")).unwrap();
            fs::write(dir.join("liblsplant.so.dbg"), abi.as_bytes()).unwrap();
            fs::write(dir.join("dex_builder").join("libdex_builder.so.dbg"), b"x").unwrap();
        }
    }

    #[test]
    fn exclude_matches_subtree() {
        let set = ExcludeSet::new(&["**/dex_builder".to_owned()]).unwrap();
        assert!(set.is_excluded(Path::new("x86/dex_builder/libdex_builder.so.dbg")));
        assert!(!set.is_excluded(Path::new("x86/liblsplant.so.dbg")));
    }

    #[test]
    fn empty_exclude_set_keeps_everything() {
        let set = ExcludeSet::default();
        assert!(!set.is_excluded(Path::new("x86/dex_builder/a")));
    }

    #[test]
    fn invalid_pattern_errors() {
        let err = ExcludeSet::new(&["[".to_owned()]).unwrap_err().to_string();
        assert!(err.contains("invalid glob pattern"), "error was: {err}");
    }

    #[test]
    fn collect_entries_applies_excludes() {
        let tmp = tempfile::tempdir().unwrap();
        symbols_tree(tmp.path());
        let set = ExcludeSet::new(&["**/dex_builder".to_owned()]).unwrap();

        let entries = collect_entries(tmp.path(), &set).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.clone()).collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("arm64-v8a/liblsplant.so.dbg"),
                PathBuf::from("x86/liblsplant.so.dbg"),
            ]
        );
    }

    #[test]
    fn archive_lists_entries() {
        let tmp = tempfile::tempdir().unwrap();
        symbols_tree(tmp.path());
        let entries = collect_entries(tmp.path(), &ExcludeSet::default()).unwrap();

        let dest = tmp.path().join("out").join("symbols.tar.gz");
        write_tar_gz(&dest, &entries).unwrap();

        let names = list_tar_gz(&dest).unwrap();
        assert_eq!(names.len(), 4);
        assert!(names.contains(&PathBuf::from("x86/dex_builder/libdex_builder.so.dbg")));
    }

    #[test]
    fn archive_is_reproducible() {
        let tmp = tempfile::tempdir().unwrap();
        symbols_tree(tmp.path());
        let entries = collect_entries(tmp.path(), &ExcludeSet::default()).unwrap();

        let a = tmp.path().join("a.tar.gz");
        let b = tmp.path().join("b.tar.gz");
        write_tar_gz(&a, &entries).unwrap();
        let mut reversed = entries.clone();
        reversed.reverse();
        write_tar_gz(&b, &reversed).unwrap();

        assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
    }

    #[test]
    fn failed_write_leaves_nothing_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("broken.tar.gz");
        let entries = vec![ArchiveEntry {
            name: PathBuf::from("missing.dbg"),
            source: tmp.path().join("does-not-exist"),
        }];

        assert!(write_tar_gz(&dest, &entries).is_err());
        assert!(!dest.exists());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
