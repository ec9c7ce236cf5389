//! Per-variant debug symbol archives.

use std::path::{Path, PathBuf};

use abipack_targets::Abi;
use abipack_util::archive::{collect_entries, write_tar_gz, ArchiveEntry, ExcludeSet};

use crate::driver::{BuildOutput, MatrixResult};
use crate::error::PackagingError;
use crate::layout::BuildLayout;

/// A packaged set of debug symbols for one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolArchive {
    pub variant: String,
    /// Artifact (or package) the archive is named after.
    pub owner: String,
    pub path: PathBuf,
    /// Glob patterns that were left out.
    pub excluded_subtrees: Vec<String>,
    /// Number of files in the archive.
    pub file_count: usize,
}

/// Collect this run's symbol directories for `variant` into
/// `<owner>-<variant>-symbols.tar.gz`, each under its ABI name.
///
/// Nothing is written unless every ABI in `expected` was built, and built
/// successfully, in `result`. Leftovers from earlier runs are never picked up.
///
/// # Errors
/// Returns `PackagingError::IncompleteBuild` naming the failed ABIs,
/// `PackagingError::PartialAbis` naming ABIs this run did not build,
/// `PackagingError::NotBuilt` if the variant has no outputs, or
/// `PackagingError::Write` if the archive cannot be written.
pub fn package(
    result: &MatrixResult,
    layout: &BuildLayout,
    variant: &str,
    expected: &[Abi],
    owner: &str,
    excludes: &[String],
) -> Result<SymbolArchive, PackagingError> {
    let mut outputs: Vec<&BuildOutput> = result.variant_outputs(variant).collect();
    if outputs.is_empty() {
        return Err(PackagingError::NotBuilt {
            variant: variant.to_owned(),
        });
    }
    let failed = result.failed_abis(variant);
    if !failed.is_empty() {
        return Err(PackagingError::IncompleteBuild {
            variant: variant.to_owned(),
            failed,
        });
    }
    let missing: Vec<Abi> = expected
        .iter()
        .copied()
        .filter(|abi| !outputs.iter().any(|o| o.abi == *abi))
        .collect();
    if !missing.is_empty() {
        return Err(PackagingError::PartialAbis {
            variant: variant.to_owned(),
            missing,
        });
    }

    let write_err = |message: String| PackagingError::Write {
        variant: variant.to_owned(),
        message,
    };

    let exclude_set = ExcludeSet::new(excludes).map_err(|e| write_err(e.to_string()))?;
    outputs.sort_by_key(|o| o.abi);
    let mut entries = Vec::new();
    for output in outputs {
        let found = collect_entries(&output.symbols_dir, &ExcludeSet::default())
            .map_err(|e| write_err(e.to_string()))?;
        if found.is_empty() {
            tracing::warn!("{variant}/{}: no debug symbols found in {}", output.abi, output.symbols_dir.display());
        }
        for entry in found {
            let name = Path::new(output.abi.as_str()).join(&entry.name);
            if exclude_set.is_excluded(&name) {
                tracing::debug!("excluding {} from symbol archive", name.display());
                continue;
            }
            entries.push(ArchiveEntry {
                name,
                source: entry.source,
            });
        }
    }
    entries.sort();

    let path = layout.symbol_archive(owner, variant);
    write_tar_gz(&path, &entries).map_err(|e| write_err(e.to_string()))?;
    tracing::info!(
        "packaged {} symbol file(s) for {variant} into {}",
        entries.len(),
        path.display()
    );

    Ok(SymbolArchive {
        variant: variant.to_owned(),
        owner: owner.to_owned(),
        path,
        excluded_subtrees: excludes.to_vec(),
        file_count: entries.len(),
    })
}
