//! On-disk layout of a run's build directory.
//!
//! ```text
//! <build_dir>/
//!   intermediates/<variant>/<abi>/      CMake tree and linked libraries, one per pair
//!   symbols/<variant>/<abi>/            split debug symbols, one per pair
//!   outputs/prefab/<variant>/prefab/    Prefab package for the variant
//!   outputs/symbols/<owner>-<variant>-symbols.tar.gz
//!   outputs/publications/<artifact>/    files handed to the publisher
//! ```
//!
//! Variant names are restricted to path-safe characters and ABI names are fixed,
//! so the (variant, ABI) to directory mapping is one-to-one.

use std::path::{Path, PathBuf};

use abipack_targets::Abi;
use abipack_util::error::UtilError;

/// Paths under one run's build directory.
#[derive(Debug, Clone)]
pub struct BuildLayout {
    root: PathBuf,
}

impl BuildLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Exclusively owned intermediates directory of one pair.
    pub fn intermediates_dir(&self, variant: &str, abi: Abi) -> PathBuf {
        self.root
            .join("intermediates")
            .join(variant)
            .join(abi.as_str())
    }

    /// Exclusively owned symbols directory of one pair.
    pub fn symbols_dir(&self, variant: &str, abi: Abi) -> PathBuf {
        self.variant_symbols_dir(variant).join(abi.as_str())
    }

    /// All symbols of a variant, one sub-directory per ABI.
    pub fn variant_symbols_dir(&self, variant: &str) -> PathBuf {
        self.root.join("symbols").join(variant)
    }

    fn outputs_dir(&self) -> PathBuf {
        self.root.join("outputs")
    }

    /// Root of the variant's Prefab package (the directory containing `prefab/`).
    pub fn prefab_package_dir(&self, variant: &str) -> PathBuf {
        self.outputs_dir().join("prefab").join(variant)
    }

    /// The symbol archive of `variant` owned by `owner`.
    pub fn symbol_archive(&self, owner: &str, variant: &str) -> PathBuf {
        self.outputs_dir()
            .join("symbols")
            .join(format!("{owner}-{variant}-symbols.tar.gz"))
    }

    /// Staging directory for an artifact's published files.
    pub fn publication_dir(&self, artifact: &str) -> PathBuf {
        self.outputs_dir().join("publications").join(artifact)
    }

    /// Remove a pair's previous outputs so a rebuild starts clean.
    ///
    /// Only this pair's intermediates and symbols are touched.
    ///
    /// # Errors
    /// Returns an error if an existing directory cannot be removed.
    pub fn clear_pair(&self, variant: &str, abi: Abi) -> Result<(), UtilError> {
        abipack_util::fs::remove_dir_all_if_exists(&self.intermediates_dir(variant, abi))?;
        abipack_util::fs::remove_dir_all_if_exists(&self.symbols_dir(variant, abi))
    }
}
