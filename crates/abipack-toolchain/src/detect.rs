//! NDK and CMake detection.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::ToolchainError;

/// Path of the NDK's CMake toolchain file, relative to the NDK root.
pub const ANDROID_TOOLCHAIN_FILE: &str = "build/cmake/android.toolchain.cmake";

/// Information about a detected Android NDK.
#[derive(Debug, Clone)]
pub struct NdkInfo {
    /// NDK root directory.
    pub path: PathBuf,
    /// Full revision from `source.properties`, e.g. `"26.1.10909125"`.
    pub revision: String,
}

impl NdkInfo {
    /// The major NDK release, e.g. `26` for `"26.1.10909125"`.
    pub fn major(&self) -> Option<u32> {
        self.revision.split('.').next()?.parse().ok()
    }

    /// Absolute path of the CMake toolchain file.
    pub fn toolchain_file(&self) -> PathBuf {
        self.path.join(ANDROID_TOOLCHAIN_FILE)
    }
}

/// Information about a detected `cmake` installation.
#[derive(Debug, Clone)]
pub struct CmakeInfo {
    /// Path to the `cmake` binary.
    pub path: PathBuf,
    /// Parsed version, e.g. `"3.22.1"`.
    pub version: String,
}

/// Locate the Android NDK and read its revision.
///
/// Resolution order:
/// 1. the configured path (`[toolchain] ndk`)
/// 2. `ANDROID_NDK_HOME`
/// 3. `ANDROID_NDK_ROOT`
///
/// # Errors
/// Returns an error if no NDK is found, or the directory lacks the CMake
/// toolchain file or a readable `source.properties`.
pub fn detect_ndk(configured: Option<&Path>) -> Result<NdkInfo, ToolchainError> {
    let path = resolve_ndk_path(configured, |key| std::env::var(key).ok())
        .ok_or(ToolchainError::NdkNotFound)?;
    inspect_ndk(&path)
}

fn resolve_ndk_path(
    configured: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Option<PathBuf> {
    if let Some(path) = configured {
        return Some(path.to_path_buf());
    }
    ["ANDROID_NDK_HOME", "ANDROID_NDK_ROOT"]
        .into_iter()
        .filter_map(env)
        .find(|value| !value.trim().is_empty())
        .map(PathBuf::from)
}

/// Validate an NDK root and read its `source.properties`.
///
/// # Errors
/// Returns `ToolchainError::NdkInvalid` describing what is missing.
pub fn inspect_ndk(path: &Path) -> Result<NdkInfo, ToolchainError> {
    let invalid = |reason: &str| ToolchainError::NdkInvalid {
        path: path.to_path_buf(),
        reason: reason.to_owned(),
    };

    if !path.is_dir() {
        return Err(invalid("directory does not exist"));
    }
    if !path.join(ANDROID_TOOLCHAIN_FILE).is_file() {
        return Err(invalid(&format!("missing {ANDROID_TOOLCHAIN_FILE}")));
    }

    let props = std::fs::read_to_string(path.join("source.properties"))
        .map_err(|e| invalid(&format!("cannot read source.properties: {e}")))?;
    let revision = parse_source_properties(&props)
        .ok_or_else(|| invalid("source.properties has no Pkg.Revision"))?;

    Ok(NdkInfo {
        path: path.to_path_buf(),
        revision,
    })
}

/// Extract `Pkg.Revision` from an NDK `source.properties` file.
pub fn parse_source_properties(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        if key.trim() == "Pkg.Revision" {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_owned())
        } else {
            None
        }
    })
}

/// Locate `cmake` and determine its version.
///
/// Uses the configured path if given, otherwise a `PATH` lookup via `which`.
/// A configured bare name is looked up on `PATH` too.
///
/// # Errors
/// Returns an error if `cmake` is not found, is not executable, or returns an
/// unparseable version string.
pub fn detect_cmake(configured: Option<&Path>) -> Result<CmakeInfo, ToolchainError> {
    let path = match configured {
        // A bare program name such as `cmake3` is looked up on PATH.
        Some(path) if path.components().count() == 1 && !path.exists() => {
            which(&path.to_string_lossy()).ok_or(ToolchainError::CmakeNotFound)?
        }
        Some(path) => path.to_path_buf(),
        None => which("cmake").ok_or(ToolchainError::CmakeNotFound)?,
    };
    check_executable(&path)?;

    let output = abipack_util::process::run_command(Command::new(&path).arg("--version"))?;
    let raw = output.stdout.trim().to_owned();
    let version = parse_cmake_version(&raw).ok_or(ToolchainError::VersionParse { output: raw })?;

    Ok(CmakeInfo { path, version })
}

/// Parse the version from `cmake --version` output (`cmake version 3.22.1`).
pub fn parse_cmake_version(raw: &str) -> Option<String> {
    let first = raw.lines().next()?;
    let version = first.trim().strip_prefix("cmake version ")?.trim();
    let numeric = version.split('-').next().unwrap_or(version);
    let dotted = numeric.split('.').count() >= 2
        && numeric
            .split('.')
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    dotted.then(|| version.to_owned())
}

fn which(program: &str) -> Option<PathBuf> {
    let output = Command::new("which").arg(program).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let path_str = String::from_utf8_lossy(&output.stdout);
    let trimmed = path_str.trim();
    (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
}

fn check_executable(path: &Path) -> Result<(), ToolchainError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(path).map_err(|_| ToolchainError::CmakeNotFound)?;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(ToolchainError::NotExecutable {
                path: path.to_path_buf(),
            });
        }
    }
    Ok(())
}
