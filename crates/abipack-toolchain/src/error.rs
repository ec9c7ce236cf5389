//! Error types for abipack-toolchain.

use std::path::PathBuf;

use abipack_targets::Abi;

/// Errors produced by toolchain detection and invocation.
#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    /// No NDK location was configured or found in the environment.
    #[error("Android NDK not found — set [toolchain] ndk in abipack.toml, or ANDROID_NDK_HOME")]
    NdkNotFound,

    /// The NDK directory exists but is not a usable NDK.
    #[error("invalid Android NDK at {path}: {reason}")]
    NdkInvalid { path: PathBuf, reason: String },

    /// cmake binary was not found on the system.
    #[error("cmake not found — install CMake and add it to PATH, or set [toolchain] cmake")]
    CmakeNotFound,

    /// cmake was found but is not executable.
    #[error("cmake found at {path} but is not executable — check file permissions")]
    NotExecutable { path: PathBuf },

    /// `cmake --version` returned an unexpected format.
    #[error("cannot parse cmake version from output: {output}")]
    VersionParse { output: String },

    /// No source directory was given to the command builder.
    #[error("no source directory specified — set [package] source_root")]
    NoSourceDir,

    /// No build directory was given to the command builder.
    #[error("no build directory specified")]
    NoBuildDir,

    /// The source directory has no `CMakeLists.txt`.
    #[error("no CMakeLists.txt in {path}")]
    NoCmakeLists { path: PathBuf },

    /// A CMake step ran and failed.
    #[error("{abi}: cmake {stage} failed: {detail}")]
    StepFailed {
        abi: Abi,
        stage: &'static str,
        detail: String,
    },

    /// A CMake step exceeded the configured timeout and was killed.
    #[error("{abi}: cmake {stage} timed out after {seconds}s")]
    TimedOut {
        abi: Abi,
        stage: &'static str,
        seconds: u64,
    },

    /// An error propagated from abipack-util.
    #[error("{0}")]
    Util(#[from] abipack_util::error::UtilError),
}
