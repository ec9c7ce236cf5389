//! NDK/CMake detection, CMake invocation and clang diagnostics normalization.

pub mod detect;
pub mod error;
pub mod invoke;
pub mod toolchain;

pub use detect::{detect_cmake, detect_ndk, CmakeInfo, NdkInfo};
pub use error::ToolchainError;
pub use invoke::{CmakeCommand, Diagnostic, DiagnosticLevel};
pub use toolchain::{CmakeToolchain, InvokeRequest, Toolchain, ToolchainOutput};
