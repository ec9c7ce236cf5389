//! Shared diagnostic logging for the build driver.

use abipack_targets::Abi;
use abipack_toolchain::{Diagnostic, DiagnosticLevel};

/// Log toolchain diagnostics for one pair.
///
/// Warnings and errors always reach the log; notes only at debug level.
pub(crate) fn log_diagnostics(variant: &str, abi: Abi, diagnostics: &[Diagnostic]) {
    for diag in diagnostics {
        match diag.level {
            DiagnosticLevel::Error => tracing::error!("{variant}/{abi}: {diag}"),
            DiagnosticLevel::Warning => tracing::warn!("{variant}/{abi}: {diag}"),
            DiagnosticLevel::Note => tracing::debug!("{variant}/{abi}: note: {diag}"),
        }
    }
}
