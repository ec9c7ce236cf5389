//! Error types for abipack-engine.

use abipack_config::{ConfigError, ManifestError};
use abipack_targets::Abi;
use abipack_toolchain::ToolchainError;
use abipack_util::error::UtilError;

/// Errors that abort a whole run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A filesystem operation failed.
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// A utility operation failed.
    #[error("{0}")]
    Util(#[from] UtilError),

    /// The manifest could not be read or parsed.
    #[error("{0}")]
    Manifest(#[from] ManifestError),

    /// The manifest is well-formed but describes an invalid configuration.
    #[error("invalid abipack.toml: {0}")]
    Config(#[from] ConfigError),

    /// The toolchain could not be located.
    #[error("{0}")]
    Toolchain(#[from] ToolchainError),

    /// Metadata serialization failed.
    #[error("cannot process metadata: {message}")]
    Metadata { message: String },

    /// The build worker pool could not be started.
    #[error("cannot start build workers: {message}")]
    WorkerPool { message: String },
}

/// A variant's outputs could not be packaged. Fatal for that variant's artifacts only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PackagingError {
    /// One or more of the variant's (variant, ABI) builds failed.
    #[error("variant `{variant}` has failed builds for: {}", join_abis(failed))]
    IncompleteBuild { variant: String, failed: Vec<Abi> },

    /// This run built only some of the variant's ABIs.
    #[error("variant `{variant}` was not built for: {} — packaging needs every ABI of the variant", join_abis(missing))]
    PartialAbis { variant: String, missing: Vec<Abi> },

    /// The variant was not part of this run's build matrix.
    #[error("variant `{variant}` was not built in this run")]
    NotBuilt { variant: String },

    /// A published module's library was not produced for an ABI.
    #[error("variant `{variant}` did not produce {library} for {abi}")]
    MissingLibrary {
        variant: String,
        abi: Abi,
        library: String,
    },

    /// Writing the packaged files failed.
    #[error("cannot package variant `{variant}`: {message}")]
    Write { variant: String, message: String },
}

fn join_abis(abis: &[Abi]) -> String {
    abis.iter()
        .map(|a| a.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Signing a produced file failed.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// The signing program could not be run.
    #[error("{0}")]
    Util(#[from] UtilError),

    /// The signing program ran and reported failure.
    #[error("cannot sign {path}: {message}")]
    Failed { path: String, message: String },
}

/// A publishing repository rejected or could not receive a file.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("{0}")]
    Util(#[from] UtilError),

    /// The repository location is not a supported URL or path.
    #[error("unsupported repository `{location}` — use a local path, file://, http:// or https:// URL")]
    Unsupported { location: String },
}

/// One artifact could not be published. Recorded per artifact; never aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The artifact's variant could not be packaged, so nothing was published.
    #[error("{0}")]
    Packaging(PackagingError),

    /// The artifact's variant exports no non-test module.
    #[error("artifact `{artifact}` has no published capability descriptor")]
    NoPublishedDescriptor { artifact: String },

    /// The artifact's files could not be assembled.
    #[error("cannot assemble artifact `{artifact}`: {message}")]
    Assemble { artifact: String, message: String },

    /// A configured signer failed.
    #[error("cannot sign artifact `{artifact}`: {source}")]
    Signing {
        artifact: String,
        source: SigningError,
    },

    /// The repository rejected the artifact or was unreachable.
    #[error("cannot publish artifact `{artifact}`: {source}")]
    Repository {
        artifact: String,
        source: RepositoryError,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_build_names_failed_abis() {
        let err = PackagingError::IncompleteBuild {
            variant: "release".to_owned(),
            failed: vec![Abi::X86, Abi::X86_64],
        };
        assert_eq!(
            err.to_string(),
            "variant `release` has failed builds for: x86, x86_64"
        );
    }

    #[test]
    fn publish_error_wraps_packaging_message() {
        let err = PublishError::Packaging(PackagingError::NotBuilt {
            variant: "standalone".to_owned(),
        });
        assert!(err.to_string().contains("`standalone` was not built"));
    }
}
