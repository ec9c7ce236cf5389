#![forbid(unsafe_code)]
//! Build, packaging and publishing engine for abipack.

pub mod assemble;
pub mod descriptor;
mod diagnostics;
pub mod driver;
pub mod error;
pub mod flags;
pub mod layout;
pub mod release;
pub mod repository;
pub mod sign;
pub mod symbols;
pub mod version;

pub use error::{EngineError, PackagingError, PublishError, RepositoryError, SigningError};
pub use flags::FlagComposer;
pub use release::{
    run, ArtifactReport, Collaborators, Project, PublishOutcome, RunOptions, RunReport, MANIFEST_FILE,
};
pub use repository::{open_repository, Publisher};
pub use sign::{GpgSigner, Signer};
pub use version::{GitTags, Version, VersionControl, VersionResolver};
