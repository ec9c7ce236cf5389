//! Parse `abipack.toml` and validate the variant/ABI build matrix.

pub mod manifest;
pub mod matrix;

pub use manifest::{Manifest, ManifestError};
pub use matrix::{ConfigError, RuntimeLink, Variant, VariantMatrix};
