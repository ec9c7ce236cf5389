#![forbid(unsafe_code)]
//! Hashing, filesystem, archive, process and Maven helpers for abipack.

pub mod archive;
pub mod error;
pub mod fs;
pub mod hash;
pub mod maven;
pub mod process;
pub mod upload;
