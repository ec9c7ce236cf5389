//! Error types for abipack-util.

/// Errors produced by utility functions.
#[derive(Debug, thiserror::Error)]
pub enum UtilError {
    /// An I/O operation failed.
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// A glob pattern was invalid.
    #[error("invalid glob pattern `{pattern}`: {message}")]
    GlobPattern { pattern: String, message: String },

    /// A command failed to execute.
    #[error("cannot execute `{program}`: {source}")]
    CommandExec {
        program: String,
        source: std::io::Error,
    },

    /// An upload failed.
    #[error("upload to {url} failed: {message}")]
    Upload { url: String, message: String },

    /// A download failed.
    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },

    /// A `group:artifact:version` string is malformed.
    #[error("invalid Maven coordinate `{coordinate}`: {reason}")]
    InvalidMavenCoordinate { coordinate: String, reason: String },

    /// A version cannot be used as a Maven path segment.
    #[error("invalid version `{version}` — Maven versions may only contain letters, digits, `.`, `-` and `_`")]
    InvalidVersion { version: String },

    /// Existing `maven-metadata.xml` could not be parsed.
    #[error("invalid maven-metadata.xml at {path}: {message}")]
    MavenMetadata { path: String, message: String },
}
