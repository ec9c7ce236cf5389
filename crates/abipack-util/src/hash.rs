//! SHA-256 checksums for published files.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::UtilError;

/// Compute the SHA-256 hex digest of a byte slice.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Compute the SHA-256 hex digest of a file using streaming reads.
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn sha256_file(path: &Path) -> Result<String, UtilError> {
    let file = std::fs::File::open(path).map_err(|source| UtilError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut reader = std::io::BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = std::io::Read::read(&mut reader, &mut buf).map_err(|source| UtilError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if n == 0 {
            break;
        }
        let Some(chunk) = buf.get(..n) else {
            break;
        };
        hasher.update(chunk);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Write a `<file>.sha256` sidecar next to `path` and return the sidecar path.
///
/// The sidecar holds only the hex digest, as Maven repositories expect.
///
/// # Errors
/// Returns an error if `path` cannot be hashed or the sidecar cannot be written.
pub fn write_sha256_sidecar(path: &Path) -> Result<PathBuf, UtilError> {
    let digest = sha256_file(path)?;
    let mut sidecar = path.as_os_str().to_owned();
    sidecar.push(".sha256");
    let sidecar = PathBuf::from(sidecar);
    std::fs::write(&sidecar, digest).map_err(|source| UtilError::Io {
        path: sidecar.display().to_string(),
        source,
    })?;
    Ok(sidecar)
}
