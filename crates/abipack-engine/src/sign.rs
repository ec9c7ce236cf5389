//! Detached signatures for published files.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use abipack_util::error::UtilError;
use abipack_util::process::display_command;

use crate::error::SigningError;

/// Optional signing collaborator. Produces one detached signature per file.
pub trait Signer: Send + Sync {
    /// Sign `file`, returning the path of the written signature.
    ///
    /// # Errors
    /// Returns an error if the signature could not be produced.
    fn sign(&self, file: &Path) -> Result<PathBuf, SigningError>;
}

/// Signs with `gpg --detach-sign`, writing `<file>.asc` next to the input.
pub struct GpgSigner {
    gpg: PathBuf,
    key_id: String,
    passphrase: Option<String>,
}

impl std::fmt::Debug for GpgSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpgSigner")
            .field("gpg", &self.gpg)
            .field("key_id", &self.key_id)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl GpgSigner {
    pub fn new(gpg: &Path, key_id: &str, passphrase: Option<String>) -> Self {
        Self {
            gpg: gpg.to_path_buf(),
            key_id: key_id.to_owned(),
            passphrase,
        }
    }

    /// Path of the signature written for `file`.
    pub fn signature_path(file: &Path) -> PathBuf {
        let mut name = file.as_os_str().to_os_string();
        name.push(".asc");
        PathBuf::from(name)
    }

    fn command(&self, file: &Path, signature: &Path) -> Command {
        let mut cmd = Command::new(&self.gpg);
        cmd.args(["--batch", "--yes", "--armor", "--detach-sign"])
            .arg("--local-user")
            .arg(&self.key_id);
        if self.passphrase.is_some() {
            cmd.args(["--pinentry-mode", "loopback", "--passphrase-fd", "0"]);
        }
        cmd.arg("--output").arg(signature).arg(file);
        cmd
    }
}

impl Signer for GpgSigner {
    fn sign(&self, file: &Path) -> Result<PathBuf, SigningError> {
        let signature = Self::signature_path(file);
        let mut cmd = self.command(file, &signature);
        tracing::debug!("running: {}", display_command(&cmd));

        let exec_err = |source| UtilError::CommandExec {
            program: self.gpg.display().to_string(),
            source,
        };
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(exec_err)?;
        if let Some(mut stdin) = child.stdin.take() {
            if let Some(passphrase) = &self.passphrase {
                stdin
                    .write_all(passphrase.as_bytes())
                    .and_then(|()| stdin.write_all(b"\n"))
                    .map_err(exec_err)?;
            }
        }
        let output = child.wait_with_output().map_err(exec_err)?;

        if !output.status.success() {
            return Err(SigningError::Failed {
                path: file.display().to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        if !signature.exists() {
            return Err(SigningError::Failed {
                path: file.display().to_string(),
                message: format!("{} was not written", signature.display()),
            });
        }
        Ok(signature)
    }
}
