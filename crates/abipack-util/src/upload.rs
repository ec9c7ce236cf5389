//! HTTP transfers to and from a remote repository.

use std::path::Path;
use std::time::Duration;

use crate::error::UtilError;

/// A reusable HTTP client for repository `PUT` uploads and `GET` lookups.
pub struct Uploader {
    agent: ureq::Agent,
    bearer_token: Option<String>,
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("authenticated", &self.bearer_token.is_some())
            .finish_non_exhaustive()
    }
}

impl Uploader {
    /// Create an uploader, optionally authenticating with a bearer token.
    pub fn new(bearer_token: Option<String>) -> Self {
        let agent = ureq::Agent::new_with_config(
            ureq::config::Config::builder()
                .timeout_connect(Some(Duration::from_secs(30)))
                .timeout_global(Some(Duration::from_secs(600)))
                .build(),
        );
        Self {
            agent,
            bearer_token,
        }
    }

    /// Upload the file at `path` to `url` with an HTTP `PUT`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, the server is unreachable,
    /// or it answers with a non-success status.
    pub fn put_file(&self, url: &str, path: &Path) -> Result<(), UtilError> {
        let body = std::fs::read(path).map_err(|source| UtilError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.put_bytes(url, &body)
    }

    /// Upload `body` to `url` with an HTTP `PUT`.
    ///
    /// # Errors
    /// Returns an error if the server is unreachable or answers with a
    /// non-success status.
    pub fn put_bytes(&self, url: &str, body: &[u8]) -> Result<(), UtilError> {
        let mut request = self
            .agent
            .put(url)
            .header("Content-Type", "application/octet-stream");
        if let Some(token) = &self.bearer_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        request.send(body).map_err(|e| UtilError::Upload {
            url: url.to_owned(),
            message: e.to_string(),
        })?;

        tracing::debug!("uploaded {} ({} bytes)", url, body.len());
        Ok(())
    }

    /// Fetch `url` as text. A `404 Not Found` answer is `None`.
    ///
    /// # Errors
    /// Returns an error if the server is unreachable, answers with any other
    /// non-success status, or the body is not valid UTF-8.
    pub fn fetch_text(&self, url: &str) -> Result<Option<String>, UtilError> {
        let download_error = |e: ureq::Error| UtilError::Download {
            url: url.to_owned(),
            message: e.to_string(),
        };

        let mut request = self.agent.get(url);
        if let Some(token) = &self.bearer_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::StatusCode(404)) => {
                tracing::debug!("{url} does not exist yet");
                return Ok(None);
            }
            Err(e) => return Err(download_error(e)),
        };
        let text = response.into_body().read_to_string().map_err(download_error)?;
        Ok(Some(text))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn put_missing_file_errors_before_network() {
        let uploader = Uploader::new(None);
        let err = uploader
            .put_file("http://127.0.0.1:1/repo/a.pom", Path::new("/nonexistent/a.pom"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("cannot access"), "error was: {err}");
    }

    #[test]
    fn put_unreachable_server_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a.pom");
        std::fs::write(&file, b"<project/>").unwrap();

        let uploader = Uploader::new(Some("token".to_owned()));
        let err = uploader
            .put_file("http://127.0.0.1:1/repo/a.pom", &file)
            .unwrap_err()
            .to_string();
        assert!(err.contains("upload to http://127.0.0.1:1/repo/a.pom failed"), "error was: {err}");
    }

    #[test]
    fn fetch_unreachable_server_errors() {
        let uploader = Uploader::new(None);
        let err = uploader
            .fetch_text("http://127.0.0.1:1/repo/maven-metadata.xml")
            .unwrap_err()
            .to_string();
        assert!(
            err.contains("download of http://127.0.0.1:1/repo/maven-metadata.xml failed"),
            "error was: {err}"
        );
    }
}
