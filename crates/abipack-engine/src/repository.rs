//! Maven-layout repositories that receive published artifacts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use abipack_util::upload::Uploader;

use crate::assemble::PublishableArtifact;
use crate::error::RepositoryError;

/// Receives an assembled artifact: every file, its sidecars and the provenance metadata.
pub trait Publisher: Send + Sync {
    /// Publish all of `artifact`'s files.
    ///
    /// # Errors
    /// Returns an error if the repository is unreachable or rejects a file.
    fn publish(&self, artifact: &PublishableArtifact) -> Result<(), RepositoryError>;

    /// Where artifacts go, for status output.
    fn location(&self) -> String;
}

/// A repository on the local filesystem.
///
/// Files are copied into the Maven layout and the artifact's `maven-metadata.xml`
/// is updated to list the new version.
#[derive(Debug, Clone)]
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl Publisher for LocalRepository {
    fn publish(&self, artifact: &PublishableArtifact) -> Result<(), RepositoryError> {
        for file in &artifact.files {
            for (source, target) in file.repository_files() {
                let dest = self.root.join(&target);
                abipack_util::fs::copy_file(source, &dest)?;
                tracing::debug!("copied {} to {}", source.display(), dest.display());
            }
        }

        let metadata = self
            .root
            .join(artifact.coordinate().artifact_dir())
            .join("maven-metadata.xml");
        abipack_util::maven::update_metadata(
            &metadata,
            &artifact.group,
            &artifact.artifact_id,
            &artifact.version,
            &last_updated(Utc::now()),
        )?;
        Ok(())
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }
}

/// A remote repository reached over HTTP. Each file is uploaded with a `PUT`.
///
/// The artifact's `maven-metadata.xml` is fetched after the files are uploaded,
/// extended with the new version and put back; a missing document is created.
#[derive(Debug)]
pub struct HttpRepository {
    base: String,
    uploader: Uploader,
}

impl HttpRepository {
    pub fn new(base: &str, token: Option<String>) -> Self {
        Self {
            base: base.trim_end_matches('/').to_owned(),
            uploader: Uploader::new(token),
        }
    }
}

impl Publisher for HttpRepository {
    fn publish(&self, artifact: &PublishableArtifact) -> Result<(), RepositoryError> {
        for file in &artifact.files {
            for (source, target) in file.repository_files() {
                let url = format!("{}/{target}", self.base);
                tracing::debug!("uploading {} to {url}", source.display());
                self.uploader.put_file(&url, source)?;
            }
        }

        let metadata_url = format!(
            "{}/{}/maven-metadata.xml",
            self.base,
            artifact.coordinate().artifact_dir()
        );
        let existing = self.uploader.fetch_text(&metadata_url)?;
        let xml = abipack_util::maven::merge_metadata(
            existing.as_deref(),
            &metadata_url,
            &artifact.group,
            &artifact.artifact_id,
            &artifact.version,
            &last_updated(Utc::now()),
        )?;
        self.uploader.put_bytes(&metadata_url, xml.as_bytes())?;
        Ok(())
    }

    fn location(&self) -> String {
        self.base.clone()
    }
}

/// Open the repository at `location`: an `http(s)://` URL, a `file://` URL, or a
/// filesystem path (relative paths resolve against `project_root`).
///
/// # Errors
/// Returns `RepositoryError::Unsupported` for any other URL scheme.
pub fn open_repository(
    location: &str,
    project_root: &Path,
    token: Option<String>,
) -> Result<Box<dyn Publisher>, RepositoryError> {
    if location.starts_with("http://") || location.starts_with("https://") {
        return Ok(Box::new(HttpRepository::new(location, token)));
    }
    let path = match location.strip_prefix("file://") {
        Some(path) => path,
        None if location.contains("://") || location.is_empty() => {
            return Err(RepositoryError::Unsupported {
                location: location.to_owned(),
            })
        }
        None => location,
    };
    Ok(Box::new(LocalRepository::new(&project_root.join(path))))
}

/// Maven's `lastUpdated` stamp for `at`: `yyyyMMddHHmmss` in UTC.
pub fn last_updated(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use abipack_util::maven::{MavenCoordinate, Pom};

    use super::*;
    use crate::assemble::{PublishedFile, SignatureState};

    /// Records every artifact it receives, failing for the listed ids.
    #[derive(Default)]
    pub(crate) struct RecordingPublisher {
        pub(crate) fail: Vec<String>,
        pub(crate) published: Mutex<Vec<(String, String, SignatureState)>>,
    }

    impl RecordingPublisher {
        pub(crate) fn failing(ids: &[&str]) -> Self {
            Self {
                fail: ids.iter().map(|s| (*s).to_owned()).collect(),
                published: Mutex::new(Vec::new()),
            }
        }
    }

    impl Publisher for RecordingPublisher {
        fn publish(&self, artifact: &PublishableArtifact) -> Result<(), RepositoryError> {
            if self.fail.contains(&artifact.artifact_id) {
                return Err(RepositoryError::Util(abipack_util::error::UtilError::Upload {
                    url: format!("https://repo.test/{}", artifact.artifact_id),
                    message: "503 Service Unavailable".to_owned(),
                }));
            }
            self.published.lock().unwrap().push((
                artifact.artifact_id.clone(),
                artifact.version.clone(),
                artifact.signature,
            ));
            Ok(())
        }

        fn location(&self) -> String {
            "memory".to_owned()
        }
    }

    fn artifact(dir: &Path, version: &str) -> PublishableArtifact {
        let coordinate = MavenCoordinate::new("org.lsposed.lsplant", "lsplant", version).with_packaging("pom");
        let path = dir.join(coordinate.filename());
        std::fs::write(&path, b"<project/>").unwrap();
        let checksum = abipack_util::hash::write_sha256_sidecar(&path).unwrap();
        PublishableArtifact {
            artifact_id: "lsplant".to_owned(),
            group: "org.lsposed.lsplant".to_owned(),
            version: version.to_owned(),
            variant: "release".to_owned(),
            files: vec![PublishedFile {
                path,
                coordinate,
                checksum,
                signature: None,
            }],
            pom: Pom {
                group_id: "org.lsposed.lsplant".to_owned(),
                artifact_id: "lsplant".to_owned(),
                version: version.to_owned(),
                packaging: "tar.gz".to_owned(),
                name: "LSPlant".to_owned(),
                description: None,
                url: None,
                licenses: Vec::new(),
                developers: Vec::new(),
                scm: None,
            },
            signature: SignatureState::Unsigned,
        }
    }

    #[test]
    fn local_repository_lays_out_files_and_metadata() {
        let staging = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        let publisher = LocalRepository::new(repo.path());

        publisher.publish(&artifact(staging.path(), "2.3.0")).unwrap();
        publisher.publish(&artifact(staging.path(), "2.3.1")).unwrap();

        let version_dir = repo.path().join("org/lsposed/lsplant/lsplant/2.3.1");
        assert!(version_dir.join("lsplant-2.3.1.pom").is_file());
        assert!(version_dir.join("lsplant-2.3.1.pom.sha256").is_file());

        let metadata =
            std::fs::read_to_string(repo.path().join("org/lsposed/lsplant/lsplant/maven-metadata.xml")).unwrap();
        assert!(metadata.contains("<latest>2.3.1</latest>"));
        assert!(metadata.contains("<version>2.3.0</version>"));
        assert!(metadata.contains("<version>2.3.1</version>"));
    }

    type Requests = Vec<(String, String, String)>;

    /// Answers HTTP requests on a local port until `maven-metadata.xml` is put.
    /// `GET` serves `metadata` or 404; every `PUT` is accepted.
    fn serve_repository(metadata: Option<&'static str>) -> (String, std::thread::JoinHandle<Requests>) {
        use std::io::{BufRead, Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}/maven", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let mut requests = Vec::new();
            for stream in listener.incoming() {
                let mut stream = stream.unwrap();
                let mut reader = std::io::BufReader::new(stream.try_clone().unwrap());
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let mut parts = line.split_whitespace();
                let method = parts.next().unwrap().to_owned();
                let path = parts.next().unwrap().to_owned();

                let mut length = 0;
                loop {
                    let mut header = String::new();
                    reader.read_line(&mut header).unwrap();
                    if header.trim().is_empty() {
                        break;
                    }
                    if let Some((name, value)) = header.split_once(':') {
                        if name.trim().eq_ignore_ascii_case("content-length") {
                            length = value.trim().parse().unwrap();
                        }
                    }
                }
                let mut body = vec![0; length];
                reader.read_exact(&mut body).unwrap();

                let response = match (method.as_str(), metadata) {
                    ("GET", Some(xml)) => format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{xml}",
                        xml.len()
                    ),
                    ("GET", None) => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_owned(),
                    _ => "HTTP/1.1 201 Created\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_owned(),
                };
                stream.write_all(response.as_bytes()).unwrap();

                let done = method == "PUT" && path.ends_with("/maven-metadata.xml");
                requests.push((method, path, String::from_utf8(body).unwrap()));
                if done {
                    break;
                }
            }
            requests
        });
        (base, handle)
    }

    #[test]
    fn http_repository_extends_remote_metadata_after_uploading() {
        const REMOTE: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<metadata>\n  <versioning>\n    \
            <versions>\n      <version>2.3.0</version>\n    </versions>\n  </versioning>\n</metadata>\n";
        let (base, server) = serve_repository(Some(REMOTE));
        let staging = tempfile::tempdir().unwrap();

        HttpRepository::new(&base, Some("token".to_owned()))
            .publish(&artifact(staging.path(), "2.3.1"))
            .unwrap();
        let requests = server.join().unwrap();

        let calls: Vec<(&str, &str)> = requests.iter().map(|(m, p, _)| (m.as_str(), p.as_str())).collect();
        assert_eq!(
            calls,
            [
                ("PUT", "/maven/org/lsposed/lsplant/lsplant/2.3.1/lsplant-2.3.1.pom"),
                ("PUT", "/maven/org/lsposed/lsplant/lsplant/2.3.1/lsplant-2.3.1.pom.sha256"),
                ("GET", "/maven/org/lsposed/lsplant/lsplant/maven-metadata.xml"),
                ("PUT", "/maven/org/lsposed/lsplant/lsplant/maven-metadata.xml"),
            ]
        );
        let (_, _, metadata) = requests.last().unwrap();
        assert!(metadata.contains("<version>2.3.0</version>"), "{metadata}");
        assert!(metadata.contains("<version>2.3.1</version>"), "{metadata}");
        assert!(metadata.contains("<latest>2.3.1</latest>"), "{metadata}");
    }

    #[test]
    fn http_repository_creates_missing_metadata() {
        let (base, server) = serve_repository(None);
        let staging = tempfile::tempdir().unwrap();

        HttpRepository::new(&base, None)
            .publish(&artifact(staging.path(), "2.3.1"))
            .unwrap();
        let requests = server.join().unwrap();

        let (method, _, metadata) = requests.last().unwrap();
        assert_eq!(method, "PUT");
        let versions = abipack_util::maven::parse_metadata_versions(metadata, "uploaded").unwrap();
        assert_eq!(versions, ["2.3.1"]);
        assert!(metadata.contains("<groupId>org.lsposed.lsplant</groupId>"), "{metadata}");
    }

    #[test]
    fn open_repository_by_scheme() {
        let root = Path::new("/project");
        assert_eq!(
            open_repository("https://maven.example.com/releases/", root, None)
                .unwrap()
                .location(),
            "https://maven.example.com/releases"
        );
        assert_eq!(
            open_repository("file:///srv/maven", root, None).unwrap().location(),
            "/srv/maven"
        );
        assert_eq!(
            open_repository("build/repo", root, None).unwrap().location(),
            "/project/build/repo"
        );
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let Err(err) = open_repository("s3://bucket/maven", Path::new("."), None) else {
            panic!("expected s3:// to be rejected");
        };
        assert!(matches!(err, RepositoryError::Unsupported { .. }));
        assert!(open_repository("", Path::new("."), None).is_err());
    }

    #[test]
    fn last_updated_formats_utc() {
        let at = |secs| DateTime::from_timestamp(secs, 0).unwrap();
        assert_eq!(last_updated(at(0)), "19700101000000");
        // 2024-02-29T12:34:56Z
        assert_eq!(last_updated(at(1_709_210_096)), "20240229123456");
    }
}
