//! Maven coordinates, POM rendering and `maven-metadata.xml` maintenance.

use std::path::Path;

use crate::error::UtilError;

/// A Maven coordinate identifying a single published file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MavenCoordinate {
    /// Maven group identifier, e.g. `"org.lsposed.lsplant"`.
    pub group_id: String,
    /// Maven artifact identifier, e.g. `"lsplant-standalone"`.
    pub artifact_id: String,
    /// Artifact version, e.g. `"6.4"`.
    pub version: String,
    /// Optional classifier, e.g. `"symbols"`.
    pub classifier: Option<String>,
    /// File extension / packaging type (defaults to `"jar"`).
    pub packaging: String,
}

impl MavenCoordinate {
    /// Create a new coordinate with default packaging ("jar") and no classifier.
    pub fn new(group_id: &str, artifact_id: &str, version: &str) -> Self {
        Self {
            group_id: group_id.to_owned(),
            artifact_id: artifact_id.to_owned(),
            version: version.to_owned(),
            classifier: None,
            packaging: "jar".to_owned(),
        }
    }

    /// Builder method to override the packaging type.
    pub fn with_packaging(mut self, packaging: &str) -> Self {
        self.packaging = packaging.to_owned();
        self
    }

    /// Builder method to set a classifier.
    pub fn with_classifier(mut self, classifier: &str) -> Self {
        self.classifier = Some(classifier.to_owned());
        self
    }

    /// Parse a Maven coordinate string.
    ///
    /// Accepted formats:
    /// - `"group:artifact:version"` (packaging defaults to "jar")
    /// - `"group:artifact:version:packaging"`
    /// - `"group:artifact:version:packaging:classifier"`
    ///
    /// # Errors
    /// Returns `UtilError::InvalidMavenCoordinate` when the string has fewer
    /// than 3 or more than 5 colon-separated parts, or any part is empty.
    pub fn parse(coord: &str) -> Result<Self, UtilError> {
        let parts: Vec<&str> = coord.split(':').collect();

        if !(3..=5).contains(&parts.len()) {
            return Err(UtilError::InvalidMavenCoordinate {
                coordinate: coord.to_owned(),
                reason: format!(
                    "expected 3 to 5 colon-separated parts (group:artifact:version[:packaging[:classifier]]), got {}",
                    parts.len()
                ),
            });
        }

        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() {
                let label = match i {
                    0 => "group_id",
                    1 => "artifact_id",
                    2 => "version",
                    3 => "packaging",
                    _ => "classifier",
                };
                return Err(UtilError::InvalidMavenCoordinate {
                    coordinate: coord.to_owned(),
                    reason: format!("{label} is empty"),
                });
            }
        }

        let (Some(group), Some(artifact), Some(version)) =
            (parts.first(), parts.get(1), parts.get(2))
        else {
            return Err(UtilError::InvalidMavenCoordinate {
                coordinate: coord.to_owned(),
                reason: "expected at least 3 parts".to_owned(),
            });
        };

        let mut result = Self::new(group, artifact, version);
        if let Some(pkg) = parts.get(3) {
            result.packaging = (*pkg).to_owned();
        }
        if let Some(classifier) = parts.get(4) {
            result.classifier = Some((*classifier).to_owned());
        }
        Ok(result)
    }

    /// The filename: `"{artifact_id}-{version}[-{classifier}].{packaging}"`.
    pub fn filename(&self) -> String {
        match &self.classifier {
            Some(c) => format!(
                "{}-{}-{}.{}",
                self.artifact_id, self.version, c, self.packaging
            ),
            None => format!("{}-{}.{}", self.artifact_id, self.version, self.packaging),
        }
    }

    /// The repository-relative directory holding every file of this artifact version.
    pub fn version_dir(&self) -> String {
        format!("{}/{}", self.artifact_dir(), self.version)
    }

    /// The repository-relative directory of the artifact (where `maven-metadata.xml` lives).
    pub fn artifact_dir(&self) -> String {
        format!("{}/{}", self.group_id.replace('.', "/"), self.artifact_id)
    }

    /// The repository-relative path for this file.
    pub fn repository_path(&self) -> String {
        format!("{}/{}", self.version_dir(), self.filename())
    }
}

/// A license entry in a POM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PomLicense {
    pub name: String,
    pub url: Option<String>,
}

/// A developer entry in a POM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PomDeveloper {
    pub name: String,
    pub url: Option<String>,
}

/// Source control information in a POM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PomScm {
    pub connection: Option<String>,
    pub url: String,
}

/// Provenance metadata rendered into a `.pom` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pom {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub packaging: String,
    pub name: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub licenses: Vec<PomLicense>,
    pub developers: Vec<PomDeveloper>,
    pub scm: Option<PomScm>,
}

impl Pom {
    /// Render the POM as a Maven 4.0.0 XML document.
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str("<project xmlns=\"http://maven.apache.org/POM/4.0.0\" xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xsi:schemaLocation=\"http://maven.apache.org/POM/4.0.0 https://maven.apache.org/xsd/maven-4.0.0.xsd\">\n");
        push_element(&mut xml, 1, "modelVersion", "4.0.0");
        push_element(&mut xml, 1, "groupId", &self.group_id);
        push_element(&mut xml, 1, "artifactId", &self.artifact_id);
        push_element(&mut xml, 1, "version", &self.version);
        push_element(&mut xml, 1, "packaging", &self.packaging);
        push_element(&mut xml, 1, "name", &self.name);
        if let Some(description) = &self.description {
            push_element(&mut xml, 1, "description", description);
        }
        if let Some(url) = &self.url {
            push_element(&mut xml, 1, "url", url);
        }

        if !self.licenses.is_empty() {
            xml.push_str("  <licenses>\n");
            for license in &self.licenses {
                xml.push_str("    <license>\n");
                push_element(&mut xml, 3, "name", &license.name);
                if let Some(url) = &license.url {
                    push_element(&mut xml, 3, "url", url);
                }
                xml.push_str("    </license>\n");
            }
            xml.push_str("  </licenses>\n");
        }

        if !self.developers.is_empty() {
            xml.push_str("  <developers>\n");
            for developer in &self.developers {
                xml.push_str("    <developer>\n");
                push_element(&mut xml, 3, "name", &developer.name);
                if let Some(url) = &developer.url {
                    push_element(&mut xml, 3, "url", url);
                }
                xml.push_str("    </developer>\n");
            }
            xml.push_str("  </developers>\n");
        }

        if let Some(scm) = &self.scm {
            xml.push_str("  <scm>\n");
            if let Some(connection) = &scm.connection {
                push_element(&mut xml, 2, "connection", connection);
            }
            push_element(&mut xml, 2, "url", &scm.url);
            xml.push_str("  </scm>\n");
        }

        xml.push_str("</project>\n");
        xml
    }
}

fn push_element(xml: &mut String, depth: usize, tag: &str, value: &str) {
    for _ in 0..depth {
        xml.push_str("  ");
    }
    xml.push_str(&format!("<{tag}>{}</{tag}>\n", escape_xml(value)));
}

/// Escape the five XML special characters.
pub fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// Read the versions already listed in a `maven-metadata.xml` document.
/// `origin` names the document in errors.
///
/// # Errors
/// Returns an error if `content` is not well-formed XML.
pub fn parse_metadata_versions(content: &str, origin: &str) -> Result<Vec<String>, UtilError> {
    let doc = roxmltree::Document::parse(content).map_err(|e| UtilError::MavenMetadata {
        path: origin.to_owned(),
        message: e.to_string(),
    })?;
    Ok(doc
        .descendants()
        .filter(|n| n.has_tag_name("version") && n.parent().is_some_and(|p| p.has_tag_name("versions")))
        .filter_map(|n| n.text())
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
        .collect())
}

/// Render a `maven-metadata.xml` listing `versions`, with `latest`/`release` set to `current`.
pub fn render_metadata(
    group_id: &str,
    artifact_id: &str,
    current: &str,
    versions: &[String],
    last_updated: &str,
) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<metadata>\n");
    push_element(&mut xml, 1, "groupId", group_id);
    push_element(&mut xml, 1, "artifactId", artifact_id);
    xml.push_str("  <versioning>\n");
    push_element(&mut xml, 2, "latest", current);
    push_element(&mut xml, 2, "release", current);
    xml.push_str("    <versions>\n");
    for version in versions {
        push_element(&mut xml, 3, "version", version);
    }
    xml.push_str("    </versions>\n");
    push_element(&mut xml, 2, "lastUpdated", last_updated);
    xml.push_str("  </versioning>\n</metadata>\n");
    xml
}

/// Add `version` to `existing` metadata, or start a new document when there is none.
///
/// Existing versions are preserved in their original order; `version` is appended
/// once and becomes `latest` and `release`.
///
/// # Errors
/// Returns an error if `existing` cannot be parsed.
pub fn merge_metadata(
    existing: Option<&str>,
    origin: &str,
    group_id: &str,
    artifact_id: &str,
    version: &str,
    last_updated: &str,
) -> Result<String, UtilError> {
    let mut versions = match existing {
        Some(content) => parse_metadata_versions(content, origin)?,
        None => Vec::new(),
    };
    if !versions.iter().any(|v| v == version) {
        versions.push(version.to_owned());
    }
    Ok(render_metadata(group_id, artifact_id, version, &versions, last_updated))
}

/// Add `version` to the `maven-metadata.xml` at `path`, creating it if absent.
///
/// # Errors
/// Returns an error if the existing file cannot be read or parsed, or the new
/// file cannot be written.
pub fn update_metadata(
    path: &Path,
    group_id: &str,
    artifact_id: &str,
    version: &str,
    last_updated: &str,
) -> Result<(), UtilError> {
    let existing = if path.exists() {
        Some(std::fs::read_to_string(path).map_err(|source| UtilError::Io {
            path: path.display().to_string(),
            source,
        })?)
    } else {
        None
    };
    let xml = merge_metadata(
        existing.as_deref(),
        &path.display().to_string(),
        group_id,
        artifact_id,
        version,
        last_updated,
    )?;
    crate::fs::write_atomic(path, xml.as_bytes())
}

/// Validate that a version string is safe for filesystem paths and URLs.
///
/// Allows only `[a-zA-Z0-9._-]`. Must be non-empty.
///
/// # Errors
/// Returns `UtilError::InvalidVersion` if the string is empty or contains
/// characters outside the allowed set.
pub fn validate_version(version: &str) -> Result<(), UtilError> {
    if version.is_empty()
        || !version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
    {
        return Err(UtilError::InvalidVersion {
            version: version.to_owned(),
        });
    }
    Ok(())
}
