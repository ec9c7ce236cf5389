//! Assembling a variant's packaged outputs into a publishable artifact.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use abipack_config::manifest::PublishConfig;
use abipack_targets::Abi;
use abipack_util::archive::{collect_entries, write_tar_gz, ArchiveEntry, ExcludeSet};
use abipack_util::maven::{MavenCoordinate, Pom, PomDeveloper, PomLicense, PomScm};

use crate::descriptor::{self, CapabilityDescriptor};
use crate::error::{PublishError, SigningError};
use crate::layout::BuildLayout;
use crate::sign::Signer;
use crate::symbols::SymbolArchive;
use crate::version::Version;

/// Metadata stored as `build.toml` inside every component bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMetadata {
    pub artifact: String,
    pub variant: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_tag: Option<String>,
    pub abis: Vec<Abi>,
    /// Composed flag set the variant was built with.
    pub flags: Vec<String>,
    /// Epoch seconds timestamp of when the bundle was produced (e.g. "1708646400s-since-epoch").
    pub built_at: String,
}

/// Return the current UTC time as epoch seconds (e.g. "1708646400s-since-epoch").
pub(crate) fn now_epoch_secs() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}s-since-epoch", duration.as_secs())
}

/// Whether an artifact carries signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureState {
    /// No signer was configured.
    Unsigned,
    Signed,
}

impl fmt::Display for SignatureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsigned => f.write_str("unsigned"),
            Self::Signed => f.write_str("signed"),
        }
    }
}

/// One file of an artifact together with its sidecars.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedFile {
    pub path: PathBuf,
    pub coordinate: MavenCoordinate,
    /// The `.sha256` sidecar.
    pub checksum: PathBuf,
    /// The `.asc` signature, once signed.
    pub signature: Option<PathBuf>,
}

impl PublishedFile {
    fn new(path: PathBuf, coordinate: MavenCoordinate) -> Result<Self, abipack_util::error::UtilError> {
        let checksum = abipack_util::hash::write_sha256_sidecar(&path)?;
        Ok(Self {
            path,
            coordinate,
            checksum,
            signature: None,
        })
    }

    /// Local files paired with their repository-relative destination.
    pub fn repository_files(&self) -> Vec<(&Path, String)> {
        let target = self.coordinate.repository_path();
        let mut files = vec![
            (self.path.as_path(), target.clone()),
            (self.checksum.as_path(), format!("{target}.sha256")),
        ];
        if let Some(signature) = &self.signature {
            files.push((signature.as_path(), format!("{target}.asc")));
        }
        files
    }
}

/// Everything handed to a publisher for one artifact.
#[derive(Debug, Clone)]
pub struct PublishableArtifact {
    pub artifact_id: String,
    pub group: String,
    pub version: String,
    pub variant: String,
    /// Component bundle, Prefab descriptor, symbols archive and POM, in that order.
    pub files: Vec<PublishedFile>,
    pub pom: Pom,
    pub signature: SignatureState,
}

impl PublishableArtifact {
    /// Coordinate of the artifact's main component.
    pub fn coordinate(&self) -> MavenCoordinate {
        MavenCoordinate::new(&self.group, &self.artifact_id, &self.version)
    }

    /// Sign every file, recording the signatures.
    ///
    /// # Errors
    /// Returns the first signing failure; the artifact then stays unsigned.
    pub fn sign(&mut self, signer: &dyn Signer) -> Result<(), SigningError> {
        let signatures = self
            .files
            .iter()
            .map(|f| signer.sign(&f.path))
            .collect::<Result<Vec<_>, _>>()?;
        for (file, signature) in self.files.iter_mut().zip(signatures) {
            file.signature = Some(signature);
        }
        self.signature = SignatureState::Signed;
        Ok(())
    }
}

/// Inputs for assembling one artifact from its variant's packaged outputs.
#[derive(Debug, Clone)]
pub struct AssembleRequest<'a> {
    pub artifact_id: &'a str,
    pub variant: &'a str,
    pub version: &'a Version,
    pub publish: &'a PublishConfig,
    /// The variant's `prefab/` directory.
    pub prefab_dir: &'a Path,
    pub descriptors: &'a [CapabilityDescriptor],
    pub symbols: &'a SymbolArchive,
    pub abis: &'a [Abi],
    pub flags: &'a [String],
}

/// Build the POM for an artifact from the `[publish]` metadata.
pub fn pom_for(publish: &PublishConfig, artifact_id: &str, version: &str) -> Pom {
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_owned());
    Pom {
        group_id: publish.group.clone(),
        artifact_id: artifact_id.to_owned(),
        version: version.to_owned(),
        packaging: "tar.gz".to_owned(),
        name: publish.name.clone().unwrap_or_else(|| artifact_id.to_owned()),
        description: non_empty(&publish.description),
        url: non_empty(&publish.url),
        licenses: publish
            .license
            .iter()
            .map(|l| PomLicense {
                name: l.name.clone(),
                url: non_empty(&l.url),
            })
            .collect(),
        developers: publish
            .developers
            .iter()
            .map(|d| PomDeveloper {
                name: d.name.clone(),
                url: non_empty(&d.url),
            })
            .collect(),
        scm: publish.scm.as_ref().map(|s| PomScm {
            connection: non_empty(&s.connection),
            url: s.url.clone(),
        }),
    }
}

/// Stage an artifact's files under `<build_dir>/outputs/publications/<artifact>/`.
///
/// The component bundle holds the Prefab tree of published modules only plus
/// `build.toml`. The Prefab descriptor and symbols archive are staged next to it,
/// along with the POM and a `.sha256` sidecar for each file.
///
/// # Errors
/// Returns `PublishError::NoPublishedDescriptor` if every module is test-only,
/// or `PublishError::Assemble` if a file cannot be written.
pub fn assemble(
    layout: &BuildLayout,
    request: &AssembleRequest<'_>,
) -> Result<PublishableArtifact, PublishError> {
    let id = request.artifact_id;
    let version = &request.version.resolved;
    if descriptor::published(request.descriptors).is_empty() {
        return Err(PublishError::NoPublishedDescriptor {
            artifact: id.to_owned(),
        });
    }
    let assemble_err = |message: String| PublishError::Assemble {
        artifact: id.to_owned(),
        message,
    };

    abipack_util::maven::validate_version(version).map_err(|e| assemble_err(e.to_string()))?;

    let dir = layout.publication_dir(id);
    abipack_util::fs::remove_dir_all_if_exists(&dir).map_err(|e| assemble_err(e.to_string()))?;
    abipack_util::fs::ensure_dir(&dir).map_err(|e| assemble_err(e.to_string()))?;

    let base = MavenCoordinate::new(&request.publish.group, id, version);
    let stage = |coordinate: &MavenCoordinate| dir.join(coordinate.filename());

    // Component bundle.
    let metadata = BuildMetadata {
        artifact: id.to_owned(),
        variant: request.variant.to_owned(),
        version: version.clone(),
        raw_tag: request.version.raw_tag.clone(),
        abis: request.abis.to_vec(),
        flags: request.flags.to_vec(),
        built_at: now_epoch_secs(),
    };
    let metadata_path = dir.join("build.toml");
    let content = toml::to_string_pretty(&metadata).map_err(|e| assemble_err(e.to_string()))?;
    abipack_util::fs::write_atomic(&metadata_path, content.as_bytes())
        .map_err(|e| assemble_err(e.to_string()))?;

    let test_modules: Vec<String> = request
        .descriptors
        .iter()
        .filter(|d| d.test_only)
        .map(|d| format!("modules/{}", d.logical_name))
        .collect();
    let excludes = ExcludeSet::new(&test_modules).map_err(|e| assemble_err(e.to_string()))?;
    let mut entries: Vec<ArchiveEntry> = collect_entries(request.prefab_dir, &excludes)
        .map_err(|e| assemble_err(e.to_string()))?
        .into_iter()
        .map(|e| ArchiveEntry {
            name: Path::new("prefab").join(e.name),
            source: e.source,
        })
        .collect();
    entries.push(ArchiveEntry {
        name: PathBuf::from("build.toml"),
        source: metadata_path.clone(),
    });
    entries.sort();

    let bundle = base.clone().with_packaging("tar.gz");
    let bundle_path = stage(&bundle);
    write_tar_gz(&bundle_path, &entries).map_err(|e| assemble_err(e.to_string()))?;
    std::fs::remove_file(&metadata_path)
        .map_err(|e| assemble_err(format!("cannot remove {}: {e}", metadata_path.display())))?;

    // Prefab descriptor and symbols.
    let prefab = base.clone().with_packaging("json").with_classifier("prefab");
    let prefab_path = stage(&prefab);
    abipack_util::fs::copy_file(&request.prefab_dir.join("prefab.json"), &prefab_path)
        .map_err(|e| assemble_err(e.to_string()))?;

    let symbols = base.clone().with_packaging("tar.gz").with_classifier("symbols");
    let symbols_path = stage(&symbols);
    abipack_util::fs::copy_file(&request.symbols.path, &symbols_path)
        .map_err(|e| assemble_err(e.to_string()))?;

    // POM.
    let pom = pom_for(request.publish, id, version);
    let pom_coordinate = base.with_packaging("pom");
    let pom_path = stage(&pom_coordinate);
    abipack_util::fs::write_atomic(&pom_path, pom.to_xml().as_bytes())
        .map_err(|e| assemble_err(e.to_string()))?;

    let files = [
        (bundle_path, bundle),
        (prefab_path, prefab),
        (symbols_path, symbols),
        (pom_path, pom_coordinate),
    ]
    .into_iter()
    .map(|(path, coordinate)| PublishedFile::new(path, coordinate))
    .collect::<Result<Vec<_>, _>>()
    .map_err(|e| assemble_err(e.to_string()))?;

    tracing::info!("assembled {id} {version} from variant {}", request.variant);
    Ok(PublishableArtifact {
        artifact_id: id.to_owned(),
        group: request.publish.group.clone(),
        version: version.clone(),
        variant: request.variant.to_owned(),
        files,
        pom,
        signature: SignatureState::Unsigned,
    })
}
