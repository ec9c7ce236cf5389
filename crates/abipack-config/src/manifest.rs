use std::collections::HashSet;
use std::path::{Path, PathBuf};

use abipack_targets::Abi;
use serde::{Deserialize, Serialize};

use crate::matrix::{validate_name, ConfigError, Variant, VariantMatrix};

/// The `abipack.toml` project manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub package: Package,
    #[serde(default)]
    pub toolchain: ToolchainConfig,
    /// The declared ABI set every variant is built against unless restricted.
    #[serde(default)]
    pub abis: Vec<Abi>,
    #[serde(default)]
    pub flags: FlagsConfig,
    #[serde(default, rename = "variant")]
    pub variants: Vec<Variant>,
    #[serde(default, rename = "module")]
    pub modules: Vec<Module>,
    #[serde(default)]
    pub symbols: SymbolsConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing: Option<SigningConfig>,
    #[serde(default, rename = "artifact")]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub version: VersionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    /// Native source tree handed to the toolchain, relative to the manifest.
    #[serde(default = "default_source_root")]
    pub source_root: PathBuf,
    /// Per-run build directory, relative to the manifest.
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,
}

fn default_source_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_build_dir() -> PathBuf {
    PathBuf::from(".abipack")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolchainConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ndk: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmake: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    #[serde(default = "default_min_sdk")]
    pub min_sdk: u32,
    /// Maximum concurrent toolchain invocations. Defaults to available parallelism.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,
    /// Per-pair toolchain timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            ndk: None,
            cmake: None,
            generator: None,
            min_sdk: default_min_sdk(),
            jobs: None,
            timeout_secs: None,
        }
    }
}

fn default_min_sdk() -> u32 {
    21
}

/// The global base flag set and the flags each runtime-link mode maps to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagsConfig {
    #[serde(default)]
    pub base: Vec<String>,
    #[serde(default = "default_runtime_shared")]
    pub runtime_shared: String,
    #[serde(default = "default_runtime_none")]
    pub runtime_none: String,
}

impl Default for FlagsConfig {
    fn default() -> Self {
        Self {
            base: Vec::new(),
            runtime_shared: default_runtime_shared(),
            runtime_none: default_runtime_none(),
        }
    }
}

fn default_runtime_shared() -> String {
    "-DANDROID_STL=c++_shared".to_owned()
}

fn default_runtime_none() -> String {
    "-DANDROID_STL=none".to_owned()
}

/// A library exported through a capability descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    /// Header directory relative to the source root.
    pub headers: PathBuf,
    /// Binary base name without extension, e.g. `liblsplant`.
    pub library: String,
    /// Test-only modules are laid out for dependent tests but never published.
    #[serde(default)]
    pub test_only: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolsConfig {
    /// Glob patterns of sub-trees left out of symbol archives.
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    pub group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    /// `file://` path or `http(s)://` URL of the Maven repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Environment variable holding a bearer token for HTTP repositories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<License>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scm: Option<Scm>,
    #[serde(default)]
    pub developers: Vec<Developer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub name: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scm {
    pub connection: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Developer {
    pub name: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Signing is enabled only when a key is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(default = "default_gpg")]
    pub gpg: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase_env: Option<String>,
}

fn default_gpg() -> PathBuf {
    PathBuf::from("gpg")
}

/// A named publishable artifact built from one variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub variant: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionConfig {
    /// Leading marker stripped from the latest tag.
    #[serde(default = "default_marker")]
    pub marker: String,
    /// Version used when no tag is found.
    #[serde(default = "default_fallback")]
    pub fallback: String,
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            marker: default_marker(),
            fallback: default_fallback(),
        }
    }
}

fn default_marker() -> String {
    "v".to_owned()
}

fn default_fallback() -> String {
    "0.0".to_owned()
}

impl Manifest {
    /// Read and parse an `abipack.toml` from the given path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or contains invalid TOML.
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|e| ManifestError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_str_at(&content, path)
    }

    /// Read, parse and validate a manifest in one step.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or fails validation.
    pub fn load(path: &Path) -> Result<(Self, VariantMatrix), ManifestError> {
        let manifest = Self::from_path(path)?;
        let matrix = manifest.validate()?;
        Ok((manifest, matrix))
    }

    /// Parse manifest text; `path` is only used in error messages.
    ///
    /// # Errors
    /// Returns an error if `content` is not a valid manifest.
    pub fn from_str_at(content: &str, path: &Path) -> Result<Self, ManifestError> {
        toml::from_str(content).map_err(|e| ManifestError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Validate variants, ABIs, artifacts and module names, and build the variant matrix.
    ///
    /// Module header directories must stay inside the source root.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] for any invalid variant, ABI, artifact or module.
    pub fn validate(&self) -> Result<VariantMatrix, ConfigError> {
        validate_name("package", &self.package.name)?;
        let matrix = VariantMatrix::new(self.abis.clone(), self.variants.clone())?;

        let mut ids = HashSet::new();
        for artifact in &self.artifacts {
            validate_name("artifact", &artifact.id)?;
            if !ids.insert(artifact.id.as_str()) {
                return Err(ConfigError::DuplicateArtifact {
                    id: artifact.id.clone(),
                });
            }
            if matrix.get(&artifact.variant).is_err() {
                return Err(ConfigError::UnknownArtifactVariant {
                    id: artifact.id.clone(),
                    variant: artifact.variant.clone(),
                });
            }
        }

        let mut modules = HashSet::new();
        for module in self.modules() {
            validate_name("module", &module.name)?;
            if !modules.insert(module.name.clone()) {
                return Err(ConfigError::DuplicateModule { name: module.name });
            }
            if !abipack_util::fs::is_contained_relative(&module.headers) {
                return Err(ConfigError::HeaderDirOutsideRoot {
                    header_dir: module.headers.display().to_string(),
                    name: module.name,
                });
            }
        }

        Ok(matrix)
    }

    /// Declared modules, or a single `<package>` module with `include/` headers
    /// and `lib<package>` binary when none are declared.
    pub fn modules(&self) -> Vec<Module> {
        if self.modules.is_empty() {
            return vec![Module {
                name: self.package.name.clone(),
                headers: PathBuf::from("include"),
                library: format!("lib{}", self.package.name),
                test_only: false,
            }];
        }
        self.modules.clone()
    }

    /// Look up a declared artifact by id.
    ///
    /// # Errors
    /// Returns `ConfigError::UnknownArtifact` if no artifact has that id.
    pub fn artifact(&self, id: &str) -> Result<&Artifact, ConfigError> {
        self.artifacts
            .iter()
            .find(|a| a.id == id)
            .ok_or_else(|| ConfigError::UnknownArtifact {
                id: id.to_owned(),
                available: self
                    .artifacts
                    .iter()
                    .map(|a| a.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid abipack.toml at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid abipack.toml: {0}")]
    Invalid(#[from] ConfigError),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::matrix::RuntimeLink;

    const LSPLANT: &str = r#"
abis = ["armeabi-v7a", "arm64-v8a", "x86", "x86_64", "riscv64"]

[package]
name = "lsplant"
source_root = "lsplant/src/main/jni"
build_dir = "build"

[toolchain]
min_sdk = 21
jobs = 4

[flags]
base = ["-Werror", "-Wno-gnu-string-literal-operator-template", "-Wno-c++2b-extensions"]

[[variant]]
name = "debug"
runtime_link = "shared"
build_type = "Debug"

[[variant]]
name = "release"
runtime_link = "shared"

[[variant]]
name = "standalone"
base_on = "release"
runtime_link = "none"
defines = ["LSPLANT_STANDALONE=ON"]

[[module]]
name = "lsplant"
headers = "include"
library = "liblsplant"

[[module]]
name = "dex_builder"
headers = "external/dex_builder/include"
library = "libdex_builder"
test_only = true

[symbols]
exclude = ["**/dex_builder"]

[publish]
group = "org.lsposed.lsplant"
name = "LSPlant"
description = "A hook framework for Android Runtime (ART)"
url = "https://github.com/LSPosed/LSPlant"
license = { name = "GNU Lesser General Public License v3.0", url = "https://github.com/LSPosed/LSPlant/blob/master/LICENSE" }
scm = { connection = "scm:git:https://github.com/LSPosed/LSPlant.git", url = "https://github.com/LSPosed/LSPlant" }
developers = [{ name = "Lsposed", url = "https://lsposed.org" }]

[[artifact]]
id = "lsplant"
variant = "release"

[[artifact]]
id = "lsplant-standalone"
variant = "standalone"
"#;

    fn parse(content: &str) -> Result<Manifest, ManifestError> {
        Manifest::from_str_at(content, Path::new("abipack.toml"))
    }

    #[test]
    fn parse_full_manifest() {
        let manifest = parse(LSPLANT).unwrap();
        assert_eq!(manifest.package.name, "lsplant");
        assert_eq!(manifest.package.build_dir, PathBuf::from("build"));
        assert_eq!(manifest.abis.len(), 5);
        assert_eq!(manifest.flags.base.len(), 3);
        assert_eq!(manifest.flags.runtime_none, "-DANDROID_STL=none");
        assert_eq!(manifest.variants.len(), 3);
        assert_eq!(manifest.artifacts.len(), 2);
        assert_eq!(manifest.toolchain.jobs, Some(4));
        assert_eq!(manifest.symbols.exclude, vec!["**/dex_builder"]);

        let publish = manifest.publish.as_ref().unwrap();
        assert_eq!(publish.group, "org.lsposed.lsplant");
        assert_eq!(publish.developers.len(), 1);
        assert!(manifest.signing.is_none());

        let matrix = manifest.validate().unwrap();
        assert_eq!(matrix.runtime_link("standalone").unwrap(), RuntimeLink::None);
    }

    #[test]
    fn parse_minimal_manifest_applies_defaults() {
        let manifest = parse(
            r#"
abis = ["arm64-v8a"]

[package]
name = "mylib"

[[variant]]
name = "release"
"#,
        )
        .unwrap();
        assert_eq!(manifest.package.source_root, PathBuf::from("."));
        assert_eq!(manifest.package.build_dir, PathBuf::from(".abipack"));
        assert_eq!(manifest.toolchain.min_sdk, 21);
        assert_eq!(manifest.version.marker, "v");
        assert_eq!(manifest.version.fallback, "0.0");
        assert_eq!(manifest.flags.runtime_shared, "-DANDROID_STL=c++_shared");

        let modules = manifest.modules();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules.first().unwrap().library, "libmylib");
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn signing_defaults_to_gpg() {
        let manifest = parse(
            r#"
abis = ["x86"]
[package]
name = "mylib"
[[variant]]
name = "release"
[signing]
key_id = "ABCD1234"
"#,
        )
        .unwrap();
        let signing = manifest.signing.unwrap();
        assert_eq!(signing.gpg, PathBuf::from("gpg"));
        assert_eq!(signing.key_id.as_deref(), Some("ABCD1234"));
    }

    #[test]
    fn unknown_abi_is_parse_error() {
        let err = parse(
            r#"
abis = ["mips"]
[package]
name = "mylib"
"#,
        )
        .unwrap_err()
        .to_string();
        assert!(err.contains("invalid abipack.toml"), "error was: {err}");
        assert!(err.contains("unknown ABI `mips`"), "error was: {err}");
    }

    #[test]
    fn unknown_runtime_link_is_parse_error() {
        let err = parse(
            r#"
abis = ["x86"]
[package]
name = "mylib"
[[variant]]
name = "release"
runtime_link = "static"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
    }

    #[test]
    fn missing_package_is_parse_error() {
        let err = parse("abis = [\"x86\"]\n").unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
    }

    #[test]
    fn artifact_with_unknown_variant_is_rejected() {
        let mut manifest = parse(LSPLANT).unwrap();
        manifest.artifacts.push(Artifact {
            id: "lsplant-profile".to_owned(),
            variant: "profile".to_owned(),
        });
        let err = manifest.validate().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownArtifactVariant { .. }));
    }

    #[test]
    fn duplicate_artifact_is_rejected() {
        let mut manifest = parse(LSPLANT).unwrap();
        manifest.artifacts.push(Artifact {
            id: "lsplant".to_owned(),
            variant: "debug".to_owned(),
        });
        let err = manifest.validate().unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateArtifact { .. }));
    }

    #[test]
    fn duplicate_module_is_rejected() {
        let mut manifest = parse(LSPLANT).unwrap();
        let first = manifest.modules.first().unwrap().clone();
        manifest.modules.push(first);
        let err = manifest.validate().unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateModule { .. }));
    }

    #[test]
    fn escaping_header_dir_is_rejected() {
        for header_dir in ["../include", "/usr/include", "include/../../outside"] {
            let text = LSPLANT.replace("headers = \"include\"", &format!("headers = \"{header_dir}\""));
            let err = parse(&text).unwrap().validate().unwrap_err();
            assert!(
                matches!(&err, ConfigError::HeaderDirOutsideRoot { name, .. } if name == "lsplant"),
                "{header_dir}: {err}"
            );
        }
    }

    #[test]
    fn artifact_lookup() {
        let manifest = parse(LSPLANT).unwrap();
        assert_eq!(manifest.artifact("lsplant-standalone").unwrap().variant, "standalone");
        let err = manifest.artifact("nope").unwrap_err().to_string();
        assert!(err.contains("lsplant, lsplant-standalone"), "error was: {err}");
    }

    #[test]
    fn from_path_reports_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Manifest::from_path(&tmp.path().join("abipack.toml"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("cannot read"), "error was: {err}");
    }

    #[test]
    fn load_surfaces_validation_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("abipack.toml");
        std::fs::write(
            &path,
            "abis = [\"x86\"]\n[package]\nname = \"mylib\"\n[[variant]]\nname = \"a\"\nbase_on = \"a\"\n",
        )
        .unwrap();
        let err = Manifest::load(&path).unwrap_err().to_string();
        assert!(err.contains("variant inheritance cycle: a -> a"), "error was: {err}");
    }

    #[test]
    fn from_path_reads_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("abipack.toml");
        std::fs::write(&path, LSPLANT).unwrap();
        let manifest = Manifest::from_path(&path).unwrap();
        assert_eq!(manifest.modules().len(), 2);
    }
}
