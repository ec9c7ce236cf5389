//! Capability descriptors and the Prefab package layout they are written into.
//!
//! A descriptor tells a downstream native build where a library's headers are and
//! what its binary is called. Each variant gets one Prefab tree holding every
//! descriptor, test-only ones included; only non-test descriptors are published.

use std::path::{Path, PathBuf};

use serde::Serialize;

use abipack_config::manifest::Module;
use abipack_config::matrix::validate_name;
use abipack_config::{ConfigError, RuntimeLink};

use crate::driver::BuildOutput;
use crate::error::PackagingError;

/// How to consume one compiled library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    /// Module name downstream builds refer to.
    pub logical_name: String,
    /// Header directory, relative to the source root.
    pub header_dir: PathBuf,
    /// Library base name without extension, e.g. `liblsplant`.
    pub binary_name: String,
    pub test_only: bool,
}

/// Build a descriptor, checking that `header_dir` stays inside the source root.
///
/// # Errors
/// Returns `ConfigError::HeaderDirOutsideRoot` for absolute or escaping header
/// paths, and `ConfigError::InvalidName` for names that are not path-safe.
pub fn emit(
    logical_name: &str,
    header_dir: &Path,
    binary_name: &str,
) -> Result<CapabilityDescriptor, ConfigError> {
    validate_name("module", logical_name)?;
    validate_name("library", binary_name)?;
    if !abipack_util::fs::is_contained_relative(header_dir) {
        return Err(ConfigError::HeaderDirOutsideRoot {
            name: logical_name.to_owned(),
            header_dir: header_dir.display().to_string(),
        });
    }
    Ok(CapabilityDescriptor {
        logical_name: logical_name.to_owned(),
        header_dir: header_dir.to_path_buf(),
        binary_name: binary_name.to_owned(),
        test_only: false,
    })
}

/// Emit a descriptor for every declared module.
///
/// # Errors
/// Returns the first invalid module's error.
pub fn emit_all(modules: &[Module]) -> Result<Vec<CapabilityDescriptor>, ConfigError> {
    modules
        .iter()
        .map(|m| {
            emit(&m.name, &m.headers, &m.library).map(|d| CapabilityDescriptor {
                test_only: m.test_only,
                ..d
            })
        })
        .collect()
}

/// Descriptors that belong in published artifacts.
pub fn published(descriptors: &[CapabilityDescriptor]) -> Vec<&CapabilityDescriptor> {
    descriptors.iter().filter(|d| !d.test_only).collect()
}

#[derive(Debug, Serialize)]
struct PrefabPackage<'a> {
    schema_version: u32,
    name: &'a str,
    version: &'a str,
    dependencies: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PrefabModule<'a> {
    export_libraries: Vec<String>,
    library_name: &'a str,
}

#[derive(Debug, Serialize)]
struct PrefabAbi<'a> {
    abi: &'a str,
    api: u32,
    ndk: u32,
    stl: &'a str,
    #[serde(rename = "static")]
    is_static: bool,
}

/// Package-wide values written into Prefab metadata.
#[derive(Debug, Clone)]
pub struct PrefabSettings<'a> {
    pub package_name: &'a str,
    pub version: &'a str,
    pub source_root: &'a Path,
    pub min_sdk: u32,
    pub ndk_major: u32,
}

/// Prefab's name for the C++ runtime a variant links against.
pub fn prefab_stl(link: RuntimeLink) -> &'static str {
    match link {
        RuntimeLink::Shared => "c++_shared",
        RuntimeLink::None => "none",
    }
}

/// Write the Prefab tree for one variant under `package_dir/prefab/`.
///
/// Every descriptor gets `modules/<name>/` with `module.json`, its headers under
/// `include/`, and one `libs/android.<abi>/` directory per built ABI holding
/// `abi.json` and the library. A test-only module whose library was not built is
/// skipped with a warning; a missing published library is an error.
///
/// # Errors
/// Returns a [`PackagingError`] if a published library is missing or any file
/// cannot be written.
pub fn write_prefab(
    package_dir: &Path,
    variant: &str,
    link: RuntimeLink,
    descriptors: &[CapabilityDescriptor],
    outputs: &[&BuildOutput],
    settings: &PrefabSettings<'_>,
) -> Result<PathBuf, PackagingError> {
    let write_err = |e: String| PackagingError::Write {
        variant: variant.to_owned(),
        message: e,
    };

    let prefab_dir = package_dir.join("prefab");
    abipack_util::fs::remove_dir_all_if_exists(&prefab_dir).map_err(|e| write_err(e.to_string()))?;

    let package = PrefabPackage {
        schema_version: 2,
        name: settings.package_name,
        version: settings.version,
        dependencies: Vec::new(),
    };
    write_json(&prefab_dir.join("prefab.json"), &package).map_err(write_err)?;

    for descriptor in descriptors {
        let module_dir = prefab_dir.join("modules").join(&descriptor.logical_name);
        let library_file = format!("{}.so", descriptor.binary_name);

        let missing: Vec<&&BuildOutput> = outputs
            .iter()
            .filter(|o| !o.library_dir.join(&library_file).is_file())
            .collect();
        if let Some(first) = missing.first() {
            if descriptor.test_only {
                tracing::warn!(
                    "{variant}: skipping test-only module {} ({library_file} not built)",
                    descriptor.logical_name
                );
                continue;
            }
            return Err(PackagingError::MissingLibrary {
                variant: variant.to_owned(),
                abi: first.abi,
                library: library_file,
            });
        }

        let module = PrefabModule {
            export_libraries: Vec::new(),
            library_name: &descriptor.binary_name,
        };
        write_json(&module_dir.join("module.json"), &module).map_err(write_err)?;

        let headers = settings.source_root.join(&descriptor.header_dir);
        let copied = abipack_util::fs::copy_dir_all(&headers, &module_dir.join("include"))
            .map_err(|e| write_err(e.to_string()))?;
        if copied == 0 {
            tracing::warn!("{variant}: no headers found in {}", headers.display());
        } else {
            tracing::debug!("{variant}: copied {copied} header(s) for {}", descriptor.logical_name);
        }

        for output in outputs {
            let abi_dir = module_dir.join("libs").join(output.abi.prefab_dir_name());
            let abi = PrefabAbi {
                abi: output.abi.as_str(),
                api: settings.min_sdk.max(output.abi.min_api_level()),
                ndk: settings.ndk_major,
                stl: prefab_stl(link),
                is_static: false,
            };
            write_json(&abi_dir.join("abi.json"), &abi).map_err(write_err)?;
            abipack_util::fs::copy_file(
                &output.library_dir.join(&library_file),
                &abi_dir.join(&library_file),
            )
            .map_err(|e| write_err(e.to_string()))?;
        }
    }

    Ok(prefab_dir)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let mut json = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    json.push('\n');
    abipack_util::fs::write_atomic(path, json.as_bytes()).map_err(|e| e.to_string())
}
