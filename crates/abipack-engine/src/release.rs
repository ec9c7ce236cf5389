//! The release pipeline: plan the matrix, build it, package each variant and
//! publish each artifact.
//!
//! Configuration problems abort before the toolchain is invoked. After that,
//! every failure is recorded in the [`RunReport`]: a failed pair blocks only its
//! own variant's packaging, and a blocked or rejected artifact never stops the others.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use abipack_config::manifest::{Artifact, PublishConfig};
use abipack_config::{ConfigError, Manifest, RuntimeLink, VariantMatrix};
use abipack_targets::Abi;
use abipack_toolchain::Toolchain;

use crate::assemble::{assemble, AssembleRequest, SignatureState};
use crate::descriptor::{self, CapabilityDescriptor, PrefabSettings};
use crate::driver::{BuildDriver, BuildOutput, MatrixResult, PairPlan, PairStatus};
use crate::error::{EngineError, PackagingError, PublishError};
use crate::flags::FlagComposer;
use crate::layout::BuildLayout;
use crate::repository::Publisher;
use crate::sign::Signer;
use crate::symbols::{self, SymbolArchive};
use crate::version::{Version, VersionControl, VersionResolver};

/// Name of the project manifest.
pub const MANIFEST_FILE: &str = "abipack.toml";

/// A loaded and validated project.
#[derive(Debug, Clone)]
pub struct Project {
    /// Directory containing `abipack.toml`.
    pub root: PathBuf,
    pub manifest: Manifest,
    pub matrix: VariantMatrix,
}

impl Project {
    /// Load and validate the manifest at `manifest_path`.
    ///
    /// # Errors
    /// Returns an error if the manifest cannot be read, parsed or validated.
    pub fn load(manifest_path: &Path) -> Result<Self, EngineError> {
        let (manifest, matrix) = Manifest::load(manifest_path)?;
        let root = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(Self {
            root,
            manifest,
            matrix,
        })
    }

    pub fn source_root(&self) -> PathBuf {
        self.root.join(&self.manifest.package.source_root)
    }

    pub fn build_dir(&self) -> PathBuf {
        self.root.join(&self.manifest.package.build_dir)
    }

    pub fn layout(&self) -> BuildLayout {
        BuildLayout::new(&self.build_dir())
    }

    pub fn composer(&self) -> FlagComposer<'_> {
        FlagComposer::new(&self.matrix, &self.manifest.flags)
    }
}

/// What a run should do.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Variants to build. Empty means every variant (or those of `artifacts`).
    pub variants: Vec<String>,
    /// Restrict every variant to these ABIs. Empty means no restriction.
    pub abis: Vec<Abi>,
    /// Artifacts to publish. Empty means every artifact of the selected variants.
    pub artifacts: Vec<String>,
    /// Worker count override; falls back to `[toolchain] jobs`.
    pub jobs: Option<usize>,
    pub publish: bool,
    /// Assemble and sign artifacts without handing them to the publisher.
    pub dry_run: bool,
    /// NDK major version recorded in Prefab `abi.json` files.
    pub ndk_major: u32,
}

/// The external systems a run talks to.
pub struct Collaborators<'a> {
    pub toolchain: &'a dyn Toolchain,
    pub vcs: &'a dyn VersionControl,
    pub publisher: Option<&'a dyn Publisher>,
    pub signer: Option<&'a dyn Signer>,
}

/// A variant's packaged outputs.
#[derive(Debug, Clone)]
pub struct VariantPackage {
    /// The variant's `prefab/` directory.
    pub prefab_dir: PathBuf,
    /// One symbol archive per owning artifact.
    pub symbols: Vec<SymbolArchive>,
}

#[derive(Debug, Clone)]
pub struct VariantReport {
    pub variant: String,
    pub outcome: Result<VariantPackage, PackagingError>,
}

/// How an artifact left the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published {
        location: String,
        signature: SignatureState,
    },
    /// Dry run: files were staged but not handed to a publisher.
    Staged {
        dir: PathBuf,
        signature: SignatureState,
    },
}

#[derive(Debug)]
pub struct ArtifactReport {
    pub artifact: String,
    pub variant: String,
    pub outcome: Result<PublishOutcome, PublishError>,
}

/// Everything that happened in one run.
#[derive(Debug)]
pub struct RunReport {
    pub version: Version,
    pub matrix: MatrixResult,
    pub variants: Vec<VariantReport>,
    pub artifacts: Vec<ArtifactReport>,
}

impl RunReport {
    /// Whether every pair, every variant's packaging and every artifact succeeded.
    pub fn is_success(&self) -> bool {
        self.failure_count() == 0
    }

    /// Failed pairs, packaging steps and artifacts. A variant left unpackaged
    /// because the run was narrowed to some of its ABIs is not a failure; an
    /// artifact that needed it is.
    pub fn failure_count(&self) -> usize {
        self.matrix.failed_count()
            + self
                .variants
                .iter()
                .filter(|v| matches!(&v.outcome, Err(e) if !matches!(e, PackagingError::PartialAbis { .. })))
                .count()
            + self.artifacts.iter().filter(|a| a.outcome.is_err()).count()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for output in self.matrix.outputs() {
            let pair = format!("{}/{}", output.variant, output.abi);
            match &output.status {
                PairStatus::Ok => writeln!(f, "{:>12} {pair} ({})", "Built", secs(output.duration))?,
                PairStatus::Failed(reason) => writeln!(f, "{:>12} {pair}: {reason}", "FAILED")?,
            }
        }
        for report in &self.variants {
            match &report.outcome {
                Ok(package) => writeln!(
                    f,
                    "{:>12} {} ({} symbol archive(s))",
                    "Packaged",
                    report.variant,
                    package.symbols.len()
                )?,
                Err(e @ PackagingError::PartialAbis { .. }) => {
                    writeln!(f, "{:>12} {}: {e}", "Skipped", report.variant)?;
                }
                Err(e) => writeln!(f, "{:>12} {}: {e}", "Blocked", report.variant)?,
            }
        }
        for report in &self.artifacts {
            let version = &self.version.resolved;
            match &report.outcome {
                Ok(PublishOutcome::Published {
                    location,
                    signature,
                }) => writeln!(
                    f,
                    "{:>12} {} {version} ({signature}) to {location}",
                    "Published", report.artifact
                )?,
                Ok(PublishOutcome::Staged { dir, signature }) => writeln!(
                    f,
                    "{:>12} {} {version} ({signature}) in {}",
                    "Staged",
                    report.artifact,
                    dir.display()
                )?,
                Err(e) => writeln!(f, "{:>12} {}: {e}", "FAILED", report.artifact)?,
            }
        }
        Ok(())
    }
}

fn secs(duration: Duration) -> String {
    format!("{:.2}s", duration.as_secs_f64())
}

/// Per-variant values fixed before the build starts.
#[derive(Debug, Clone)]
struct VariantPlan {
    name: String,
    flags: Vec<String>,
    build_type: String,
    link: RuntimeLink,
    runtime_flag: String,
    /// Every ABI the variant declares, whether or not this run builds it.
    abis: Vec<Abi>,
}

/// Run the pipeline.
///
/// Steps:
/// 1. Validate descriptors, selections and publishing configuration
/// 2. Compose every selected variant's flags and plan the (variant, ABI) pairs
/// 3. Resolve the version once
/// 4. Build every pair on the worker pool, collecting all outcomes
/// 5. Package each variant whose builds all succeeded (symbols, Prefab tree)
/// 6. Assemble, sign and publish each artifact independently
///
/// # Errors
/// Returns an error for invalid configuration or if the worker pool cannot start.
/// Build, packaging and publish failures are recorded in the report instead.
pub fn run(
    project: &Project,
    options: &RunOptions,
    collaborators: &Collaborators<'_>,
) -> Result<RunReport, EngineError> {
    let manifest = &project.manifest;
    let matrix = &project.matrix;

    // 1. Everything that can be wrong with the configuration fails here.
    let descriptors = descriptor::emit_all(&manifest.modules())?;
    let publish_config = if options.publish {
        let config = manifest
            .publish
            .as_ref()
            .ok_or(ConfigError::MissingPublishSection)?;
        if !options.dry_run && collaborators.publisher.is_none() {
            return Err(ConfigError::MissingRepository.into());
        }
        Some(config)
    } else {
        None
    };
    for abi in &options.abis {
        if !matrix.abis().contains(abi) {
            return Err(ConfigError::AbiNotDeclared { abi: *abi }.into());
        }
    }
    let artifacts = select_artifacts(manifest, options)?;
    let selected = select_variants(matrix, options, &artifacts)?;

    // 2. Flags and pairs.
    let composer = project.composer();
    let mut plans_by_variant = BTreeMap::new();
    for name in &selected {
        let link = matrix.runtime_link(name)?;
        plans_by_variant.insert(
            name.clone(),
            VariantPlan {
                name: name.clone(),
                flags: composer.compose(name)?,
                build_type: matrix.build_type(name)?,
                link,
                runtime_flag: composer.runtime_flag(link).to_owned(),
                abis: matrix.abis_for(name)?,
            },
        );
    }
    let mut pairs = Vec::new();
    for (variant, abi) in matrix.pairs(Some(selected.as_slice()))? {
        if !options.abis.is_empty() && !options.abis.contains(&abi) {
            continue;
        }
        if let Some(plan) = plans_by_variant.get(&variant) {
            pairs.push(PairPlan {
                flags: plan.flags.clone(),
                runtime_flag: plan.runtime_flag.clone(),
                build_type: plan.build_type.clone(),
                variant,
                abi,
            });
        }
    }

    // 3. Version.
    let resolver = VersionResolver::new(
        collaborators.vcs,
        &manifest.version.marker,
        &manifest.version.fallback,
    );
    let version = resolver.resolve().clone();

    // 4. Build.
    let layout = project.layout();
    let source_root = project.source_root();
    let driver = BuildDriver::new(collaborators.toolchain, &layout, &source_root)
        .jobs(options.jobs.or(manifest.toolchain.jobs));
    tracing::info!("building {} pair(s)", pairs.len());
    let result = driver.build_all(&pairs)?;

    // 5. Package.
    let settings = PrefabSettings {
        package_name: &manifest.package.name,
        version: &version.resolved,
        source_root: &source_root,
        min_sdk: manifest.toolchain.min_sdk,
        ndk_major: options.ndk_major,
    };
    let packager = Packager {
        project,
        layout: &layout,
        result: &result,
        descriptors: &descriptors,
        settings: &settings,
    };
    let variants: Vec<VariantReport> = selected
        .iter()
        .filter_map(|name| plans_by_variant.get(name))
        .map(|plan| {
            let owners = symbol_owners(&manifest.package.name, &artifacts, &plan.name);
            let outcome = packager.package(plan, &owners);
            if let Err(e) = &outcome {
                tracing::warn!("{e}");
            }
            VariantReport {
                variant: plan.name.clone(),
                outcome,
            }
        })
        .collect();

    // 6. Publish.
    let artifact_reports = match publish_config {
        Some(config) => {
            let publisher = ArtifactPublisher {
                layout: &layout,
                result: &result,
                descriptors: &descriptors,
                version: &version,
                publish: config,
                collaborators,
                dry_run: options.dry_run,
            };
            artifacts
                .iter()
                .map(|artifact| {
                    let outcome = publisher.publish(artifact, &variants, &plans_by_variant);
                    if let Err(e) = &outcome {
                        tracing::error!("{e}");
                    }
                    ArtifactReport {
                        artifact: artifact.id.clone(),
                        variant: artifact.variant.clone(),
                        outcome,
                    }
                })
                .collect()
        }
        None => Vec::new(),
    };

    Ok(RunReport {
        version,
        matrix: result,
        variants,
        artifacts: artifact_reports,
    })
}

/// Artifacts named in `options`, else those of the selected variants, else all.
fn select_artifacts<'m>(manifest: &'m Manifest, options: &RunOptions) -> Result<Vec<&'m Artifact>, ConfigError> {
    if !options.artifacts.is_empty() {
        return options
            .artifacts
            .iter()
            .map(|id| manifest.artifact(id))
            .collect();
    }
    Ok(manifest
        .artifacts
        .iter()
        .filter(|a| options.variants.is_empty() || options.variants.contains(&a.variant))
        .collect())
}

/// Selected variant names in declaration order.
fn select_variants(
    matrix: &VariantMatrix,
    options: &RunOptions,
    artifacts: &[&Artifact],
) -> Result<Vec<String>, ConfigError> {
    let mut wanted: BTreeSet<&str> = BTreeSet::new();
    for name in &options.variants {
        matrix.get(name)?;
        wanted.insert(name.as_str());
    }
    if !options.artifacts.is_empty() {
        wanted.extend(artifacts.iter().map(|a| a.variant.as_str()));
    }
    Ok(matrix
        .variants()
        .iter()
        .map(|v| v.name.as_str())
        .filter(|name| wanted.is_empty() || wanted.contains(name))
        .map(str::to_owned)
        .collect())
}

/// Owners of a variant's symbol archives: its artifacts, or the package itself.
fn symbol_owners(package: &str, artifacts: &[&Artifact], variant: &str) -> Vec<String> {
    let owners: Vec<String> = artifacts
        .iter()
        .filter(|a| a.variant == variant)
        .map(|a| a.id.clone())
        .collect();
    if owners.is_empty() {
        vec![package.to_owned()]
    } else {
        owners
    }
}

struct Packager<'a> {
    project: &'a Project,
    layout: &'a BuildLayout,
    result: &'a MatrixResult,
    descriptors: &'a [CapabilityDescriptor],
    settings: &'a PrefabSettings<'a>,
}

impl Packager<'_> {
    /// Package one variant. Symbol packaging runs first and refuses incomplete builds,
    /// so a variant with a failed pair gets neither archives nor a Prefab tree.
    fn package(&self, plan: &VariantPlan, owners: &[String]) -> Result<VariantPackage, PackagingError> {
        let excludes = &self.project.manifest.symbols.exclude;
        let symbols = owners
            .iter()
            .map(|owner| symbols::package(self.result, self.layout, &plan.name, &plan.abis, owner, excludes))
            .collect::<Result<Vec<_>, _>>()?;

        let outputs: Vec<&BuildOutput> = self.result.variant_outputs(&plan.name).collect();
        let prefab_dir = descriptor::write_prefab(
            &self.layout.prefab_package_dir(&plan.name),
            &plan.name,
            plan.link,
            self.descriptors,
            &outputs,
            self.settings,
        )?;
        tracing::info!("packaged {} ({} ABI(s))", plan.name, outputs.len());
        Ok(VariantPackage { prefab_dir, symbols })
    }
}

struct ArtifactPublisher<'a> {
    layout: &'a BuildLayout,
    result: &'a MatrixResult,
    descriptors: &'a [CapabilityDescriptor],
    version: &'a Version,
    publish: &'a PublishConfig,
    collaborators: &'a Collaborators<'a>,
    dry_run: bool,
}

impl ArtifactPublisher<'_> {
    fn publish(
        &self,
        artifact: &Artifact,
        variants: &[VariantReport],
        plans: &BTreeMap<String, VariantPlan>,
    ) -> Result<PublishOutcome, PublishError> {
        let not_built = || {
            PublishError::Packaging(PackagingError::NotBuilt {
                variant: artifact.variant.clone(),
            })
        };
        let package = match variants.iter().find(|v| v.variant == artifact.variant) {
            Some(VariantReport { outcome: Ok(p), .. }) => p,
            Some(VariantReport { outcome: Err(e), .. }) => return Err(PublishError::Packaging(e.clone())),
            None => return Err(not_built()),
        };
        let symbols = package
            .symbols
            .iter()
            .find(|s| s.owner == artifact.id)
            .ok_or_else(not_built)?;
        let flags = plans
            .get(&artifact.variant)
            .map(|p| p.flags.as_slice())
            .unwrap_or_default();
        let abis: Vec<Abi> = self
            .result
            .variant_outputs(&artifact.variant)
            .map(|o| o.abi)
            .collect();

        let request = AssembleRequest {
            artifact_id: &artifact.id,
            variant: &artifact.variant,
            version: self.version,
            publish: self.publish,
            prefab_dir: &package.prefab_dir,
            descriptors: self.descriptors,
            symbols,
            abis: &abis,
            flags,
        };
        let mut staged = assemble(self.layout, &request)?;

        if let Some(signer) = self.collaborators.signer {
            staged.sign(signer).map_err(|source| PublishError::Signing {
                artifact: artifact.id.clone(),
                source,
            })?;
        } else {
            tracing::info!("{}: no signer configured, publishing unsigned", artifact.id);
        }

        let Some(publisher) = self.collaborators.publisher.filter(|_| !self.dry_run) else {
            return Ok(PublishOutcome::Staged {
                dir: self.layout.publication_dir(&artifact.id),
                signature: staged.signature,
            });
        };
        publisher
            .publish(&staged)
            .map_err(|source| PublishError::Repository {
                artifact: artifact.id.clone(),
                source,
            })?;
        tracing::info!(
            "published {} {} to {}",
            artifact.id,
            staged.version,
            publisher.location()
        );
        Ok(PublishOutcome::Published {
            location: publisher.location(),
            signature: staged.signature,
        })
    }
}
