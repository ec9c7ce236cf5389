#![forbid(unsafe_code)]

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use abipack_config::manifest::SigningConfig;
use abipack_engine::{
    Collaborators, GitTags, GpgSigner, Project, Publisher, RunOptions, Signer, VersionControl,
    VersionResolver, MANIFEST_FILE,
};
use abipack_targets::Abi;
use abipack_toolchain::{detect_cmake, detect_ndk, CmakeToolchain};

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Debug, Parser)]
#[command(
    name = "abipack",
    about = "Build, package and publish a native Android library for every ABI"
)]
#[command(version)]
struct Cli {
    /// Path to abipack.toml (defaults to the current directory)
    #[arg(long, global = true)]
    manifest_path: Option<PathBuf>,
    /// Show exact command lines and composed flags
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build variants, emit Prefab descriptors and package debug symbols
    Build {
        /// Variant to build (repeatable; defaults to all)
        #[arg(long = "variant")]
        variants: Vec<String>,
        /// Only build for this ABI (repeatable; defaults to each variant's ABIs)
        #[arg(long = "abi")]
        abis: Vec<Abi>,
        /// Maximum concurrent toolchain invocations
        #[arg(long)]
        jobs: Option<usize>,
    },
    /// Build, package, sign and publish artifacts
    Publish {
        /// Variant whose artifacts are published (repeatable)
        #[arg(long = "variant")]
        variants: Vec<String>,
        /// Artifact to publish (repeatable; defaults to all)
        #[arg(long = "artifact")]
        artifacts: Vec<String>,
        /// Assemble and sign without uploading
        #[arg(long)]
        dry_run: bool,
        /// Maximum concurrent toolchain invocations
        #[arg(long)]
        jobs: Option<usize>,
    },
    /// Print the composed flag set of a variant, one flag per line
    Flags {
        /// Variant name
        variant: String,
    },
    /// Print the version the next publish would use
    Version,
    /// Remove the build directory
    Clean,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let manifest_path = cli
        .manifest_path
        .unwrap_or_else(|| PathBuf::from(MANIFEST_FILE));
    let result = match cli.command {
        Command::Build {
            variants,
            abis,
            jobs,
        } => cmd_build(&manifest_path, variants, abis, jobs),
        Command::Publish {
            variants,
            artifacts,
            dry_run,
            jobs,
        } => cmd_publish(&manifest_path, variants, artifacts, dry_run, jobs),
        Command::Flags { variant } => cmd_flags(&manifest_path, &variant),
        Command::Version => cmd_version(&manifest_path),
        Command::Clean => cmd_clean(&manifest_path),
    };

    if let Err(msg) = result {
        eprintln!("error: {msg}");
        process::exit(1);
    }
}

/// Log abipack's own events to stderr. `RUST_LOG` overrides the default level.
fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("abipack=debug")
        } else {
            EnvFilter::new("abipack=info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn load_project(manifest_path: &Path) -> Result<Project, Box<dyn Error>> {
    if !manifest_path.exists() {
        return Err(format!(
            "no {MANIFEST_FILE} found at {} — run from the project root or pass --manifest-path",
            manifest_path.display()
        )
        .into());
    }
    Ok(Project::load(manifest_path)?)
}

fn cmake_toolchain(project: &Project) -> Result<CmakeToolchain, Box<dyn Error>> {
    let config = &project.manifest.toolchain;
    let ndk_path = config.ndk.as_ref().map(|p| project.root.join(p));
    let ndk = detect_ndk(ndk_path.as_deref())?;
    let cmake = detect_cmake(config.cmake.as_deref())?;
    eprintln!(
        "       Using NDK {} ({}) and CMake {}",
        ndk.revision,
        ndk.path.display(),
        cmake.version
    );
    Ok(CmakeToolchain::new(cmake, ndk)
        .generator(config.generator.clone())
        .min_sdk(config.min_sdk)
        .timeout(config.timeout_secs.map(Duration::from_secs)))
}

fn cmd_build(manifest_path: &Path, variants: Vec<String>, abis: Vec<Abi>, jobs: Option<usize>) -> CliResult {
    let project = load_project(manifest_path)?;
    let options = RunOptions {
        variants,
        abis,
        jobs,
        ..RunOptions::default()
    };
    execute(&project, options, None, None)
}

fn cmd_publish(
    manifest_path: &Path,
    variants: Vec<String>,
    artifacts: Vec<String>,
    dry_run: bool,
    jobs: Option<usize>,
) -> CliResult {
    let project = load_project(manifest_path)?;
    let options = RunOptions {
        variants,
        artifacts,
        jobs,
        publish: true,
        dry_run,
        ..RunOptions::default()
    };

    let signer = project.manifest.signing.as_ref().and_then(gpg_signer);
    let publisher = match project.manifest.publish.as_ref().and_then(|p| p.repository.as_ref()) {
        Some(location) if !dry_run => {
            let token = project
                .manifest
                .publish
                .as_ref()
                .and_then(|p| p.token_env.as_deref())
                .and_then(env_var);
            Some(abipack_engine::open_repository(location, &project.root, token)?)
        }
        _ => None,
    };

    execute(
        &project,
        options,
        publisher.as_deref(),
        signer.as_ref().map(|s| s as &dyn Signer),
    )
}

/// A signer for the configured key. Signing stays off until a key id is set.
fn gpg_signer(signing: &SigningConfig) -> Option<GpgSigner> {
    let key_id = signing.key_id.as_deref()?;
    let passphrase = signing.passphrase_env.as_deref().and_then(env_var);
    Some(GpgSigner::new(&signing.gpg, key_id, passphrase))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn execute(
    project: &Project,
    options: RunOptions,
    publisher: Option<&dyn Publisher>,
    signer: Option<&dyn Signer>,
) -> CliResult {
    let start = Instant::now();
    let toolchain = cmake_toolchain(project)?;
    let ndk_major = toolchain.ndk().major().unwrap_or_else(|| {
        tracing::warn!("cannot read NDK major version from `{}`", toolchain.ndk().revision);
        0
    });
    let options = RunOptions { ndk_major, ..options };
    let vcs = GitTags::new(&project.root);
    let collaborators = Collaborators {
        toolchain: &toolchain,
        vcs: &vcs,
        publisher,
        signer,
    };

    let report = abipack_engine::run(project, &options, &collaborators)?;
    eprint!("{report}");

    if !report.is_success() {
        return Err(format!("{} step(s) failed", report.failure_count()).into());
    }
    eprintln!(
        "    Finished {} {} in {:.2}s",
        project.manifest.package.name,
        report.version.resolved,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn cmd_flags(manifest_path: &Path, variant: &str) -> CliResult {
    let project = load_project(manifest_path)?;
    for flag in project.composer().compose(variant)? {
        println!("{flag}");
    }
    Ok(())
}

fn cmd_version(manifest_path: &Path) -> CliResult {
    let project = load_project(manifest_path)?;
    let vcs = GitTags::new(&project.root);
    println!("{}", resolve_version(&project, &vcs));
    Ok(())
}

fn resolve_version(project: &Project, vcs: &dyn VersionControl) -> String {
    let config = &project.manifest.version;
    VersionResolver::new(vcs, &config.marker, &config.fallback)
        .resolve()
        .resolved
        .clone()
}

fn cmd_clean(manifest_path: &Path) -> CliResult {
    let project = load_project(manifest_path)?;
    abipack_util::fs::remove_dir_all_if_exists(&project.build_dir())?;
    eprintln!("     Cleaned {}", project.build_dir().display());
    Ok(())
}
