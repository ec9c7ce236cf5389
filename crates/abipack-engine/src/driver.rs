//! Native build driver: one toolchain invocation per (variant, ABI) pair.
//!
//! Pairs run on a bounded rayon pool. Every pair produces a [`BuildOutput`]; a
//! failing pair is recorded as data and never stops its siblings.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::{IntoParallelRefIterator, ParallelIterator};

use abipack_targets::Abi;
use abipack_toolchain::{InvokeRequest, Toolchain};

use crate::diagnostics::log_diagnostics;
use crate::error::EngineError;
use crate::layout::BuildLayout;

/// What to build for one pair.
#[derive(Debug, Clone)]
pub struct PairPlan {
    pub variant: String,
    pub abi: Abi,
    pub flags: Vec<String>,
    /// Runtime flag for the variant's effective link mode.
    pub runtime_flag: String,
    pub build_type: String,
}

/// Outcome of one pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairStatus {
    Ok,
    Failed(String),
}

/// The immutable result of building one (variant, ABI) pair.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub variant: String,
    pub abi: Abi,
    /// Where the linked libraries are (or would have been) written.
    pub library_dir: PathBuf,
    /// Where the split debug symbols are (or would have been) written.
    pub symbols_dir: PathBuf,
    pub status: PairStatus,
    pub duration: Duration,
}

impl BuildOutput {
    pub fn is_ok(&self) -> bool {
        self.status == PairStatus::Ok
    }
}

/// Every pair's outcome for one run, in plan order.
#[derive(Debug, Clone, Default)]
pub struct MatrixResult {
    outputs: Vec<BuildOutput>,
}

impl MatrixResult {
    pub fn new(outputs: Vec<BuildOutput>) -> Self {
        Self { outputs }
    }

    pub fn outputs(&self) -> &[BuildOutput] {
        &self.outputs
    }

    /// Whether every pair succeeded.
    pub fn is_success(&self) -> bool {
        self.outputs.iter().all(BuildOutput::is_ok)
    }

    /// The outputs of one variant, in ABI plan order.
    pub fn variant_outputs<'a>(&'a self, variant: &'a str) -> impl Iterator<Item = &'a BuildOutput> + 'a {
        self.outputs.iter().filter(move |o| o.variant == variant)
    }

    /// ABIs whose build failed for `variant`.
    pub fn failed_abis(&self, variant: &str) -> Vec<Abi> {
        self.variant_outputs(variant)
            .filter(|o| !o.is_ok())
            .map(|o| o.abi)
            .collect()
    }

    pub fn failed_count(&self) -> usize {
        self.outputs.iter().filter(|o| !o.is_ok()).count()
    }
}

/// Runs the toolchain over a set of pairs.
pub struct BuildDriver<'a> {
    toolchain: &'a dyn Toolchain,
    layout: &'a BuildLayout,
    source_root: &'a Path,
    jobs: usize,
    cancelled: Arc<AtomicBool>,
}

impl<'a> BuildDriver<'a> {
    pub fn new(toolchain: &'a dyn Toolchain, layout: &'a BuildLayout, source_root: &'a Path) -> Self {
        Self {
            toolchain,
            layout,
            source_root,
            jobs: default_jobs(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Limit concurrent toolchain invocations. `None` keeps available parallelism.
    pub fn jobs(mut self, jobs: Option<usize>) -> Self {
        if let Some(n) = jobs {
            self.jobs = n.max(1);
        }
        self
    }

    /// A flag that, once set, makes every pair not yet started fail as cancelled.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Build one pair into its own directories, clearing any previous outputs first.
    ///
    /// Never fails: toolchain and filesystem errors become `PairStatus::Failed`.
    pub fn build(&self, plan: &PairPlan) -> BuildOutput {
        let start = Instant::now();
        let output_dir = self.layout.intermediates_dir(&plan.variant, plan.abi);
        let symbols_dir = self.layout.symbols_dir(&plan.variant, plan.abi);
        let mut output = BuildOutput {
            variant: plan.variant.clone(),
            abi: plan.abi,
            library_dir: abipack_toolchain::toolchain::library_dir(&output_dir),
            symbols_dir: symbols_dir.clone(),
            status: PairStatus::Ok,
            duration: Duration::ZERO,
        };

        if self.cancelled.load(Ordering::SeqCst) {
            output.status = PairStatus::Failed("cancelled".to_owned());
            return output;
        }

        tracing::info!("compiling {} for {}", plan.variant, plan.abi);
        if let Err(e) = self.layout.clear_pair(&plan.variant, plan.abi) {
            output.status = PairStatus::Failed(e.to_string());
            return output;
        }

        let request = InvokeRequest {
            source_root: self.source_root,
            abi: plan.abi,
            flags: &plan.flags,
            runtime_flag: &plan.runtime_flag,
            build_type: &plan.build_type,
            output_dir: &output_dir,
            symbols_dir: &symbols_dir,
        };
        match self.toolchain.invoke(&request) {
            Ok(result) => {
                log_diagnostics(&plan.variant, plan.abi, &result.diagnostics);
                output.library_dir = result.library_dir;
                output.symbols_dir = result.symbols_dir;
            }
            Err(e) => {
                tracing::error!("{}/{}: {e}", plan.variant, plan.abi);
                output.status = PairStatus::Failed(e.to_string());
            }
        }
        output.duration = start.elapsed();
        output
    }

    /// Build every planned pair on the worker pool and collect all outcomes.
    ///
    /// # Errors
    /// Returns an error only if the worker pool cannot be created.
    pub fn build_all(&self, plans: &[PairPlan]) -> Result<MatrixResult, EngineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
            .map_err(|e| EngineError::WorkerPool {
                message: e.to_string(),
            })?;

        let outputs: Vec<BuildOutput> =
            pool.install(|| plans.par_iter().map(|plan| self.build(plan)).collect());
        Ok(MatrixResult::new(outputs))
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}
