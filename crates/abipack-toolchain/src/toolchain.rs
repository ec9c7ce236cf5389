//! The toolchain seam used by the build driver, and its CMake + NDK implementation.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use abipack_targets::Abi;
use abipack_util::process::{display_command, run_command_with_timeout, CommandOutput};

use crate::detect::{CmakeInfo, NdkInfo};
use crate::error::ToolchainError;
use crate::invoke::{detect_toolchain_errors, parse_diagnostics, CmakeCommand, Diagnostic, DiagnosticLevel};

/// Prefix of the NDK's C++ runtime selection.
const STL_DEFINITION: &str = "-DANDROID_STL=";

/// One (variant, ABI) compilation request.
#[derive(Debug, Clone)]
pub struct InvokeRequest<'a> {
    /// Native source tree containing the top-level `CMakeLists.txt`.
    pub source_root: &'a Path,
    pub abi: Abi,
    /// Composed flag set for the variant.
    pub flags: &'a [String],
    /// Flag selecting the variant's effective C++ runtime, added when `flags`
    /// do not already choose one. Empty to leave the runtime to the NDK.
    pub runtime_flag: &'a str,
    /// CMake build type, e.g. `"Release"`.
    pub build_type: &'a str,
    /// Exclusively owned intermediates directory for this pair.
    pub output_dir: &'a Path,
    /// Exclusively owned symbols directory for this pair.
    pub symbols_dir: &'a Path,
}

/// Where a successful invocation left its outputs.
#[derive(Debug, Clone)]
pub struct ToolchainOutput {
    /// Directory holding the linked shared libraries.
    pub library_dir: PathBuf,
    /// Directory holding the split debug symbols.
    pub symbols_dir: PathBuf,
    /// Warnings and notes reported by a successful build.
    pub diagnostics: Vec<Diagnostic>,
}

/// A native toolchain: `(source tree, ABI, flag set) -> binary | diagnostic`.
///
/// Implementations must be callable from several worker threads at once; each call
/// only writes inside the request's output and symbols directories.
pub trait Toolchain: Send + Sync {
    /// Compile and link `request.source_root` for `request.abi`.
    ///
    /// # Errors
    /// Returns a [`ToolchainError`] describing why the pair failed.
    fn invoke(&self, request: &InvokeRequest<'_>) -> Result<ToolchainOutput, ToolchainError>;
}

/// CMake driven through the Android NDK's toolchain file.
#[derive(Debug, Clone)]
pub struct CmakeToolchain {
    cmake: CmakeInfo,
    ndk: NdkInfo,
    generator: Option<String>,
    min_sdk: u32,
    timeout: Option<Duration>,
}

impl CmakeToolchain {
    pub fn new(cmake: CmakeInfo, ndk: NdkInfo) -> Self {
        Self {
            cmake,
            ndk,
            generator: None,
            min_sdk: 21,
            timeout: None,
        }
    }

    /// Set the CMake generator.
    pub fn generator(mut self, generator: Option<String>) -> Self {
        self.generator = generator;
        self
    }

    /// Set the minimum SDK level; each ABI is raised to its own floor.
    pub fn min_sdk(mut self, level: u32) -> Self {
        self.min_sdk = level;
        self
    }

    /// Kill a CMake step that runs longer than `timeout`.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn ndk(&self) -> &NdkInfo {
        &self.ndk
    }

    /// The `ANDROID_PLATFORM` level used for `abi`.
    pub fn platform_level(&self, abi: Abi) -> u32 {
        self.min_sdk.max(abi.min_api_level())
    }

    /// The configured command for `request`, without running it.
    pub fn command(&self, request: &InvokeRequest<'_>) -> CmakeCommand {
        let mut flags = request.flags.to_vec();
        let chooses_runtime = flags
            .iter()
            .any(|f| f == request.runtime_flag || f.starts_with(STL_DEFINITION));
        if !request.runtime_flag.is_empty() && !chooses_runtime {
            flags.push(request.runtime_flag.to_owned());
        }
        let mut cmd = CmakeCommand::new()
            .source_dir(request.source_root)
            .build_dir(&cmake_dir(request.output_dir))
            .toolchain_file(&self.ndk.toolchain_file())
            .abi(request.abi)
            .platform(self.platform_level(request.abi))
            .build_type(request.build_type)
            .library_output_dir(&library_dir(request.output_dir))
            .symbols_dir(request.symbols_dir)
            .flags(&flags);
        if let Some(generator) = &self.generator {
            cmd = cmd.generator(generator);
        }
        cmd
    }

    fn run_step(
        &self,
        abi: Abi,
        stage: &'static str,
        args: &[String],
    ) -> Result<Vec<Diagnostic>, ToolchainError> {
        let mut cmd = Command::new(&self.cmake.path);
        cmd.args(args);
        tracing::debug!("{abi}: {}", display_command(&cmd));

        let output = run_command_with_timeout(&mut cmd, self.timeout)?;
        if output.timed_out {
            return Err(ToolchainError::TimedOut {
                abi,
                stage,
                seconds: self.timeout.map(|t| t.as_secs()).unwrap_or_default(),
            });
        }

        let diagnostics = collect_diagnostics(&output);
        if !output.success {
            return Err(ToolchainError::StepFailed {
                abi,
                stage,
                detail: failure_detail(&diagnostics, &output),
            });
        }
        Ok(diagnostics)
    }
}

impl Toolchain for CmakeToolchain {
    fn invoke(&self, request: &InvokeRequest<'_>) -> Result<ToolchainOutput, ToolchainError> {
        if !request.source_root.join("CMakeLists.txt").is_file() {
            return Err(ToolchainError::NoCmakeLists {
                path: request.source_root.to_path_buf(),
            });
        }

        let library_dir = library_dir(request.output_dir);
        abipack_util::fs::ensure_dir(&library_dir)?;
        abipack_util::fs::ensure_dir(request.symbols_dir)?;

        let cmd = self.command(request);
        let mut diagnostics = self.run_step(request.abi, "configure", &cmd.configure_args()?)?;
        diagnostics.extend(self.run_step(request.abi, "build", &cmd.build_args()?)?);

        Ok(ToolchainOutput {
            library_dir,
            symbols_dir: request.symbols_dir.to_path_buf(),
            diagnostics,
        })
    }
}

/// CMake build tree inside a pair's intermediates directory.
pub fn cmake_dir(output_dir: &Path) -> PathBuf {
    output_dir.join("cmake")
}

/// Linked libraries inside a pair's intermediates directory.
pub fn library_dir(output_dir: &Path) -> PathBuf {
    output_dir.join("lib")
}

fn collect_diagnostics(output: &CommandOutput) -> Vec<Diagnostic> {
    let combined = format!("{}\n{}", output.stdout, output.stderr);
    let mut diagnostics = parse_diagnostics(&combined);
    detect_toolchain_errors(&combined, &mut diagnostics);
    diagnostics
}

/// The first error diagnostic, or the last stderr line when nothing parsed.
fn failure_detail(diagnostics: &[Diagnostic], output: &CommandOutput) -> String {
    let errors: Vec<&Diagnostic> = diagnostics
        .iter()
        .filter(|d| d.level == DiagnosticLevel::Error)
        .collect();
    match errors.first() {
        Some(first) if errors.len() > 1 => format!("{first} (and {} more error(s))", errors.len() - 1),
        Some(first) => first.to_string(),
        None => output
            .stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_owned())
            .unwrap_or_else(|| match output.exit_code {
                Some(code) => format!("exited with code {code}"),
                None => "terminated by signal".to_owned(),
            }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn toolchain(cmake: &Path) -> CmakeToolchain {
        CmakeToolchain::new(
            CmakeInfo {
                path: cmake.to_path_buf(),
                version: "3.22.1".to_owned(),
            },
            NdkInfo {
                path: PathBuf::from("/ndk"),
                revision: "26.1.10909125".to_owned(),
            },
        )
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-cmake");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn source_tree(dir: &Path) -> PathBuf {
        let src = dir.join("jni");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("CMakeLists.txt"), "project(lsplant)\n").unwrap();
        src
    }

    #[test]
    fn platform_level_respects_abi_floor() {
        let tc = toolchain(Path::new("cmake")).min_sdk(21);
        assert_eq!(tc.platform_level(Abi::Arm64V8a), 21);
        assert_eq!(tc.platform_level(Abi::Riscv64), 35);
        let tc = tc.min_sdk(28);
        assert_eq!(tc.platform_level(Abi::X86), 28);
    }

    #[test]
    fn command_uses_pair_directories() {
        let tc = toolchain(Path::new("cmake")).generator(Some("Ninja".to_owned()));
        let flags = vec!["-DANDROID_STL=c++_shared".to_owned()];
        let request = InvokeRequest {
            source_root: Path::new("jni"),
            abi: Abi::X86_64,
            flags: &flags,
            runtime_flag: "-DANDROID_STL=c++_shared",
            build_type: "Release",
            output_dir: Path::new("out/intermediates/release/x86_64"),
            symbols_dir: Path::new("out/symbols/release/x86_64"),
        };
        let args = tc.command(&request).configure_args().unwrap();
        assert!(args.contains(&"out/intermediates/release/x86_64/cmake".to_owned()));
        assert!(args.contains(&"-DCMAKE_LIBRARY_OUTPUT_DIRECTORY=out/intermediates/release/x86_64/lib".to_owned()));
        assert!(args.contains(&"-DDEBUG_SYMBOLS_PATH=out/symbols/release/x86_64".to_owned()));
        assert!(args.contains(&"-DCMAKE_TOOLCHAIN_FILE=/ndk/build/cmake/android.toolchain.cmake".to_owned()));
        assert_eq!(args.iter().filter(|a| a.starts_with("-DANDROID_STL=")).count(), 1);
        assert!(args.contains(&"-DANDROID_STL=c++_shared".to_owned()));
        assert!(args.contains(&"Ninja".to_owned()));
    }

    #[test]
    fn command_passes_runtime_when_flags_leave_it_out() {
        let tc = toolchain(Path::new("cmake"));
        let flags = vec!["-O2".to_owned()];
        let request = InvokeRequest {
            source_root: Path::new("jni"),
            abi: Abi::Arm64V8a,
            flags: &flags,
            runtime_flag: "-DANDROID_STL=c++_shared",
            build_type: "Release",
            output_dir: Path::new("out/intermediates/release/arm64-v8a"),
            symbols_dir: Path::new("out/symbols/release/arm64-v8a"),
        };
        let args = tc.command(&request).configure_args().unwrap();
        assert!(args.contains(&"-DANDROID_STL=c++_shared".to_owned()));
    }

    #[test]
    fn command_keeps_runtime_chosen_by_flags() {
        let tc = toolchain(Path::new("cmake"));
        let flags = vec!["-DANDROID_STL=c++_shared".to_owned(), "-DANDROID_STL=none".to_owned()];
        let request = InvokeRequest {
            source_root: Path::new("jni"),
            abi: Abi::X86,
            flags: &flags,
            runtime_flag: "-DANDROID_STL=none",
            build_type: "Release",
            output_dir: Path::new("out/intermediates/standalone/x86"),
            symbols_dir: Path::new("out/symbols/standalone/x86"),
        };
        let args = tc.command(&request).configure_args().unwrap();
        let stl: Vec<&String> = args.iter().filter(|a| a.starts_with("-DANDROID_STL=")).collect();
        assert_eq!(stl.last().map(|a| a.as_str()), Some("-DANDROID_STL=none"));
        assert_eq!(stl.len(), 2);
    }

    #[test]
    fn invoke_without_cmakelists_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let tc = toolchain(Path::new("cmake"));
        let request = InvokeRequest {
            source_root: tmp.path(),
            abi: Abi::X86,
            flags: &[],
            runtime_flag: "",
            build_type: "Release",
            output_dir: &tmp.path().join("out"),
            symbols_dir: &tmp.path().join("sym"),
        };
        let err = tc.invoke(&request).unwrap_err();
        assert!(matches!(err, ToolchainError::NoCmakeLists { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn invoke_success_with_fake_cmake() {
        let tmp = tempfile::tempdir().unwrap();
        let src = source_tree(tmp.path());
        let cmake = script(tmp.path(), "echo 'a.cc:1:1: warning: unused'; exit 0");
        let tc = toolchain(&cmake);
        let out = tmp.path().join("out");
        let sym = tmp.path().join("sym");
        let request = InvokeRequest {
            source_root: &src,
            abi: Abi::Arm64V8a,
            flags: &[],
            runtime_flag: "",
            build_type: "Release",
            output_dir: &out,
            symbols_dir: &sym,
        };

        let result = tc.invoke(&request).unwrap();
        assert_eq!(result.library_dir, out.join("lib"));
        assert!(result.library_dir.is_dir());
        assert!(sym.is_dir());
        // One warning per step.
        assert_eq!(result.diagnostics.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn invoke_failure_reports_first_error() {
        let tmp = tempfile::tempdir().unwrap();
        let src = source_tree(tmp.path());
        let cmake = script(
            tmp.path(),
            "echo 'hook.cc:7:3: error: no member named art' >&2; exit 1",
        );
        let tc = toolchain(&cmake);
        let request = InvokeRequest {
            source_root: &src,
            abi: Abi::X86,
            flags: &[],
            runtime_flag: "",
            build_type: "Release",
            output_dir: &tmp.path().join("out"),
            symbols_dir: &tmp.path().join("sym"),
        };

        let err = tc.invoke(&request).unwrap_err().to_string();
        assert!(err.contains("x86: cmake configure failed"), "error was: {err}");
        assert!(err.contains("hook.cc:7: no member named art"), "error was: {err}");
    }

    #[cfg(unix)]
    #[test]
    fn invoke_timeout_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let src = source_tree(tmp.path());
        let cmake = script(tmp.path(), "exec sleep 30");
        let tc = toolchain(&cmake).timeout(Some(Duration::from_millis(200)));
        let request = InvokeRequest {
            source_root: &src,
            abi: Abi::X86_64,
            flags: &[],
            runtime_flag: "",
            build_type: "Release",
            output_dir: &tmp.path().join("out"),
            symbols_dir: &tmp.path().join("sym"),
        };

        let err = tc.invoke(&request).unwrap_err();
        assert!(matches!(err, ToolchainError::TimedOut { stage: "configure", .. }));
    }

    #[test]
    fn failure_detail_falls_back_to_stderr() {
        let output = CommandOutput {
            stdout: String::new(),
            stderr: "ninja: build stopped\n\n".to_owned(),
            success: false,
            exit_code: Some(1),
            timed_out: false,
        };
        assert_eq!(failure_detail(&[], &output), "ninja: build stopped");

        let silent = CommandOutput {
            stderr: String::new(),
            ..output
        };
        assert_eq!(failure_detail(&[], &silent), "exited with code 1");
    }
}
