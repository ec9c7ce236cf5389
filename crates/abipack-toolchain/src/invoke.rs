//! CMake invocation and diagnostics normalization.

use std::path::{Path, PathBuf};

use abipack_targets::Abi;

use crate::error::ToolchainError;

/// Severity level of a compiler or CMake diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Note,
}

/// A single structured diagnostic from clang or CMake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity level.
    pub level: DiagnosticLevel,
    /// Human-readable message.
    pub message: String,
    /// Source file path, if available.
    pub file: Option<String>,
    /// Line number in the source file, if available.
    pub line: Option<u32>,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{file}:{line}: {}", self.message),
            (Some(file), None) => write!(f, "{file}: {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// Builder for the two CMake steps of one (variant, ABI) build.
///
/// Flags are routed the way the NDK's CMake integration expects them: `-D<name>=<value>`
/// entries become CMake cache definitions, everything else is appended to both
/// `CMAKE_C_FLAGS` and `CMAKE_CXX_FLAGS`. Relative order within each group is kept.
#[derive(Debug, Default, Clone)]
pub struct CmakeCommand {
    source_dir: Option<PathBuf>,
    build_dir: Option<PathBuf>,
    generator: Option<String>,
    toolchain_file: Option<PathBuf>,
    abi: Option<Abi>,
    platform: Option<u32>,
    build_type: Option<String>,
    library_output_dir: Option<PathBuf>,
    symbols_dir: Option<PathBuf>,
    flags: Vec<String>,
}

impl CmakeCommand {
    /// Create a new empty command builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the directory holding the top-level `CMakeLists.txt`.
    pub fn source_dir(mut self, path: &Path) -> Self {
        self.source_dir = Some(path.to_path_buf());
        self
    }

    /// Set the CMake binary (build tree) directory.
    pub fn build_dir(mut self, path: &Path) -> Self {
        self.build_dir = Some(path.to_path_buf());
        self
    }

    /// Set the CMake generator, e.g. `"Ninja"`.
    pub fn generator(mut self, generator: &str) -> Self {
        self.generator = Some(generator.to_owned());
        self
    }

    /// Set the toolchain file (`CMAKE_TOOLCHAIN_FILE`).
    pub fn toolchain_file(mut self, path: &Path) -> Self {
        self.toolchain_file = Some(path.to_path_buf());
        self
    }

    /// Set the target ABI (`ANDROID_ABI`).
    pub fn abi(mut self, abi: Abi) -> Self {
        self.abi = Some(abi);
        self
    }

    /// Set the platform API level (`ANDROID_PLATFORM=android-<level>`).
    pub fn platform(mut self, level: u32) -> Self {
        self.platform = Some(level);
        self
    }

    /// Set the build type (`CMAKE_BUILD_TYPE`).
    pub fn build_type(mut self, build_type: &str) -> Self {
        self.build_type = Some(build_type.to_owned());
        self
    }

    /// Set where linked shared libraries are written.
    pub fn library_output_dir(mut self, path: &Path) -> Self {
        self.library_output_dir = Some(path.to_path_buf());
        self
    }

    /// Set where the native build writes split debug symbols (`DEBUG_SYMBOLS_PATH`).
    pub fn symbols_dir(mut self, path: &Path) -> Self {
        self.symbols_dir = Some(path.to_path_buf());
        self
    }

    /// Set the composed flag set.
    pub fn flags(mut self, flags: &[String]) -> Self {
        self.flags = flags.to_vec();
        self
    }

    /// Build the argument list for the configure step without executing.
    ///
    /// # Errors
    /// Returns an error if the source or build directory is not set.
    pub fn configure_args(&self) -> Result<Vec<String>, ToolchainError> {
        let Some(source_dir) = &self.source_dir else {
            return Err(ToolchainError::NoSourceDir);
        };
        let Some(build_dir) = &self.build_dir else {
            return Err(ToolchainError::NoBuildDir);
        };

        let mut args = vec![
            "-S".to_owned(),
            source_dir.display().to_string(),
            "-B".to_owned(),
            build_dir.display().to_string(),
        ];

        if let Some(generator) = &self.generator {
            args.push("-G".to_owned());
            args.push(generator.clone());
        }
        if let Some(file) = &self.toolchain_file {
            args.push(format!("-DCMAKE_TOOLCHAIN_FILE={}", file.display()));
        }
        if let Some(abi) = self.abi {
            args.push(format!("-DANDROID_ABI={abi}"));
        }
        if let Some(level) = self.platform {
            args.push(format!("-DANDROID_PLATFORM=android-{level}"));
        }
        if let Some(build_type) = &self.build_type {
            args.push(format!("-DCMAKE_BUILD_TYPE={build_type}"));
        }
        if let Some(dir) = &self.library_output_dir {
            args.push(format!("-DCMAKE_LIBRARY_OUTPUT_DIRECTORY={}", dir.display()));
        }
        if let Some(dir) = &self.symbols_dir {
            args.push(format!("-DDEBUG_SYMBOLS_PATH={}", dir.display()));
        }

        let (definitions, compiler_flags) = split_flags(&self.flags);
        args.extend(definitions);
        if !compiler_flags.is_empty() {
            let joined = compiler_flags.join(" ");
            args.push(format!("-DCMAKE_C_FLAGS={joined}"));
            args.push(format!("-DCMAKE_CXX_FLAGS={joined}"));
        }

        Ok(args)
    }

    /// Build the argument list for the build step without executing.
    ///
    /// # Errors
    /// Returns an error if the build directory is not set.
    pub fn build_args(&self) -> Result<Vec<String>, ToolchainError> {
        let Some(build_dir) = &self.build_dir else {
            return Err(ToolchainError::NoBuildDir);
        };
        Ok(vec!["--build".to_owned(), build_dir.display().to_string()])
    }
}

/// Split a flag set into CMake definitions and compiler flags, keeping order.
fn split_flags(flags: &[String]) -> (Vec<String>, Vec<String>) {
    flags
        .iter()
        .cloned()
        .partition(|flag| flag.starts_with("-D") && flag.contains('='))
}

/// Parse clang and CMake output into structured diagnostics.
///
/// Handles:
/// - `src/hook.cpp:10:5: error: message`
/// - `error: message` / `fatal error: message`
/// - `CMake Error at CMakeLists.txt:12 (add_library):` followed by an indented message
pub fn parse_diagnostics(output: &str) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let mut lines = output.lines().peekable();

    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(mut diag) = try_parse_cmake_diagnostic(trimmed) {
            // CMake puts the message on the following indented lines.
            let mut message = Vec::new();
            while let Some(next) = lines.peek() {
                if next.starts_with(' ') && !next.trim().is_empty() {
                    message.push(next.trim().to_owned());
                    lines.next();
                } else {
                    break;
                }
            }
            if !message.is_empty() {
                diag.message = message.join(" ");
            }
            diagnostics.push(diag);
        } else if let Some(diag) = try_parse_located_diagnostic(trimmed) {
            diagnostics.push(diag);
        } else if let Some(diag) = try_parse_bare_diagnostic(trimmed) {
            diagnostics.push(diag);
        }
    }

    diagnostics
}

/// `CMake Error at CMakeLists.txt:12 (add_library):` / `CMake Warning (dev) at ...`
fn try_parse_cmake_diagnostic(line: &str) -> Option<Diagnostic> {
    let rest = line.strip_prefix("CMake ")?;
    let (level, rest) = if let Some(r) = rest.strip_prefix("Error") {
        (DiagnosticLevel::Error, r)
    } else if let Some(r) = rest.strip_prefix("Warning") {
        (DiagnosticLevel::Warning, r)
    } else {
        return None;
    };

    let (file, line_no) = match rest.find(" at ") {
        Some(pos) => {
            let location = rest.get(pos + 4..)?;
            let location = location.split(' ').next().unwrap_or(location);
            let location = location.trim_end_matches(':');
            match location.rsplit_once(':') {
                Some((file, n)) => (Some(file.to_owned()), n.parse().ok()),
                None => (Some(location.to_owned()), None),
            }
        }
        None => (None, None),
    };

    Some(Diagnostic {
        level,
        message: line.trim_end_matches(':').to_owned(),
        file,
        line: line_no,
    })
}

/// `file.cpp:10:5: error: message`
fn try_parse_located_diagnostic(line: &str) -> Option<Diagnostic> {
    for marker in [": fatal error:", ": error:", ": warning:", ": note:"] {
        if let Some(pos) = line.find(marker) {
            let before = line.get(..pos)?;
            let after = line.get(pos + 2..)?;
            let Some((file, line_no)) = parse_file_and_line(before) else {
                continue;
            };
            let (level, message) = parse_level_message(after)?;
            return Some(Diagnostic {
                level,
                message,
                file: Some(file),
                line: Some(line_no),
            });
        }
    }
    None
}

fn parse_file_and_line(s: &str) -> Option<(String, u32)> {
    let mut parts: Vec<&str> = s.rsplitn(3, ':').collect();
    parts.reverse();

    match parts.as_slice() {
        [file, line, col] if col.chars().all(|c| c.is_ascii_digit()) => {
            Some(((*file).to_owned(), line.parse().ok()?))
        }
        [.., file, line] => Some(((*file).to_owned(), line.parse().ok()?)),
        _ => None,
    }
}

fn try_parse_bare_diagnostic(line: &str) -> Option<Diagnostic> {
    let (level, message) = parse_level_message(line)?;
    Some(Diagnostic {
        level,
        message,
        file: None,
        line: None,
    })
}

fn parse_level_message(s: &str) -> Option<(DiagnosticLevel, String)> {
    let prefixes = [
        ("fatal error:", DiagnosticLevel::Error),
        ("error:", DiagnosticLevel::Error),
        ("warning:", DiagnosticLevel::Warning),
        ("note:", DiagnosticLevel::Note),
    ];

    prefixes.into_iter().find_map(|(prefix, level)| {
        s.strip_prefix(prefix)
            .map(|msg| (level, msg.trim().to_owned()))
    })
}

/// Detect host toolchain problems and add actionable diagnostics.
pub fn detect_toolchain_errors(output: &str, diagnostics: &mut Vec<Diagnostic>) {
    if output.contains("CMAKE_MAKE_PROGRAM is not set")
        || output.contains("Could not create named generator Ninja")
    {
        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Error,
            message: "ninja not found — install ninja or set [toolchain] generator".to_owned(),
            file: None,
            line: None,
        });
    }

    if output.contains("Could not find toolchain file") {
        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Error,
            message: "NDK CMake toolchain file missing — check [toolchain] ndk / ANDROID_NDK_HOME"
                .to_owned(),
            file: None,
            line: None,
        });
    }
}
