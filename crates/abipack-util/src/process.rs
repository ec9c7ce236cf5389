//! Process execution helpers for abipack.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::UtilError;

/// How often a running child is polled while waiting on a timeout.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to keep reading a killed child's pipes before giving up on them.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Structured output from a command execution.
#[derive(Debug)]
pub struct CommandOutput {
    /// Standard output as a string.
    pub stdout: String,
    /// Standard error as a string.
    pub stderr: String,
    /// Whether the command exited successfully.
    pub success: bool,
    /// The exit code, if the process was not killed by a signal.
    pub exit_code: Option<i32>,
    /// Whether the process was killed because it exceeded its timeout.
    pub timed_out: bool,
}

/// Execute a command and capture its output.
///
/// # Errors
/// Returns an error if the command cannot be spawned (e.g. binary not found).
/// A non-zero exit code is **not** an error; check `CommandOutput::success` instead.
pub fn run_command(cmd: &mut Command) -> Result<CommandOutput, UtilError> {
    let output = cmd.output().map_err(|source| UtilError::CommandExec {
        program: program_name(cmd),
        source,
    })?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        success: output.status.success(),
        exit_code: output.status.code(),
        timed_out: false,
    })
}

/// Execute a command, killing it if it runs longer than `timeout`.
///
/// With `timeout = None` this behaves like [`run_command`]. Output pipes are drained
/// on background threads so a chatty child never blocks on a full pipe.
///
/// On Unix the child leads its own process group and a timeout kills the whole
/// group, so build tools it spawned die with it. Output captured before the kill
/// is returned; pipes still held open by a stray descendant are abandoned.
///
/// # Errors
/// Returns an error if the command cannot be spawned or waited on.
/// Timing out is **not** an error; check `CommandOutput::timed_out` instead.
pub fn run_command_with_timeout(
    cmd: &mut Command,
    timeout: Option<Duration>,
) -> Result<CommandOutput, UtilError> {
    let Some(timeout) = timeout else {
        return run_command(cmd);
    };

    let program = program_name(cmd);
    #[cfg(unix)]
    std::os::unix::process::CommandExt::process_group(cmd, 0);
    let mut child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| UtilError::CommandExec {
            program: program.clone(),
            source,
        })?;

    let stdout_reader = drain(child.stdout.take());
    let stderr_reader = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let (status, timed_out) = loop {
        match child.try_wait() {
            Ok(Some(status)) => break (Some(status), false),
            Ok(None) if Instant::now() >= deadline => {
                kill(&mut child);
                break (child.wait().ok(), true);
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(source) => {
                kill(&mut child);
                return Err(UtilError::CommandExec { program, source });
            }
        }
    };

    let wait = timed_out.then_some(DRAIN_GRACE);
    let stdout = stdout_reader.collect(wait);
    let stderr = stderr_reader.collect(wait);

    Ok(CommandOutput {
        stdout,
        stderr,
        success: !timed_out && status.is_some_and(|s| s.success()),
        exit_code: status.and_then(|s| s.code()),
        timed_out,
    })
}

/// Output read so far from one pipe of a running child.
struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    closed: mpsc::Receiver<()>,
}

impl Drain {
    /// Wait for the pipe to close, at most `wait` when given, and return what was read.
    fn collect(self, wait: Option<Duration>) -> String {
        // The reader thread drops its sender on EOF, which ends either wait.
        match wait {
            Some(limit) => {
                let _ = self.closed.recv_timeout(limit);
            }
            None => {
                let _ = self.closed.recv();
            }
        }
        let buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Drain {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let (sender, closed) = mpsc::channel::<()>();
    let shared = Arc::clone(&buf);
    std::thread::spawn(move || {
        let _sender = sender;
        let Some(mut pipe) = pipe else {
            return;
        };
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let Some(read) = chunk.get(..n) else {
                        break;
                    };
                    shared
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(read);
                }
            }
        }
    });
    Drain { buf, closed }
}

fn kill(child: &mut Child) {
    #[cfg(unix)]
    kill_group(child);
    if let Err(e) = child.kill() {
        tracing::debug!("cannot kill child process {}: {e}", child.id());
    }
}

/// Kill every process in the child's group.
#[cfg(unix)]
fn kill_group(child: &Child) {
    let group = format!("-{}", child.id());
    match Command::new("kill").args(["-KILL", "--", &group]).output() {
        Ok(output) if output.status.success() => {}
        Ok(output) => tracing::debug!(
            "cannot kill process group {group}: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ),
        Err(e) => tracing::debug!("cannot run kill for process group {group}: {e}"),
    }
}

fn program_name(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

/// Render a command line for logging.
pub fn display_command(cmd: &Command) -> String {
    let mut parts = vec![program_name(cmd)];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}
