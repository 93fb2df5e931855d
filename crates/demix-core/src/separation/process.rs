//! Blocking subprocess execution with a wall-clock deadline
//!
//! stdout/stderr are drained on helper threads. The calling thread polls
//! `try_wait` until the child exits or the deadline passes, in which case the
//! child is killed and reaped.
//!
//! On Unix the child leads its own process group and a timeout kills the whole
//! group, so wrapper scripts and forked workers die with it instead of writing
//! into a workspace that has already been released.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{JobError, Result};

/// How often the child is polled for exit
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Diagnostics longer than this keep only their tail
const MAX_DIAGNOSTIC_CHARS: usize = 4000;

/// Captured result of a finished child process
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    /// Text worth showing a caller when the process failed
    ///
    /// Prefers stderr, falls back to stdout, and keeps only the tail of very
    /// long output (progress bars end up in here too).
    pub fn diagnostics(&self) -> String {
        let text = if !self.stderr.trim().is_empty() {
            self.stderr.trim()
        } else {
            self.stdout.trim()
        };
        if text.is_empty() {
            return String::from("no diagnostic output");
        }
        tail_chars(text, MAX_DIAGNOSTIC_CHARS)
    }
}

fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - max).collect();
    format!("...{}", tail)
}

/// Run `command` to completion, killing it if it outlives `timeout`
pub fn run_with_timeout(mut command: Command, timeout: Duration) -> Result<ProcessOutput> {
    let program = PathBuf::from(command.get_program());
    own_process_group(&mut command);

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| JobError::Launch {
            program: program.clone(),
            source,
        })?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                let now = Instant::now();
                if now >= deadline {
                    log::error!(
                        "{:?} exceeded {}s, killing pid {}",
                        program,
                        timeout.as_secs(),
                        child.id()
                    );
                    terminate(&mut child, &program);
                    // Reader threads are left to finish on their own: a
                    // descendant that left the group may still hold the pipes.
                    return Err(JobError::Timeout {
                        program,
                        limit: timeout,
                    });
                }
                thread::sleep(POLL_INTERVAL.min(deadline - now));
            }
            Err(source) => {
                terminate(&mut child, &program);
                return Err(JobError::Launch { program, source });
            }
        }
    };

    Ok(ProcessOutput {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

#[cfg(unix)]
fn own_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_command: &mut Command) {}

/// Kill the child's process tree and reap the child
fn terminate(child: &mut Child, program: &Path) {
    if let Err(e) = kill_tree(child) {
        log::warn!("Failed to kill {:?}: {}", program, e);
    }
    if let Err(e) = child.wait() {
        log::warn!("Failed to reap {:?}: {}", program, e);
    }
}

/// Kill the child and every process still in its group
///
/// Must run before the child is reaped, while its pid still names the group.
#[cfg(unix)]
fn kill_tree(child: &mut Child) -> io::Result<()> {
    let pgid = child.id() as libc::pid_t;
    // SAFETY: killpg only sends a signal; the group was created by
    // `own_process_group` and its leader has not been reaped yet.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    log::debug!("killpg({}) failed ({}), killing leader only", pgid, err);
    child.kill()
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> io::Result<()> {
    child.kill()
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = reader.read_to_end(&mut buf) {
            log::debug!("Stopped reading child output: {}", e);
        }
        buf
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
