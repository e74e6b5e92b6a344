//! External archiver invocation

use crate::error::{BackupError, BackupResult};
use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Interval between exit checks while a tool runs
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Captured result of one tool run
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit status, `None` if killed by a signal
    pub exit_code: Option<i32>,
}

impl ToolOutput {
    /// Whether the tool exited with status zero
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Narrow seam over process spawning, faked in tests
pub trait ToolRunner {
    /// Run `program` with `args`, optionally inside `cwd`
    ///
    /// A non-zero exit is reported through [`ToolOutput::exit_code`], not as
    /// an error.
    ///
    /// # Errors
    /// Returns an error if the process cannot be spawned or times out
    fn run(&self, program: &str, args: &[OsString], cwd: Option<&Path>) -> BackupResult<ToolOutput>;
}

/// Runs real binaries from `PATH` with a deadline
#[derive(Debug, Clone)]
pub struct SystemTools {
    timeout: Duration,
}

impl SystemTools {
    /// Create a runner that kills tools running longer than `timeout`
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ToolRunner for SystemTools {
    fn run(&self, program: &str, args: &[OsString], cwd: Option<&Path>) -> BackupResult<ToolOutput> {
        debug!(program, ?args, cwd = ?cwd, "running tool");

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|source| BackupError::Io {
            path: program.into(),
            source,
        })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(BackupError::Timeout {
                        program: program.to_string(),
                        seconds: self.timeout.as_secs(),
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    return Err(BackupError::Io {
                        path: program.into(),
                        source,
                    })
                }
            }
        };

        Ok(ToolOutput {
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
            exit_code: status.code(),
        })
    }
}

/// Read a child pipe to completion on its own thread; a child blocks once
/// an unread pipe buffer fills
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn checked(program: &str, output: ToolOutput) -> BackupResult<ToolOutput> {
    if output.success() {
        Ok(output)
    } else {
        Err(BackupError::Tool {
            program: program.to_string(),
            status: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

fn os(s: impl AsRef<OsStr>) -> OsString {
    s.as_ref().to_os_string()
}

/// `tar` invocations used by the archive components
pub mod tar {
    use super::{checked, os, BackupResult, OsString, Path, ToolRunner};

    const TAR: &str = "tar";

    /// Pack `members` of `cwd` into a gzip-compressed `archive`
    ///
    /// Running inside `cwd` keeps member paths relative.
    ///
    /// # Errors
    /// Returns an error if tar fails
    pub fn create(
        tools: &dyn ToolRunner,
        cwd: &Path,
        archive: &Path,
        members: &[&str],
    ) -> BackupResult<()> {
        let mut args: Vec<OsString> = vec![os("-czf"), os(archive)];
        args.extend(members.iter().map(os));
        checked(TAR, tools.run(TAR, &args, Some(cwd))?)?;
        Ok(())
    }

    /// Unpack the whole of `archive` into `dest`
    ///
    /// # Errors
    /// Returns an error if tar fails
    pub fn extract(tools: &dyn ToolRunner, archive: &Path, dest: &Path) -> BackupResult<()> {
        let args = vec![os("-xzf"), os(archive), os("-C"), os(dest)];
        checked(TAR, tools.run(TAR, &args, None)?)?;
        Ok(())
    }

    /// Unpack a single member of `archive` into `dest`
    ///
    /// # Errors
    /// Returns an error if tar fails, including when the member is absent
    pub fn extract_member(
        tools: &dyn ToolRunner,
        archive: &Path,
        dest: &Path,
        member: &str,
    ) -> BackupResult<()> {
        let args = vec![os("-xzf"), os(archive), os("-C"), os(dest), os(member)];
        checked(TAR, tools.run(TAR, &args, None)?)?;
        Ok(())
    }

    /// List member paths of `archive` without extracting
    ///
    /// # Errors
    /// Returns an error if tar fails
    pub fn list(tools: &dyn ToolRunner, archive: &Path) -> BackupResult<Vec<String>> {
        let args = vec![os("-tzf"), os(archive)];
        let output = checked(TAR, tools.run(TAR, &args, None)?)?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}
