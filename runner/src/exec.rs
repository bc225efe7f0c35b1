use serde::{Deserialize, Serialize};
use std::{
    ffi::OsStr,
    io::Read,
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("Failed to wait for {program}: {source}")]
    Wait {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} ran into timeout after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("{program} exited with status {code:?}: {stderr}")]
    Status {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// captured output of an external tool
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// An opaque external program with fixed leading parameters
///
/// Everything this crate delegates to the outside world (scheduler clients,
/// transfer clients, merge and prune tools, simulation steps) goes through
/// here. A timeout is only applied when configured.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExternalCommand {
    pub exec: PathBuf,
    #[serde(default)]
    pub params: Vec<String>,
    /// timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl ExternalCommand {
    pub fn new(exec: impl Into<PathBuf>) -> Self {
        Self {
            exec: exec.into(),
            params: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<u64>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> String {
        self.exec.to_string_lossy().into_owned()
    }

    fn command<I, S>(&self, args: I, cwd: Option<&Path>) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.exec);
        command.args(&self.params).args(args);

        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        command
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus, ExecError> {
        let wait_error = |source| ExecError::Wait {
            program: self.program(),
            source,
        };

        match self.timeout.map(Duration::from_secs) {
            Some(timeout) => match child.wait_timeout(timeout).map_err(wait_error)? {
                Some(status) => Ok(status),
                None => {
                    debug!(program = %self.program(), "Killing external command after timeout");
                    if let Err(error) = child.kill() {
                        warn!(error = ?error, "Failed to kill timed out child");
                    }
                    let _ = child.wait();

                    Err(ExecError::Timeout {
                        program: self.program(),
                        timeout,
                    })
                }
            },
            None => child.wait().map_err(wait_error),
        }
    }

    /// run and capture stdout/stderr, regardless of the exit status
    pub fn capture<I, S>(&self, args: I, cwd: Option<&Path>) -> Result<ToolOutput, ExecError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = self.command(args, cwd);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(command = ?command, "Spawning external command");
        let mut child = command.spawn().map_err(|source| ExecError::Spawn {
            program: self.program(),
            source,
        })?;

        // pipes are drained on their own threads, otherwise a chatty child
        // blocks on a full pipe while we wait for it
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let status = self.wait(&mut child)?;

        Ok(ToolOutput {
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
            code: status.code(),
        })
    }

    /// run, capture and fail on a nonzero exit status
    pub fn run<I, S>(&self, args: I, cwd: Option<&Path>) -> Result<ToolOutput, ExecError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.capture(args, cwd)?;

        if output.success() {
            Ok(output)
        } else {
            Err(ExecError::Status {
                program: self.program(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// run with inherited stdio, used for long running simulation steps whose
    /// output belongs in the job's own stdout/stderr
    pub fn run_inherited<I, S>(&self, args: I, cwd: Option<&Path>) -> Result<(), ExecError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = self.command(args, cwd);
        command.stdin(Stdio::null());

        debug!(command = ?command, "Spawning external command");
        let mut child = command.spawn().map_err(|source| ExecError::Spawn {
            program: self.program(),
            source,
        })?;
        let status = self.wait(&mut child)?;

        if status.success() {
            Ok(())
        } else {
            Err(ExecError::Status {
                program: self.program(),
                code: status.code(),
                stderr: String::new(),
            })
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();

        if let Some(mut pipe) = pipe {
            if let Err(error) = pipe.read_to_end(&mut buffer) {
                warn!(error = ?error, "Failed to read from child pipe");
            }
        }

        String::from_utf8_lossy(&buffer).into_owned()
    })
}
