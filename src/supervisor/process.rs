//! One supervised OS process

use crate::error::SupervisorError;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// How to launch a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug)]
enum ProcessState {
    Idle,
    Running(Child),
    Exited(ExitStatus),
}

/// Named worker plus its current child, if any
#[derive(Debug)]
pub struct SupervisedProcess {
    name: String,
    spec: ProcessSpec,
    state: ProcessState,
    restarts: u32,
}

impl SupervisedProcess {
    pub fn new(name: impl Into<String>, spec: ProcessSpec) -> Self {
        Self {
            name: name.into(),
            spec,
            state: ProcessState::Idle,
            restarts: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// Relaunches after the first start
    pub fn restart_count(&self) -> u32 {
        self.restarts
    }

    pub fn is_started(&self) -> bool {
        !matches!(self.state, ProcessState::Idle)
    }

    pub fn pid(&self) -> Option<u32> {
        match &self.state {
            ProcessState::Running(child) => child.id(),
            _ => None,
        }
    }

    /// Status of the last exit observed by [`poll`](Self::poll)
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match &self.state {
            ProcessState::Exited(status) => Some(*status),
            _ => None,
        }
    }

    /// Reap the child if it exited; returns whether it is still running
    pub fn poll(&mut self) -> Result<bool, SupervisorError> {
        let ProcessState::Running(child) = &mut self.state else {
            return Ok(false);
        };
        match child.try_wait() {
            Ok(None) => Ok(true),
            Ok(Some(status)) => {
                self.state = ProcessState::Exited(status);
                Ok(false)
            }
            Err(source) => Err(SupervisorError::Stop {
                name: self.name.clone(),
                source,
            }),
        }
    }

    /// Launch the child; a live child is left alone
    pub fn spawn(&mut self) -> Result<(), SupervisorError> {
        if self.poll()? {
            return Ok(());
        }
        let relaunch = self.is_started();

        let child = Command::new(&self.spec.program)
            .args(&self.spec.args)
            .envs(self.spec.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                name: self.name.clone(),
                source,
            })?;

        debug!(process = %self.name, pid = ?child.id(), "Process launched");
        self.state = ProcessState::Running(child);
        if relaunch {
            self.restarts += 1;
        }
        Ok(())
    }

    /// SIGTERM, wait up to `grace`, then kill
    pub async fn terminate(&mut self, grace: Duration) -> Result<(), SupervisorError> {
        if !self.poll()? {
            return Ok(());
        }
        let ProcessState::Running(mut child) = std::mem::replace(&mut self.state, ProcessState::Idle) else {
            return Ok(());
        };

        request_exit(&mut child);
        let status = match tokio::time::timeout(grace, child.wait()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    process = %self.name,
                    timeout_ms = grace.as_millis() as u64,
                    "Process ignored termination, killing it"
                );
                match child.kill().await {
                    Ok(()) => child.wait().await,
                    Err(e) => Err(e),
                }
            }
        };

        match status {
            Ok(status) => {
                debug!(process = %self.name, %status, "Process stopped");
                self.state = ProcessState::Exited(status);
                Ok(())
            }
            Err(source) => Err(SupervisorError::Stop {
                name: self.name.clone(),
                source,
            }),
        }
    }
}

#[cfg(unix)]
fn request_exit(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: pid belongs to a child we have not reaped yet
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child) {
    let _ = child.start_kill();
}
