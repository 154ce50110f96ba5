use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use std::{
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Duration,
};
use tokio::process::{Child, Command};

use crate::{HostutilsError, HostutilsResult, ProcessMonitor};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A supervisor that owns one child process and hands its output to a [`ProcessMonitor`].
///
/// The child is spawned in its own process group so that a stop reaches every process the runtime
/// forked. Unlike a blocking run loop, [`Supervisor::start`] returns as soon as the child is
/// spawned and its pipes are attached; the caller polls [`Supervisor::is_running`] and decides
/// when to [`Supervisor::stop`].
pub struct Supervisor<M>
where
    M: ProcessMonitor + Send,
{
    /// Path to the child executable
    program: PathBuf,

    /// Arguments to pass to the child executable
    args: Vec<String>,

    /// Environment variables for the child process
    envs: Vec<(String, String)>,

    /// Working directory for the child
    current_dir: Option<PathBuf>,

    /// Credentials the child is started with
    credentials: Option<(u32, u32)>,

    /// The process monitor
    monitor: M,

    /// The managed child
    child: Option<Child>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<M> Supervisor<M>
where
    M: ProcessMonitor + Send,
{
    /// Creates a new supervisor.
    ///
    /// ## Arguments
    ///
    /// * `program` - Path to the child executable
    /// * `args` - Arguments to pass to the child executable
    /// * `envs` - Environment variables for the child process
    /// * `monitor` - The process monitor to use
    pub fn new(
        program: impl AsRef<Path>,
        args: impl IntoIterator<Item = impl Into<String>>,
        envs: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
        monitor: M,
    ) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: args.into_iter().map(Into::into).collect(),
            envs: envs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            current_dir: None,
            credentials: None,
            monitor,
            child: None,
        }
    }

    /// Runs the child as `uid`/`gid` instead of the supervisor's own identity.
    pub fn with_credentials(mut self, uid: u32, gid: u32) -> Self {
        self.credentials = Some((uid, gid));
        self
    }

    /// Runs the child from `dir`.
    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Spawns the child, attaches the monitor and returns the child's pid.
    pub async fn start(&mut self) -> HostutilsResult<u32> {
        if let Some(pid) = self.running_pid() {
            return Err(HostutilsError::AlreadyRunning(pid));
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        if let Some((uid, gid)) = self.credentials {
            command.uid(uid).gid(gid);
        }

        let mut child = command.spawn()?;
        let program = self.program.display().to_string();
        let pid = child
            .id()
            .ok_or_else(|| HostutilsError::ProcessExited(program.clone()))?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(HostutilsError::ProcessExited(program));
        };

        self.monitor.start(pid, stdout, stderr).await?;
        self.child = Some(child);

        tracing::info!(pid, program = %self.program.display(), "started child process");
        Ok(pid)
    }

    /// The pid of the child if it has been started and has not been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Returns true while the child is alive. Reaps it if it has exited.
    pub fn is_running(&mut self) -> bool {
        self.running_pid().is_some()
    }

    /// Sends `signal` to the child's process group.
    pub fn signal(&self, signal: Signal) -> HostutilsResult<()> {
        match self.pid() {
            Some(pid) => signal_group(pid, signal),
            None => Ok(()),
        }
    }

    /// Stops the child: SIGTERM to the group, wait up to `grace`, then SIGKILL.
    ///
    /// Returns the exit status, or `None` if there was nothing to stop.
    pub async fn stop(&mut self, grace: Duration) -> HostutilsResult<Option<ExitStatus>> {
        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };

        let status = match child.id() {
            None => child.wait().await?,
            Some(pid) => {
                if let Err(e) = signal_group(pid, Signal::SIGTERM) {
                    tracing::warn!(pid, "failed to send SIGTERM: {e}");
                }

                match tokio::time::timeout(grace, child.wait()).await {
                    Ok(status) => status?,
                    Err(_) => {
                        tracing::warn!(pid, ?grace, "child ignored SIGTERM, sending SIGKILL");
                        if let Err(e) = signal_group(pid, Signal::SIGKILL) {
                            tracing::error!(pid, "failed to send SIGKILL: {e}");
                        }
                        child.wait().await?
                    }
                }
            }
        };

        self.monitor.stop().await?;

        if status.success() {
            tracing::info!("child process exited successfully");
        } else {
            tracing::info!("child process exited with status: {status}");
        }

        Ok(Some(status))
    }

    fn running_pid(&mut self) -> Option<u32> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(None) => child.id(),
            Ok(Some(status)) => {
                tracing::warn!(program = %self.program.display(), "child process exited: {status}");
                None
            }
            Err(e) => {
                tracing::error!("failed to poll child process: {e}");
                None
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Sends `signal` to the process group led by `pid`, falling back to the process itself if the
/// group no longer exists.
pub fn signal_group(pid: u32, signal: Signal) -> HostutilsResult<()> {
    let pid = pid as i32;
    match signal::killpg(Pid::from_raw(pid), signal) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => signal_process(pid as u32, signal),
        Err(source) => Err(HostutilsError::Signal { pid, source }),
    }
}

/// Sends `signal` to a single process.
pub fn signal_process(pid: u32, signal: Signal) -> HostutilsResult<()> {
    let pid = pid as i32;
    signal::kill(Pid::from_raw(pid), signal)
        .map_err(|source| HostutilsError::Signal { pid, source })
}

/// Returns true if a process with `pid` exists and can be signalled.
pub fn process_alive(pid: u32) -> bool {
    match signal::kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
