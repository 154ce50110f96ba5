use std::{path::Path, time::Duration};

use async_trait::async_trait;
use hostutils::{process_alive, signal_group, LogMonitor, Supervisor};
use nix::sys::signal::Signal;

use crate::{HostcoreError, HostcoreResult};

use super::InstanceSpec;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long a SIGKILLed adopted process gets to disappear.
const KILL_SETTLE: Duration = Duration::from_secs(2);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A live runtime process.
#[async_trait]
pub trait InstanceProcess: Send {
    /// The runtime's pid.
    fn pid(&self) -> u32;

    /// Returns true while the process is alive.
    fn is_running(&mut self) -> bool;

    /// SIGTERM, wait up to `grace`, then SIGKILL.
    async fn terminate(&mut self, grace: Duration) -> HostcoreResult<()>;
}

/// Starts runtime processes and re-attaches to ones started by an earlier daemon.
#[async_trait]
pub trait InstanceLauncher: Send + Sync {
    /// Starts the runtime described by `spec`.
    async fn launch(&self, spec: &InstanceSpec) -> HostcoreResult<Box<dyn InstanceProcess>>;

    /// Takes over the process `pid` if it is still alive.
    async fn adopt(
        &self,
        spec: &InstanceSpec,
        pid: u32,
    ) -> HostcoreResult<Option<Box<dyn InstanceProcess>>>;
}

/// Launches the runtime as `<binary> run --config <path>` under a [`Supervisor`], with its
/// output captured by a [`LogMonitor`].
#[derive(Debug, Default, Clone)]
pub struct SystemLauncher;

/// A process this daemon spawned.
pub struct SupervisedProcess {
    pid: u32,
    supervisor: Supervisor<LogMonitor>,
}

/// A process recovered from a pid file. It is not our child, so liveness is probed with signal 0.
#[derive(Debug)]
pub struct AdoptedProcess {
    pid: u32,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SystemLauncher {
    /// Creates a launcher.
    pub fn new() -> Self {
        Self
    }
}

impl AdoptedProcess {
    /// Wraps `pid`.
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }

    async fn wait_exit(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if !process_alive(self.pid) {
                return true;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }

        !process_alive(self.pid)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Reads a pid file. A missing or unparsable file yields `None`.
pub async fn read_pid_file(path: &Path) -> HostcoreResult<Option<u32>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content.trim().parse().ok()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Removes a file if it exists.
pub async fn remove_if_exists(path: &Path) -> HostcoreResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl InstanceLauncher for SystemLauncher {
    async fn launch(&self, spec: &InstanceSpec) -> HostcoreResult<Box<dyn InstanceProcess>> {
        remove_if_exists(&spec.pid_file).await?;

        let monitor =
            LogMonitor::with_limits(&spec.log_path, spec.output_max_bytes, spec.output_keep);
        let config_path = spec.config_path.to_string_lossy().into_owned();
        let home = spec.home_dir.to_string_lossy().into_owned();

        let mut supervisor = Supervisor::new(
            &spec.binary,
            ["run".to_string(), "--config".to_string(), config_path],
            [("HOME", home)],
            monitor,
        )
        .with_credentials(spec.uid, spec.gid)
        .with_current_dir(&spec.work_dir);

        let pid = supervisor.start().await?;

        if let Err(e) = tokio::fs::write(&spec.pid_file, pid.to_string()).await {
            tracing::error!(instance = %spec.key, "failed to write pid file, stopping: {e}");
            supervisor.stop(KILL_SETTLE).await?;
            return Err(e.into());
        }

        Ok(Box::new(SupervisedProcess { pid, supervisor }))
    }

    async fn adopt(
        &self,
        spec: &InstanceSpec,
        pid: u32,
    ) -> HostcoreResult<Option<Box<dyn InstanceProcess>>> {
        if !process_alive(pid) {
            tracing::debug!(instance = %spec.key, pid, "pid file is stale");
            return Ok(None);
        }

        tracing::info!(instance = %spec.key, pid, "adopted running instance");
        Ok(Some(Box::new(AdoptedProcess::new(pid))))
    }
}

#[async_trait]
impl InstanceProcess for SupervisedProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_running(&mut self) -> bool {
        self.supervisor.is_running()
    }

    async fn terminate(&mut self, grace: Duration) -> HostcoreResult<()> {
        self.supervisor.stop(grace).await?;
        Ok(())
    }
}

#[async_trait]
impl InstanceProcess for AdoptedProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_running(&mut self) -> bool {
        process_alive(self.pid)
    }

    async fn terminate(&mut self, grace: Duration) -> HostcoreResult<()> {
        if !process_alive(self.pid) {
            return Ok(());
        }

        signal_group(self.pid, Signal::SIGTERM)?;
        if self.wait_exit(grace).await {
            return Ok(());
        }

        tracing::warn!(pid = self.pid, ?grace, "adopted process ignored SIGTERM, sending SIGKILL");
        signal_group(self.pid, Signal::SIGKILL)?;
        if self.wait_exit(KILL_SETTLE).await {
            Ok(())
        } else {
            Err(HostcoreError::custom(anyhow::anyhow!(
                "process {} survived SIGKILL",
                self.pid
            )))
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_read_pid_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("php-8.4.pid");

        assert_eq!(read_pid_file(&path).await?, None);

        tokio::fs::write(&path, "4242\n").await?;
        assert_eq!(read_pid_file(&path).await?, Some(4242));

        tokio::fs::write(&path, "garbage").await?;
        assert_eq!(read_pid_file(&path).await?, None);

        remove_if_exists(&path).await?;
        remove_if_exists(&path).await?;
        assert!(!path.exists());

        Ok(())
    }

    #[tokio::test]
    async fn test_adopted_process_terminates() -> anyhow::Result<()> {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()?;
        let pid = child.id().unwrap();

        let mut adopted = AdoptedProcess::new(pid);
        assert!(adopted.is_running());

        let reaper = tokio::spawn(async move { child.wait().await });
        adopted.terminate(Duration::from_secs(2)).await?;
        reaper.await??;

        assert!(!adopted.is_running());
        Ok(())
    }
}
