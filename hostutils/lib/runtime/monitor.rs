use async_trait::async_trait;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    process::{ChildStderr, ChildStdout},
    sync::Mutex,
    task::JoinHandle,
};

use crate::{HostutilsResult, RotatingLog, DEFAULT_LOG_KEEP, DEFAULT_LOG_MAX_SIZE};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How long [`LogMonitor::stop`] waits for the pipe readers to drain before aborting them.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A trait for monitoring processes
#[async_trait]
pub trait ProcessMonitor {
    /// Start monitoring a freshly spawned process
    async fn start(
        &mut self,
        pid: u32,
        stdout: ChildStdout,
        stderr: ChildStderr,
    ) -> HostutilsResult<()>;

    /// Stop monitoring
    async fn stop(&mut self) -> HostutilsResult<()>;
}

/// A [`ProcessMonitor`] that copies a child's stdout and stderr, line by line, into a
/// [`RotatingLog`].
pub struct LogMonitor {
    log_path: PathBuf,
    max_size: u64,
    keep: usize,
    readers: Vec<JoinHandle<()>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LogMonitor {
    /// Creates a monitor writing to `log_path` with the default rotation limits.
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self::with_limits(log_path, DEFAULT_LOG_MAX_SIZE, DEFAULT_LOG_KEEP)
    }

    /// Creates a monitor writing to `log_path`, rotating at `max_size` bytes and keeping `keep`
    /// generations.
    pub fn with_limits(log_path: impl Into<PathBuf>, max_size: u64, keep: usize) -> Self {
        Self {
            log_path: log_path.into(),
            max_size,
            keep,
            readers: Vec::new(),
        }
    }

    /// The file this monitor writes to.
    pub fn log_path(&self) -> &PathBuf {
        &self.log_path
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn spawn_reader<R>(
    pid: u32,
    stream: &'static str,
    reader: R,
    log: Arc<Mutex<RotatingLog>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let mut log = log.lock().await;
                    let written = async {
                        log.write_all(line.as_bytes()).await?;
                        log.write_all(b"\n").await?;
                        log.flush().await
                    }
                    .await;

                    if let Err(e) = written {
                        tracing::error!(pid, stream, "failed to write process output: {e}");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(pid, stream, "failed to read process output: {e}");
                    break;
                }
            }
        }
    })
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ProcessMonitor for LogMonitor {
    async fn start(
        &mut self,
        pid: u32,
        stdout: ChildStdout,
        stderr: ChildStderr,
    ) -> HostutilsResult<()> {
        let log = RotatingLog::with_limits(&self.log_path, self.max_size, self.keep).await?;
        let log = Arc::new(Mutex::new(log));

        self.readers.push(spawn_reader(pid, "stdout", stdout, Arc::clone(&log)));
        self.readers.push(spawn_reader(pid, "stderr", stderr, log));

        tracing::debug!(pid, log = %self.log_path.display(), "capturing process output");
        Ok(())
    }

    async fn stop(&mut self) -> HostutilsResult<()> {
        for mut reader in self.readers.drain(..) {
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut reader).await.is_err() {
                reader.abort();
            }
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::process::Stdio;

    use tempfile::tempdir;
    use tokio::process::Command;

    use super::*;

    #[tokio::test]
    async fn test_log_monitor_captures_both_streams() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let log_path = dir.path().join("child.log");

        let mut child = Command::new("sh")
            .args(["-c", "echo out; echo err 1>&2"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let pid = child.id().unwrap_or_default();
        let stdout = child.stdout.take().unwrap();
        let stderr = child.stderr.take().unwrap();

        let mut monitor = LogMonitor::new(&log_path);
        monitor.start(pid, stdout, stderr).await?;
        child.wait().await?;
        monitor.stop().await?;

        let content = std::fs::read_to_string(&log_path)?;
        assert!(content.contains("out\n"));
        assert!(content.contains("err\n"));

        Ok(())
    }
}
