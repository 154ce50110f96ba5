use std::{os::unix::fs::PermissionsExt, path::Path, process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::process::Command;

use crate::{HostcoreError, HostcoreResult};

use super::{write_atomic, OsOps, Owner};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Unit names the SSH daemon is known by, tried in order.
const SSHD_UNITS: &[&str] = &["ssh", "sshd"];

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// [`OsOps`] backed by the host: shadow-utils commands for groups, `chown` for ownership and
/// `systemctl` for the SSH daemon. Every command is bounded by a timeout.
#[derive(Debug, Clone)]
pub struct SystemOs {
    timeout: Duration,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SystemOs {
    /// Creates a backend whose commands are killed after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Runs `program` with `args` and returns its stdout.
    async fn run(&self, program: &str, args: &[&str]) -> HostcoreResult<String> {
        let command = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        tracing::debug!(%command, "running command");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(HostcoreError::CommandTimedOut {
                    command,
                    timeout: self.timeout,
                })
            }
        };

        if !output.status.success() {
            return Err(HostcoreError::CommandFailed {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl OsOps for SystemOs {
    async fn ensure_group(&self, group: &str) -> HostcoreResult<()> {
        self.run("groupadd", &["-f", group]).await.map(|_| ())
    }

    async fn user_groups(&self, username: &str) -> HostcoreResult<Vec<String>> {
        let name = username.to_string();
        tokio::task::spawn_blocking(move || {
            let user = uzers::get_user_by_name(&name)
                .ok_or_else(|| HostcoreError::UnknownUser(name.clone()))?;
            let groups = uzers::get_user_groups(&name, user.primary_group_id())
                .ok_or_else(|| HostcoreError::UnknownUser(name.clone()))?;

            Ok(groups
                .iter()
                .map(|g| g.name().to_string_lossy().into_owned())
                .collect())
        })
        .await?
    }

    async fn add_user_to_group(&self, username: &str, group: &str) -> HostcoreResult<()> {
        self.run("usermod", &["-aG", group, username]).await.map(|_| ())
    }

    async fn remove_user_from_group(&self, username: &str, group: &str) -> HostcoreResult<()> {
        match self.run("gpasswd", &["-d", username, group]).await {
            Ok(_) => Ok(()),
            Err(HostcoreError::CommandFailed { stderr, .. }) if stderr.contains("not a member") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn create_dir_all(&self, path: &Path) -> HostcoreResult<()> {
        Ok(tokio::fs::create_dir_all(path).await?)
    }

    async fn chown(&self, path: &Path, owner: &Owner, recursive: bool) -> HostcoreResult<()> {
        let spec = owner.spec();
        let path = path.to_string_lossy();
        if recursive {
            self.run("chown", &["-R", &spec, &path]).await?;
        } else {
            self.run("chown", &[&spec, &path]).await?;
        }

        Ok(())
    }

    async fn chmod(&self, path: &Path, mode: u32) -> HostcoreResult<()> {
        let permissions = std::fs::Permissions::from_mode(mode);
        Ok(tokio::fs::set_permissions(path, permissions).await?)
    }

    async fn read_file(&self, path: &Path) -> HostcoreResult<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, path: &Path, content: &str, mode: u32) -> HostcoreResult<()> {
        write_atomic(path, content.as_bytes(), mode).await
    }

    async fn reload_sshd(&self) -> HostcoreResult<()> {
        let mut last_error = None;
        for unit in SSHD_UNITS {
            match self.run("systemctl", &["reload", unit]).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    tracing::debug!(unit, "sshd reload attempt failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| HostcoreError::custom(anyhow::anyhow!("no sshd unit"))))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
