//! The seam between the control plane and the host operating system.
//!
//! Everything the jail manager does to users, groups and directories goes through [`OsOps`].
//! [`SystemOs`] backs it with real commands; [`InMemoryOs`] is a faithful double that lets the
//! jail logic run without root.

mod memory;
mod system;

use std::{
    fmt::{self, Display},
    os::unix::fs::PermissionsExt,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::HostcoreResult;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

static TMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The owner a path is chowned to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Owner {
    /// `root:root`
    Root,

    /// `<user>:<user>`
    User(String),
}

/// Host operations used by the jail manager.
#[async_trait]
pub trait OsOps: Send + Sync {
    /// Creates `group` unless it already exists.
    async fn ensure_group(&self, group: &str) -> HostcoreResult<()>;

    /// Lists every group `username` belongs to.
    async fn user_groups(&self, username: &str) -> HostcoreResult<Vec<String>>;

    /// Adds `username` to `group`.
    async fn add_user_to_group(&self, username: &str, group: &str) -> HostcoreResult<()>;

    /// Removes `username` from `group`. Not being a member is not an error.
    async fn remove_user_from_group(&self, username: &str, group: &str) -> HostcoreResult<()>;

    /// Creates `path` and any missing parents.
    async fn create_dir_all(&self, path: &Path) -> HostcoreResult<()>;

    /// Changes ownership of `path`, and of everything below it if `recursive`.
    async fn chown(&self, path: &Path, owner: &Owner, recursive: bool) -> HostcoreResult<()>;

    /// Sets the permission bits of `path`.
    async fn chmod(&self, path: &Path, mode: u32) -> HostcoreResult<()>;

    /// Reads a text file. A missing file is `None`.
    async fn read_file(&self, path: &Path) -> HostcoreResult<Option<String>>;

    /// Replaces a file atomically.
    async fn write_file(&self, path: &Path, content: &str, mode: u32) -> HostcoreResult<()>;

    /// Asks the SSH daemon to reread its configuration.
    async fn reload_sshd(&self) -> HostcoreResult<()>;
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Owner {
    /// The `user:group` argument for `chown`.
    pub fn spec(&self) -> String {
        match self {
            Owner::Root => "root:root".to_string(),
            Owner::User(name) => format!("{name}:{name}"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Writes `content` to a temporary sibling of `path` and renames it into place, so readers see
/// either the old or the new file and never a partial one.
pub async fn write_atomic(path: &Path, content: &[u8], mode: u32) -> HostcoreResult<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    tokio::fs::create_dir_all(&parent).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sequence = TMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let tmp = parent.join(format!(
        ".{file_name}.tmp-{}-{sequence}",
        std::process::id()
    ));

    let result = async {
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(mode)).await?;
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.spec())
    }
}

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use memory::*;
pub use system::*;

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_write_atomic_replaces_and_sets_mode() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("sshd_config");

        write_atomic(&path, b"first\n", 0o644).await?;
        write_atomic(&path, b"second\n", 0o600).await?;

        assert_eq!(std::fs::read_to_string(&path)?, "second\n");
        let mode = std::fs::metadata(&path)?.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())?
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());

        Ok(())
    }
}
