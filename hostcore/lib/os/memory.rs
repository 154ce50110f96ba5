use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;

use crate::{HostcoreError, HostcoreResult};

use super::{OsOps, Owner};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The operations an [`InMemoryOs`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsOp {
    /// [`OsOps::ensure_group`]
    EnsureGroup,
    /// [`OsOps::user_groups`]
    UserGroups,
    /// [`OsOps::add_user_to_group`]
    AddUserToGroup,
    /// [`OsOps::remove_user_from_group`]
    RemoveUserFromGroup,
    /// [`OsOps::create_dir_all`]
    CreateDir,
    /// [`OsOps::chown`]
    Chown,
    /// [`OsOps::chmod`]
    Chmod,
    /// [`OsOps::read_file`]
    ReadFile,
    /// [`OsOps::write_file`]
    WriteFile,
    /// [`OsOps::reload_sshd`]
    ReloadSshd,
}

/// Ownership and mode of a directory tracked by [`InMemoryOs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirState {
    /// The owner.
    pub owner: Owner,

    /// The permission bits.
    pub mode: u32,
}

/// An in-memory host: users, groups, directories and files, with injectable failures.
///
/// Every mutating call is appended to a journal so tests can assert that nothing was touched.
#[derive(Debug, Default)]
pub struct InMemoryOs {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    groups: BTreeSet<String>,
    memberships: BTreeMap<String, BTreeSet<String>>,
    dirs: BTreeMap<PathBuf, DirState>,
    files: BTreeMap<PathBuf, (String, u32)>,
    failures: HashMap<OsOp, String>,
    sshd_reloads: usize,
    journal: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl InMemoryOs {
    /// Creates an empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user whose primary group is its own name, plus `groups`.
    pub fn with_user(self, username: &str, groups: &[&str]) -> Self {
        {
            let mut state = self.lock();
            let mut member_of: BTreeSet<String> = groups.iter().map(|g| g.to_string()).collect();
            member_of.insert(username.to_string());
            state.groups.extend(member_of.iter().cloned());
            state.memberships.insert(username.to_string(), member_of);
        }
        self
    }

    /// Seeds a file.
    pub fn with_file(self, path: impl Into<PathBuf>, content: &str) -> Self {
        self.lock()
            .files
            .insert(path.into(), (content.to_string(), 0o644));
        self
    }

    /// Makes every future call of `op` fail with `message`.
    pub fn fail(&self, op: OsOp, message: &str) {
        self.lock().failures.insert(op, message.to_string());
    }

    /// Stops injecting failures for `op`.
    pub fn recover(&self, op: OsOp) {
        self.lock().failures.remove(&op);
    }

    /// The tracked state of a directory.
    pub fn dir(&self, path: impl AsRef<Path>) -> Option<DirState> {
        self.lock().dirs.get(path.as_ref()).cloned()
    }

    /// The content of a file.
    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.lock().files.get(path.as_ref()).map(|(c, _)| c.clone())
    }

    /// Returns true if the group exists.
    pub fn has_group(&self, group: &str) -> bool {
        self.lock().groups.contains(group)
    }

    /// Returns true if `username` is in `group`.
    pub fn is_member(&self, username: &str, group: &str) -> bool {
        self.lock()
            .memberships
            .get(username)
            .is_some_and(|groups| groups.contains(group))
    }

    /// How many times the SSH daemon was reloaded.
    pub fn sshd_reloads(&self) -> usize {
        self.lock().sshd_reloads
    }

    /// Every mutating call, in order.
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MemoryState {
    fn check(&self, op: OsOp) -> HostcoreResult<()> {
        match self.failures.get(&op) {
            Some(message) => Err(HostcoreError::CommandFailed {
                command: format!("{op:?}"),
                code: Some(1),
                stderr: message.clone(),
            }),
            None => Ok(()),
        }
    }

    fn missing(path: &Path) -> HostcoreError {
        HostcoreError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        ))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl OsOps for InMemoryOs {
    async fn ensure_group(&self, group: &str) -> HostcoreResult<()> {
        let mut state = self.lock();
        state.check(OsOp::EnsureGroup)?;
        state.journal.push(format!("groupadd -f {group}"));
        state.groups.insert(group.to_string());
        Ok(())
    }

    async fn user_groups(&self, username: &str) -> HostcoreResult<Vec<String>> {
        let state = self.lock();
        state.check(OsOp::UserGroups)?;
        state
            .memberships
            .get(username)
            .map(|groups| groups.iter().cloned().collect())
            .ok_or_else(|| HostcoreError::UnknownUser(username.to_string()))
    }

    async fn add_user_to_group(&self, username: &str, group: &str) -> HostcoreResult<()> {
        let mut state = self.lock();
        state.check(OsOp::AddUserToGroup)?;
        if !state.groups.contains(group) {
            return Err(HostcoreError::CommandFailed {
                command: format!("usermod -aG {group} {username}"),
                code: Some(6),
                stderr: format!("group '{group}' does not exist"),
            });
        }

        state.journal.push(format!("usermod -aG {group} {username}"));
        state
            .memberships
            .get_mut(username)
            .ok_or_else(|| HostcoreError::UnknownUser(username.to_string()))?
            .insert(group.to_string());
        Ok(())
    }

    async fn remove_user_from_group(&self, username: &str, group: &str) -> HostcoreResult<()> {
        let mut state = self.lock();
        state.check(OsOp::RemoveUserFromGroup)?;
        state.journal.push(format!("gpasswd -d {username} {group}"));
        if let Some(groups) = state.memberships.get_mut(username) {
            groups.remove(group);
        }
        Ok(())
    }

    async fn create_dir_all(&self, path: &Path) -> HostcoreResult<()> {
        let mut state = self.lock();
        state.check(OsOp::CreateDir)?;
        state.journal.push(format!("mkdir -p {}", path.display()));
        for ancestor in path.ancestors() {
            state
                .dirs
                .entry(ancestor.to_path_buf())
                .or_insert(DirState {
                    owner: Owner::Root,
                    mode: 0o755,
                });
        }
        Ok(())
    }

    async fn chown(&self, path: &Path, owner: &Owner, recursive: bool) -> HostcoreResult<()> {
        let mut state = self.lock();
        state.check(OsOp::Chown)?;
        if !state.dirs.contains_key(path) {
            return Err(MemoryState::missing(path));
        }

        let flag = if recursive { "-R " } else { "" };
        state
            .journal
            .push(format!("chown {flag}{} {}", owner.spec(), path.display()));
        for (dir, dir_state) in state.dirs.iter_mut() {
            if dir == path || (recursive && dir.starts_with(path)) {
                dir_state.owner = owner.clone();
            }
        }
        Ok(())
    }

    async fn chmod(&self, path: &Path, mode: u32) -> HostcoreResult<()> {
        let mut state = self.lock();
        state.check(OsOp::Chmod)?;
        state
            .journal
            .push(format!("chmod {mode:o} {}", path.display()));
        match state.dirs.get_mut(path) {
            Some(dir) => {
                dir.mode = mode;
                Ok(())
            }
            None => Err(MemoryState::missing(path)),
        }
    }

    async fn read_file(&self, path: &Path) -> HostcoreResult<Option<String>> {
        let state = self.lock();
        state.check(OsOp::ReadFile)?;
        Ok(state.files.get(path).map(|(content, _)| content.clone()))
    }

    async fn write_file(&self, path: &Path, content: &str, mode: u32) -> HostcoreResult<()> {
        let mut state = self.lock();
        state.check(OsOp::WriteFile)?;
        state.journal.push(format!("write {}", path.display()));
        state
            .files
            .insert(path.to_path_buf(), (content.to_string(), mode));
        Ok(())
    }

    async fn reload_sshd(&self) -> HostcoreResult<()> {
        let mut state = self.lock();
        state.check(OsOp::ReloadSshd)?;
        state.journal.push("systemctl reload ssh".to_string());
        state.sshd_reloads += 1;
        Ok(())
    }
}
