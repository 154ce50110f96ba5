use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    config::HostcoreConfig,
    error::JailRefusal,
    layout::HomeLayout,
    models::User,
    os::{OsOps, Owner},
    report::StepReport,
    sync::KeyedLocks,
    validate::validate_username,
    HostcoreError, HostcoreResult,
};

use super::apply_sshd_block;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const HOME_MODE: u32 = 0o755;
const TREE_MODE: u32 = 0o755;
const SSH_MODE: u32 = 0o700;
const SSHD_CONFIG_MODE: u32 = 0o644;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The jail state of a user, derived from group membership on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JailStatus {
    /// The user.
    pub username: String,

    /// Member of the jail group.
    pub is_jailed: bool,

    /// The chroot root.
    pub home_dir: PathBuf,

    /// The SFTP start directory.
    pub www_dir: PathBuf,

    /// Full SSH access.
    pub can_ssh: bool,

    /// Confined to SFTP.
    pub sftp_only: bool,
}

/// Creates and maintains the SFTP chroot jail.
///
/// Host-global state (the jail group and the sshd configuration) is guarded by one lock; each
/// user's directory tree and group membership by a per-user lock.
pub struct JailManager {
    os: Arc<dyn OsOps>,
    layout: HomeLayout,
    jail_group: String,
    admin_groups: Vec<String>,
    sshd_config_path: PathBuf,
    host_lock: Mutex<()>,
    user_locks: KeyedLocks<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl JailManager {
    /// Creates a jail manager acting through `os`.
    pub fn new(os: Arc<dyn OsOps>, config: &HostcoreConfig) -> Self {
        Self {
            os,
            layout: config.layout(),
            jail_group: config.get_jail_group().clone(),
            admin_groups: config.get_admin_groups().clone(),
            sshd_config_path: config.get_sshd_config_path().clone(),
            host_lock: Mutex::new(()),
            user_locks: KeyedLocks::new(),
        }
    }

    /// The group marking jailed users.
    pub fn jail_group(&self) -> &str {
        &self.jail_group
    }

    /// Creates the jail group if it does not exist.
    pub async fn ensure_jail_group(&self) -> HostcoreResult<()> {
        let _guard = self.host_lock.lock().await;
        self.os.ensure_group(&self.jail_group).await
    }

    /// Makes sure the sshd configuration carries the jail block. Returns true if the file was
    /// rewritten.
    ///
    /// A failed sshd reload is logged and ignored; the block applies at the daemon's next start.
    pub async fn ensure_sshd_configuration(&self) -> HostcoreResult<bool> {
        let _guard = self.host_lock.lock().await;

        let current = self.os.read_file(&self.sshd_config_path).await?.ok_or_else(|| {
            HostcoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", self.sshd_config_path.display()),
            ))
        })?;

        let Some(updated) = apply_sshd_block(&current, &self.jail_group) else {
            tracing::debug!(path = %self.sshd_config_path.display(), "sshd jail block present");
            return Ok(false);
        };

        self.os
            .write_file(&self.sshd_config_path, &updated, SSHD_CONFIG_MODE)
            .await?;
        tracing::info!(path = %self.sshd_config_path.display(), "wrote sshd jail block");

        if let Err(e) = self.os.reload_sshd().await {
            tracing::warn!("sshd reload failed, jail block applies on next restart: {e}");
        }

        Ok(true)
    }

    /// Confines `username` to the SFTP jail.
    ///
    /// Refuses, without touching anything, for an empty name, `root`, a member of an admin group,
    /// or a user whose groups cannot be read. Every later step is best-effort and recorded in
    /// the returned report.
    pub async fn sandbox(&self, username: &str) -> HostcoreResult<StepReport> {
        self.check_name(username)?;
        let _guard = self.user_locks.lock(&username.to_string()).await;
        self.sandbox_locked(username).await
    }

    /// Removes `username` from the jail group. Directories are left alone.
    pub async fn unsandbox(&self, username: &str) -> HostcoreResult<StepReport> {
        validate_username(username)?;
        let _guard = self.user_locks.lock(&username.to_string()).await;

        let mut report = StepReport::new(username);
        self.leave_jail(username, &mut report).await;
        Ok(report)
    }

    /// Reports whether `username` is jailed.
    pub async fn status(&self, username: &str) -> HostcoreResult<JailStatus> {
        validate_username(username)?;
        let groups = self.os.user_groups(username).await?;
        let is_jailed = groups.iter().any(|g| g == &self.jail_group);

        Ok(JailStatus {
            username: username.to_string(),
            is_jailed,
            home_dir: self.layout.home(username),
            www_dir: self.layout.www(username),
            can_ssh: !is_jailed,
            sftp_only: is_jailed,
        })
    }

    /// Reapplies the ownership and mode invariants of the home tree without the admin check.
    ///
    /// Safe for users who are not jailed.
    pub async fn repair(&self, username: &str) -> HostcoreResult<StepReport> {
        validate_username(username)?;
        let _guard = self.user_locks.lock(&username.to_string()).await;

        let mut report = StepReport::new(username);
        self.repair_tree(username, &mut report).await;
        Ok(report)
    }

    /// Repairs every user in `users`, collecting all outcomes in one report.
    pub async fn repair_all(&self, users: &[User]) -> StepReport {
        let mut all = StepReport::new("all users");
        for user in users {
            let username = user.get_username();
            match self.repair(username).await {
                Ok(report) => all.merge(report),
                Err(e) => {
                    all.record(format!("repair {username}"), Err::<(), _>(e));
                }
            }
        }

        all
    }

    /// Brings one user's jail in line with their declared access.
    ///
    /// SFTP-only users are sandboxed. Admins, shell users and anyone the sandbox precondition
    /// refuses get their jail membership removed and their tree repaired.
    pub async fn ensure_user(&self, user: &User) -> HostcoreResult<StepReport> {
        let username = user.get_username();
        validate_username(username)?;
        let _guard = self.user_locks.lock(&username.to_string()).await;

        if user.wants_jail() {
            match self.sandbox_locked(username).await {
                Ok(report) => return Ok(report),
                Err(e) if e.is_precondition() => {
                    tracing::warn!(username, "not jailing user: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        let mut report = StepReport::new(username);
        self.leave_jail(username, &mut report).await;
        self.repair_tree(username, &mut report).await;
        Ok(report)
    }

    fn check_name(&self, username: &str) -> HostcoreResult<()> {
        let refuse = |reason| HostcoreError::JailPrecondition {
            username: username.to_string(),
            reason,
        };

        if username.trim().is_empty() {
            return Err(refuse(JailRefusal::EmptyUsername));
        }

        if username == "root" {
            return Err(refuse(JailRefusal::RootUser));
        }

        validate_username(username)
    }

    async fn sandbox_locked(&self, username: &str) -> HostcoreResult<StepReport> {
        self.check_name(username)?;

        let groups = self.os.user_groups(username).await.map_err(|e| {
            HostcoreError::JailPrecondition {
                username: username.to_string(),
                reason: JailRefusal::MembershipUnknown(e.to_string()),
            }
        })?;

        if let Some(group) = groups.iter().find(|g| self.admin_groups.contains(g)) {
            return Err(HostcoreError::JailPrecondition {
                username: username.to_string(),
                reason: JailRefusal::AdminGroup(group.clone()),
            });
        }

        let mut report = StepReport::new(username);
        report.record(
            format!("groupadd -f {}", self.jail_group),
            self.os.ensure_group(&self.jail_group).await,
        );
        self.apply_tree(username, &mut report).await;

        if groups.iter().any(|g| g == &self.jail_group) {
            tracing::debug!(username, "already in jail group");
        } else {
            report.record(
                format!("usermod -aG {} {username}", self.jail_group),
                self.os.add_user_to_group(username, &self.jail_group).await,
            );
        }

        tracing::info!(username, clean = report.is_clean(), "sandboxed user");
        Ok(report)
    }

    async fn leave_jail(&self, username: &str, report: &mut StepReport) {
        report.record(
            format!("gpasswd -d {username} {}", self.jail_group),
            self.os
                .remove_user_from_group(username, &self.jail_group)
                .await,
        );
    }

    async fn repair_tree(&self, username: &str, report: &mut StepReport) {
        self.apply_tree(username, report).await;

        let owner = Owner::User(username.to_string());
        for dir in [
            self.layout.www(username),
            self.layout.run(username),
            self.layout.log(username),
        ] {
            self.chown(&dir, &owner, true, report).await;
        }
    }

    /// Home owned by root with 0755 (a chroot target may not be writable by the jailed user),
    /// then `www`, `run`, `log` and `.ssh` owned by the user.
    async fn apply_tree(&self, username: &str, report: &mut StepReport) {
        let home = self.layout.home(username);
        self.ensure_dir(&home, &Owner::Root, HOME_MODE, report).await;

        let owner = Owner::User(username.to_string());
        let subdirs = [
            (self.layout.www(username), TREE_MODE),
            (self.layout.run(username), TREE_MODE),
            (self.layout.log(username), TREE_MODE),
            (self.layout.ssh(username), SSH_MODE),
        ];

        for (dir, mode) in subdirs {
            self.ensure_dir(&dir, &owner, mode, report).await;
        }
    }

    async fn ensure_dir(&self, dir: &Path, owner: &Owner, mode: u32, report: &mut StepReport) {
        report.record(
            format!("mkdir -p {}", dir.display()),
            self.os.create_dir_all(dir).await,
        );
        self.chown(dir, owner, false, report).await;
        report.record(
            format!("chmod {mode:o} {}", dir.display()),
            self.os.chmod(dir, mode).await,
        );
    }

    async fn chown(&self, dir: &Path, owner: &Owner, recursive: bool, report: &mut StepReport) {
        let flag = if recursive { "-R " } else { "" };
        report.record(
            format!("chown {flag}{owner} {}", dir.display()),
            self.os.chown(dir, owner, recursive).await,
        );
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
