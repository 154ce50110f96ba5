use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    config::HostcoreConfig,
    models::{PhpVersionConfig, User},
};

use super::InstanceKey;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Everything needed to launch one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    /// The instance.
    pub key: InstanceKey,

    /// User id the runtime runs as.
    pub uid: u32,

    /// Group id the runtime runs as.
    pub gid: u32,

    /// The runtime executable.
    pub binary: PathBuf,

    /// The rendered instance routing document.
    pub config_path: PathBuf,

    /// Where the instance serves requests.
    pub socket: PathBuf,

    /// Where the instance serves its admin API.
    pub admin_socket: PathBuf,

    /// Pid file used to re-adopt the process after a daemon restart.
    pub pid_file: PathBuf,

    /// Captured stdout and stderr.
    pub log_path: PathBuf,

    /// The user's home, exported as `HOME` so the runtime keeps its own data there.
    pub home_dir: PathBuf,

    /// Working directory of the runtime.
    pub work_dir: PathBuf,

    /// Size at which the captured output rotates.
    pub output_max_bytes: u64,

    /// Rotated output generations to keep.
    pub output_keep: usize,
}

/// Lifecycle state of an instance as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// The process is alive.
    Running,

    /// Not running. A failed start also lands here, with `last_error` set.
    Stopped,

    /// Retries are exhausted; only an explicit start clears this.
    Failed,
}

/// Status of one instance for the management API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    /// Owner of the instance.
    pub username: String,

    /// PHP version.
    pub version: String,

    /// The request socket.
    pub socket_path: PathBuf,

    /// Lifecycle state.
    pub status: InstanceStatus,

    /// Pid of the runtime while running.
    pub pid: Option<u32>,

    /// When the current process was started or adopted.
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since `started_at`.
    pub uptime_secs: u64,

    /// PHP threads reported by the admin API, if it answered.
    pub thread_count: Option<u32>,

    /// Active sites served by this instance.
    pub site_count: usize,

    /// Consecutive failed starts.
    pub restart_attempts: u32,

    /// The most recent failure.
    pub last_error: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl InstanceSpec {
    /// Derives the launch parameters of `user`'s instance of `version`.
    pub fn new(user: &User, version: &PhpVersionConfig, config: &HostcoreConfig) -> Self {
        let layout = config.layout();
        let username = user.get_username();
        let v = version.get_version();

        Self {
            key: InstanceKey::new(username, v),
            uid: *user.get_uid(),
            gid: *user.get_gid(),
            binary: version.get_binary_path().clone(),
            config_path: config.instance_config_path(username, v),
            socket: layout.socket(username, v),
            admin_socket: layout.admin_socket(username, v),
            pid_file: layout.pid_file(username, v),
            log_path: layout.instance_log(username, v),
            home_dir: layout.home(username),
            work_dir: layout.www(username),
            output_max_bytes: *config.get_instance_output_max_bytes(),
            output_keep: *config.get_instance_log_roll_keep() as usize,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
