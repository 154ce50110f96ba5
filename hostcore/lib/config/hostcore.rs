//! The hostcore configuration file.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{layout::HomeLayout, php::RestartPolicy, HostcoreError, HostcoreResult};

use super::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Settings shared by every component of the control plane.
///
/// Loaded once by the binary and handed to each component's constructor.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct HostcoreConfig {
    /// Development mode: plain HTTP routing, no automatic HTTPS.
    #[builder(default)]
    dev_mode: bool,

    /// Contact address for automatic HTTPS.
    #[builder(default = DEFAULT_ADMIN_EMAIL.to_string(), setter(into))]
    admin_email: String,

    /// Public HTTP port.
    #[builder(default = DEFAULT_HTTP_PORT)]
    http_port: u16,

    /// Public HTTPS port.
    #[builder(default = DEFAULT_HTTPS_PORT)]
    https_port: u16,

    /// Parent directory of every user's home.
    #[builder(default = PathBuf::from(DEFAULT_HOME_ROOT), setter(into))]
    home_root: PathBuf,

    /// Where rendered proxy documents are written.
    #[builder(default = PathBuf::from(DEFAULT_OUTPUT_DIR), setter(into))]
    output_dir: PathBuf,

    /// Where the main proxy writes its access log.
    #[builder(default = PathBuf::from(DEFAULT_LOG_DIR), setter(into))]
    log_dir: PathBuf,

    /// Where the declared state is read from.
    #[builder(default = PathBuf::from(DEFAULT_STATE_PATH), setter(into))]
    state_file: PathBuf,

    /// The daemon's control socket.
    #[builder(default = PathBuf::from(DEFAULT_CONTROL_SOCKET), setter(into))]
    control_socket: PathBuf,

    /// Base URL of the main proxy's admin API.
    #[builder(default = DEFAULT_PROXY_ADMIN_URL.to_string(), setter(into))]
    proxy_admin_url: String,

    /// Listen address written into the main proxy's `admin` directive.
    #[builder(default = DEFAULT_PROXY_ADMIN_LISTEN.to_string(), setter(into))]
    proxy_admin_listen: String,

    /// Group marking SFTP-only users.
    #[builder(default = DEFAULT_JAIL_GROUP.to_string(), setter(into))]
    jail_group: String,

    /// Groups whose members are never jailed.
    #[builder(default = DEFAULT_ADMIN_GROUPS.iter().map(|g| g.to_string()).collect())]
    admin_groups: Vec<String>,

    /// The SSH daemon configuration file.
    #[builder(default = PathBuf::from(DEFAULT_SSHD_CONFIG_PATH), setter(into))]
    sshd_config_path: PathBuf,

    /// Upper bound for any external command, in seconds.
    #[builder(default = DEFAULT_COMMAND_TIMEOUT_SECS)]
    command_timeout_secs: u64,

    /// Grace between SIGTERM and SIGKILL, in seconds.
    #[builder(default = DEFAULT_STOP_GRACE_SECS)]
    stop_grace_secs: u64,

    /// How long a start waits for its socket, in seconds.
    #[builder(default = DEFAULT_SOCKET_WAIT_SECS)]
    socket_wait_secs: u64,

    /// Interval between periodic reconciliations, in seconds.
    #[builder(default = DEFAULT_RECONCILE_INTERVAL_SECS)]
    reconcile_interval_secs: u64,

    /// Crash restart policy for instances.
    #[builder(default)]
    restart_policy: RestartPolicy,

    /// Size at which the main proxy access log rolls, in MB.
    #[builder(default = DEFAULT_PROXY_LOG_ROLL_SIZE_MB)]
    proxy_log_roll_size_mb: u64,

    /// Rolled main proxy access logs to keep.
    #[builder(default = DEFAULT_PROXY_LOG_ROLL_KEEP)]
    proxy_log_roll_keep: u32,

    /// Size at which an instance access log rolls, in MB.
    #[builder(default = DEFAULT_INSTANCE_LOG_ROLL_SIZE_MB)]
    instance_log_roll_size_mb: u64,

    /// Rolled instance access logs to keep.
    #[builder(default = DEFAULT_INSTANCE_LOG_ROLL_KEEP)]
    instance_log_roll_keep: u32,

    /// Size at which captured instance output rotates, in bytes.
    #[builder(default = DEFAULT_INSTANCE_OUTPUT_MAX_BYTES)]
    instance_output_max_bytes: u64,

    /// Apply per-user cgroup limits to instances.
    #[builder(default)]
    enforce_limits: bool,

    /// Mount point of the cgroup v2 hierarchy.
    #[builder(default = PathBuf::from(DEFAULT_CGROUP_ROOT), setter(into))]
    cgroup_root: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HostcoreConfig {
    /// Loads the configuration.
    ///
    /// An explicitly given path must exist. Without one the default path is tried and, if
    /// absent, built-in defaults are used. Environment overrides are applied last.
    pub async fn load(path: Option<&Path>) -> HostcoreResult<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let mut config = match tokio::fs::read_to_string(&path).await {
            Ok(content) => Self::from_toml(&content).map_err(|e| HostcoreError::InvalidConfig {
                path: path.clone(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                tracing::debug!(path = %path.display(), "no configuration file, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(HostcoreError::InvalidConfig {
                    path,
                    reason: e.to_string(),
                })
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parses a TOML document. Missing keys take their defaults.
    pub fn from_toml(content: &str) -> HostcoreResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Applies `HOSTCORE_*` overrides read through `lookup`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> HostcoreResult<()> {
        if let Some(value) = lookup(DEV_MODE_ENV_VAR) {
            self.dev_mode = matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Some(value) = lookup(HTTP_PORT_ENV_VAR) {
            self.http_port = parse_port(HTTP_PORT_ENV_VAR, &value)?;
        }

        if let Some(value) = lookup(HTTPS_PORT_ENV_VAR) {
            self.https_port = parse_port(HTTPS_PORT_ENV_VAR, &value)?;
        }

        if let Some(value) = lookup(OUTPUT_DIR_ENV_VAR) {
            self.output_dir = PathBuf::from(value);
        }

        if let Some(value) = lookup(LOG_DIR_ENV_VAR) {
            self.log_dir = PathBuf::from(value);
        }

        if let Some(value) = lookup(CONTROL_SOCKET_ENV_VAR) {
            self.control_socket = PathBuf::from(value);
        }

        Ok(())
    }

    /// The per-user filesystem layout rooted at `home_root`.
    pub fn layout(&self) -> HomeLayout {
        HomeLayout::new(&self.home_root)
    }

    /// Path of the rendered main proxy document.
    pub fn main_config_path(&self) -> PathBuf {
        self.output_dir.join("Caddyfile.proxy")
    }

    /// Path of the rendered routing document for one instance.
    pub fn instance_config_path(&self, username: &str, version: &str) -> PathBuf {
        self.output_dir
            .join(format!("php-{version}"))
            .join(format!("{username}.Caddyfile"))
    }

    /// Upper bound for external commands.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Grace between SIGTERM and SIGKILL.
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// How long a start waits for its socket.
    pub fn socket_wait(&self) -> Duration {
        Duration::from_secs(self.socket_wait_secs)
    }

    /// Interval between periodic reconciliations.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn parse_port(var: &str, value: &str) -> HostcoreResult<u16> {
    value.trim().parse().map_err(|_| HostcoreError::InvalidConfig {
        path: PathBuf::from(format!("${var}")),
        reason: format!("{value:?} is not a valid port"),
    })
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for HostcoreConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostcoreConfig::default();
        assert!(!*config.get_dev_mode());
        assert_eq!(*config.get_http_port(), 80);
        assert_eq!(*config.get_https_port(), 443);
        assert_eq!(config.get_admin_groups(), &vec!["sudo".to_string(), "wheel".to_string()]);
        assert_eq!(config.stop_grace(), Duration::from_secs(10));
        assert_eq!(
            config.main_config_path(),
            PathBuf::from("/etc/hostcore/caddy/Caddyfile.proxy")
        );
        assert_eq!(
            config.instance_config_path("alice", "8.4"),
            PathBuf::from("/etc/hostcore/caddy/php-8.4/alice.Caddyfile")
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() -> anyhow::Result<()> {
        let config = HostcoreConfig::from_toml(
            r#"
            dev_mode = true
            http_port = 8080
            home_root = "/srv/home"

            [restart_policy]
            max_attempts = 2
            "#,
        )?;

        assert!(*config.get_dev_mode());
        assert_eq!(*config.get_http_port(), 8080);
        assert_eq!(*config.get_https_port(), 443);
        assert_eq!(config.get_home_root(), &PathBuf::from("/srv/home"));
        assert_eq!(*config.get_restart_policy().get_max_attempts(), 2);
        assert_eq!(config.get_jail_group(), DEFAULT_JAIL_GROUP);

        Ok(())
    }

    #[test]
    fn test_env_overrides() -> anyhow::Result<()> {
        let env: HashMap<&str, &str> = [
            (DEV_MODE_ENV_VAR, "true"),
            (HTTP_PORT_ENV_VAR, "8081"),
            (OUTPUT_DIR_ENV_VAR, "/tmp/out"),
        ]
        .into_iter()
        .collect();

        let mut config = HostcoreConfig::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()))?;

        assert!(*config.get_dev_mode());
        assert_eq!(*config.get_http_port(), 8081);
        assert_eq!(config.get_output_dir(), &PathBuf::from("/tmp/out"));

        let mut config = HostcoreConfig::default();
        let bad = config.apply_env_overrides(|key| {
            (key == HTTPS_PORT_ENV_VAR).then(|| "not-a-port".to_string())
        });
        assert!(matches!(bad, Err(HostcoreError::InvalidConfig { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_load_missing_explicit_path_fails() {
        let result = HostcoreConfig::load(Some(Path::new("/nonexistent/hostcore.toml"))).await;
        assert!(matches!(result, Err(HostcoreError::InvalidConfig { .. })));
    }
}
