//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Where the daemon and CLI look for their configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hostcore/hostcore.toml";

/// Where the declared users, sites and PHP versions are read from.
pub const DEFAULT_STATE_PATH: &str = "/etc/hostcore/state.toml";

/// Parent directory of every user's home.
pub const DEFAULT_HOME_ROOT: &str = "/home";

/// Where rendered proxy documents are written.
pub const DEFAULT_OUTPUT_DIR: &str = "/etc/hostcore/caddy";

/// Where the main proxy writes its access log.
pub const DEFAULT_LOG_DIR: &str = "/var/log/hostcore";

/// The Unix socket the daemon serves its control API on.
pub const DEFAULT_CONTROL_SOCKET: &str = "/run/hostcore/control.sock";

/// The admin endpoint of the main proxy.
pub const DEFAULT_PROXY_ADMIN_URL: &str = "http://localhost:2019";

/// The address the main proxy's admin endpoint listens on, as written into its global block.
pub const DEFAULT_PROXY_ADMIN_LISTEN: &str = "localhost:2019";

/// Public HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Public HTTPS port.
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// Contact address for automatic HTTPS.
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@localhost";

/// Group marking SFTP-only users.
pub const DEFAULT_JAIL_GROUP: &str = "hostcore-jail";

/// Groups whose members can never be jailed.
pub const DEFAULT_ADMIN_GROUPS: &[&str] = &["sudo", "wheel"];

/// The SSH daemon configuration the jail block is injected into.
pub const DEFAULT_SSHD_CONFIG_PATH: &str = "/etc/ssh/sshd_config";

/// Upper bound for any external command.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Grace period between SIGTERM and SIGKILL when stopping an instance.
pub const DEFAULT_STOP_GRACE_SECS: u64 = 10;

/// How long a start waits for the instance socket to accept connections.
pub const DEFAULT_SOCKET_WAIT_SECS: u64 = 10;

/// Interval between periodic reconciliation passes in the daemon.
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 30;

/// Size at which the main proxy access log rolls.
pub const DEFAULT_PROXY_LOG_ROLL_SIZE_MB: u64 = 100;

/// Rolled main proxy access logs to keep.
pub const DEFAULT_PROXY_LOG_ROLL_KEEP: u32 = 5;

/// Size at which an instance access log rolls.
pub const DEFAULT_INSTANCE_LOG_ROLL_SIZE_MB: u64 = 50;

/// Rolled instance access logs to keep.
pub const DEFAULT_INSTANCE_LOG_ROLL_KEEP: u32 = 3;

/// Size at which the captured stdout/stderr of an instance rotates.
pub const DEFAULT_INSTANCE_OUTPUT_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Worker processes per worker-mode site when none are configured.
pub const DEFAULT_WORKER_NUM: u32 = 2;

/// PHP threads per instance when the version does not say.
pub const DEFAULT_NUM_THREADS: u32 = 4;

/// Mount point of the cgroup v2 hierarchy.
pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Environment variable enabling development mode.
pub const DEV_MODE_ENV_VAR: &str = "HOSTCORE_DEV";

/// Environment variable overriding the public HTTP port.
pub const HTTP_PORT_ENV_VAR: &str = "HOSTCORE_HTTP_PORT";

/// Environment variable overriding the public HTTPS port.
pub const HTTPS_PORT_ENV_VAR: &str = "HOSTCORE_HTTPS_PORT";

/// Environment variable overriding the rendered document directory.
pub const OUTPUT_DIR_ENV_VAR: &str = "HOSTCORE_OUTPUT_DIR";

/// Environment variable overriding the main proxy log directory.
pub const LOG_DIR_ENV_VAR: &str = "HOSTCORE_LOG_DIR";

/// Environment variable overriding the control socket path.
pub const CONTROL_SOCKET_ENV_VAR: &str = "HOSTCORE_CONTROL_SOCKET";
